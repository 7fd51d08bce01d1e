//! FrameSource trait - pipeline input interface

use crate::Frame;

/// Something that yields frames on demand.
///
/// One call is one capture cycle. An empty vector means nothing was available
/// this cycle (camera recovering, all captures failed); it is not an error.
#[trait_variant::make(FrameSource: Send)]
pub trait LocalFrameSource {
    /// Source name (used for logging/metrics)
    fn name(&self) -> &str;

    /// Capture from every ready camera
    async fn capture_cycle(&self) -> Vec<Frame>;
}
