//! V4L2 capture backend
//!
//! Serves both board-integrated nodes (through the libcamera V4L2 compat
//! layer) and USB devices. RGB3 is requested; YUYV is converted.

use ouroboros::self_referencing;
use tracing::{info, warn};
use v4l::buffer::Type;
use v4l::io::traits::CaptureStream;
use v4l::prelude::MmapStream;
use v4l::video::Capture;
use v4l::FourCC;

use contracts::{CameraKind, PixelFormat};

use crate::backend::{CameraBackend, CaptureSettings, RawImage};
use crate::error::{CameraError, Result};

const BUFFER_COUNT: u32 = 4;

#[self_referencing]
struct V4l2State {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: MmapStream<'this, v4l::Device>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WireFormat {
    Rgb3,
    Yuyv,
}

/// `/dev/video<index>` capture
pub struct V4l2Backend {
    kind: CameraKind,
    index: u32,
    state: Option<V4l2State>,
    wire: WireFormat,
    active_width: u32,
    active_height: u32,
}

impl V4l2Backend {
    pub fn new(kind: CameraKind, index: u32) -> Self {
        Self {
            kind,
            index,
            state: None,
            wire: WireFormat::Rgb3,
            active_width: 0,
            active_height: 0,
        }
    }

    fn path(&self) -> String {
        format!("/dev/video{}", self.index)
    }

    fn open_error(&self, err: std::io::Error) -> CameraError {
        if err.kind() == std::io::ErrorKind::PermissionDenied {
            CameraError::PermissionDenied { device: self.path() }
        } else {
            CameraError::init_failed(self.path(), err.to_string())
        }
    }
}

impl CameraBackend for V4l2Backend {
    fn kind(&self) -> CameraKind {
        self.kind
    }

    fn describe(&self) -> String {
        self.path()
    }

    fn init(&mut self, settings: &CaptureSettings) -> Result<()> {
        let device = v4l::Device::new(self.index as usize).map_err(|e| self.open_error(e))?;

        let mut format = device
            .format()
            .map_err(|e| CameraError::init_failed(self.path(), format!("read format: {e}")))?;
        format.width = settings.width;
        format.height = settings.height;
        format.fourcc = FourCC::new(b"RGB3");

        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                warn!(
                    device = %self.path(),
                    error = %err,
                    "Failed to set format, using device default"
                );
                device.format().map_err(|e| {
                    CameraError::init_failed(
                        self.path(),
                        format!("read format after set failure: {e}"),
                    )
                })?
            }
        };

        self.wire = if format.fourcc == FourCC::new(b"RGB3") {
            WireFormat::Rgb3
        } else if format.fourcc == FourCC::new(b"YUYV") {
            WireFormat::Yuyv
        } else {
            return Err(CameraError::init_failed(
                self.path(),
                format!("unsupported pixel format {}", format.fourcc),
            ));
        };

        if settings.fps > 0.0 {
            let fps = settings.fps.round().max(1.0) as u32;
            let params = v4l::video::capture::Parameters::with_fps(fps);
            if let Err(err) = device.set_params(&params) {
                warn!(device = %self.path(), error = %err, "Failed to set frame rate");
            }
        }

        self.active_width = format.width;
        self.active_height = format.height;

        let state = V4l2StateTryBuilder {
            device,
            stream_builder: |device| {
                MmapStream::with_buffers(device, Type::VideoCapture, BUFFER_COUNT)
            },
        }
        .try_build()
        .map_err(|e| CameraError::init_failed(self.path(), format!("create buffer stream: {e}")))?;
        self.state = Some(state);

        info!(
            device = %self.path(),
            kind = %self.kind,
            width = self.active_width,
            height = self.active_height,
            wire = ?self.wire,
            "V4L2 device opened"
        );
        Ok(())
    }

    fn capture_once(&mut self) -> Result<RawImage> {
        let path = self.path();
        let state = self
            .state
            .as_mut()
            .ok_or_else(|| CameraError::capture_failed(&path, "device not open"))?;

        let data = state
            .with_stream_mut(|stream| stream.next().map(|(buf, _meta)| buf.to_vec()))
            .map_err(|e| CameraError::capture_failed(&path, e.to_string()))?;

        let data = match self.wire {
            WireFormat::Rgb3 => data,
            WireFormat::Yuyv => yuyv_to_rgb(&data),
        };

        Ok(RawImage {
            width: self.active_width,
            height: self.active_height,
            format: PixelFormat::Rgb8,
            data,
        })
    }

    fn release(&mut self) {
        if self.state.take().is_some() {
            info!(device = %self.path(), "V4L2 device released");
        }
    }
}

impl Drop for V4l2Backend {
    fn drop(&mut self) {
        self.release();
    }
}

/// Packed YUYV 4:2:2 to RGB888 (BT.601)
fn yuyv_to_rgb(yuyv: &[u8]) -> Vec<u8> {
    let mut rgb = Vec::with_capacity(yuyv.len() / 2 * 3);
    for chunk in yuyv.chunks_exact(4) {
        let (y0, u, y1, v) = (
            chunk[0] as f32,
            chunk[1] as f32 - 128.0,
            chunk[2] as f32,
            chunk[3] as f32 - 128.0,
        );
        for y in [y0, y1] {
            rgb.push((y + 1.402 * v).clamp(0.0, 255.0) as u8);
            rgb.push((y - 0.344 * u - 0.714 * v).clamp(0.0, 255.0) as u8);
            rgb.push((y + 1.772 * u).clamp(0.0, 255.0) as u8);
        }
    }
    rgb
}
