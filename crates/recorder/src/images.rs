//! FsImageStore - detection snapshots on disk
//!
//! Layout: `<base>/<YYYY-MM-DD>/<HHMMSS>_<id>_<label>.jpg`. Paths handed back
//! to callers are relative to `<base>`.

use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use contracts::{BoundingBox, ContractError, Frame, ImageStore, PixelFormat};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, Rgb, RgbImage};
use tracing::{debug, instrument};

use crate::error::{RecorderError, Result};

const BOX_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
const BOX_THICKNESS: u32 = 2;

/// Quality ladder used when squeezing an image under a size cap
const QUALITY_STEP: u8 = 10;
const DOWNSCALE_AT_QUALITY: u8 = 30;
const QUALITY_AFTER_DOWNSCALE: u8 = 50;
const QUALITY_FLOOR: u8 = 10;
const LAST_RESORT_QUALITY: u8 = 20;

pub struct FsImageStore {
    base: PathBuf,
    jpeg_quality: u8,
    saved: AtomicU64,
}

impl FsImageStore {
    pub fn new(base: impl Into<PathBuf>, jpeg_quality: u8) -> Result<Self> {
        let base = base.into();
        std::fs::create_dir_all(&base)?;
        Ok(Self {
            base,
            jpeg_quality: jpeg_quality.clamp(1, 100),
            saved: AtomicU64::new(0),
        })
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn saved_count(&self) -> u64 {
        self.saved.load(Ordering::Relaxed)
    }

    /// Encode and write the frame, returning the path relative to the base
    #[instrument(
        name = "image_store_save",
        skip(self, frame, bbox),
        fields(camera_id = %frame.camera_id, sequence = frame.sequence)
    )]
    pub fn save_frame(
        &self,
        frame: &Frame,
        detection_id: &str,
        label: &str,
        bbox: Option<&BoundingBox>,
    ) -> Result<PathBuf> {
        let mut image = frame_to_rgb(frame)?;
        if let Some(bbox) = bbox {
            draw_box(&mut image, bbox);
        }

        let now = chrono::Local::now();
        let folder = now.format("%Y-%m-%d").to_string();
        let filename = format!(
            "{}_{}_{}.jpg",
            now.format("%H%M%S"),
            sanitize(detection_id),
            sanitize(label)
        );

        let dir = self.base.join(&folder);
        std::fs::create_dir_all(&dir)?;

        let bytes = encode_jpeg(&image, self.jpeg_quality)?;
        std::fs::write(dir.join(&filename), bytes)?;
        self.saved.fetch_add(1, Ordering::Relaxed);

        let relative = PathBuf::from(folder).join(filename);
        debug!(path = %relative.display(), "Saved detection image");
        Ok(relative)
    }

    /// Base64 JPEG no larger than `max_kb` once encoded, when reachable.
    ///
    /// Quality steps down by 10 from the store quality; reaching 30 halves the
    /// dimensions and restarts at 50. Below the quality floor the image is
    /// returned at quality 20 regardless of size.
    pub fn bounded_base64(&self, path: &Path, max_kb: usize) -> Result<String> {
        let full = self.resolve(path);
        if !full.exists() {
            return Err(RecorderError::ImageNotFound(full.display().to_string()));
        }
        let mut image = image::open(&full)?.to_rgb8();
        let limit = max_kb * 1024;

        let mut quality = self.jpeg_quality;
        while quality > QUALITY_FLOOR {
            let encoded = encode_jpeg(&image, quality)?;
            if encoded.len() <= limit {
                return Ok(STANDARD.encode(encoded));
            }

            quality -= QUALITY_STEP;
            if quality <= DOWNSCALE_AT_QUALITY {
                let (width, height) = ((image.width() / 2).max(1), (image.height() / 2).max(1));
                image = DynamicImage::ImageRgb8(image)
                    .resize_exact(width, height, FilterType::Lanczos3)
                    .to_rgb8();
                quality = QUALITY_AFTER_DOWNSCALE;
                if width == 1 && height == 1 {
                    break;
                }
            }
        }

        Ok(STANDARD.encode(encode_jpeg(&image, LAST_RESORT_QUALITY)?))
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base.join(path)
        }
    }
}

impl ImageStore for FsImageStore {
    fn save(
        &self,
        frame: &Frame,
        detection_id: &str,
        label: &str,
        bbox: Option<&BoundingBox>,
    ) -> std::result::Result<PathBuf, ContractError> {
        self.save_frame(frame, detection_id, label, bbox)
            .map_err(|e| e.into_image(&self.base.display().to_string()))
    }

    fn get_as_bounded_base64(
        &self,
        path: &Path,
        max_kb: usize,
    ) -> std::result::Result<String, ContractError> {
        self.bounded_base64(path, max_kb)
            .map_err(|e| e.into_image(&path.display().to_string()))
    }
}

fn frame_to_rgb(frame: &Frame) -> Result<RgbImage> {
    if !frame.is_well_formed() {
        return Err(RecorderError::malformed_frame(&frame.camera_id, frame.sequence));
    }
    let data = match frame.format {
        PixelFormat::Rgb8 => frame.data.to_vec(),
        PixelFormat::Bgr8 => frame
            .data
            .chunks_exact(3)
            .flat_map(|px| [px[2], px[1], px[0]])
            .collect(),
        PixelFormat::Gray8 => frame.data.iter().flat_map(|&v| [v, v, v]).collect(),
    };
    RgbImage::from_raw(frame.width, frame.height, data)
        .ok_or_else(|| RecorderError::malformed_frame(&frame.camera_id, frame.sequence))
}

/// Outline the box, clipped to the image
fn draw_box(image: &mut RgbImage, bbox: &BoundingBox) {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return;
    }
    let clamp_x = |v: f32| (v.max(0.0) as u32).min(width - 1);
    let clamp_y = |v: f32| (v.max(0.0) as u32).min(height - 1);
    let (x1, y1, x2, y2) = (
        clamp_x(bbox.x1),
        clamp_y(bbox.y1),
        clamp_x(bbox.x2),
        clamp_y(bbox.y2),
    );

    for t in 0..BOX_THICKNESS {
        for x in x1..=x2 {
            image.put_pixel(x, (y1 + t).min(y2), BOX_COLOR);
            image.put_pixel(x, y2.saturating_sub(t).max(y1), BOX_COLOR);
        }
        for y in y1..=y2 {
            image.put_pixel((x1 + t).min(x2), y, BOX_COLOR);
            image.put_pixel(x2.saturating_sub(t).max(x1), y, BOX_COLOR);
        }
    }
}

fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>> {
    let mut buffer = Cursor::new(Vec::new());
    image.write_with_encoder(JpegEncoder::new_with_quality(&mut buffer, quality))?;
    Ok(buffer.into_inner())
}

/// Keep file names portable
fn sanitize(part: &str) -> String {
    part.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect()
}
