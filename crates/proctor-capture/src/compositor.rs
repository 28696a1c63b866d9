//! Frame sampling and dual-source compositing.
//!
//! [`FrameCompositor::sample`] reads the current frame(s) of the Ready
//! sources for a [`CaptureMode`] and produces one JPEG-encoded [`Sample`].
//! In `Both` mode the screen frame is stacked above the camera frame with a
//! fixed gap, and each part is labelled.

use chrono::Utc;
use image::buffer::ConvertBuffer;
use image::codecs::jpeg::JpegEncoder;
use image::{imageops, Rgba, RgbImage, RgbaImage};
use proctor_core::models::{CaptureMode, Sample, SourceKind};
use proctor_core::{ProctorError, Result};

use crate::source::SourceHandle;

/// Vertical gap between the stacked frames of a composite.
pub const COMPOSITE_GAP: u32 = 20;

/// Fixed JPEG quality (0.8).
pub const JPEG_QUALITY: u8 = 80;

/// Each glyph pixel is drawn as a `LABEL_SCALE`×`LABEL_SCALE` block, so the
/// 5×7 font renders about 14 px tall.
const LABEL_SCALE: i32 = 2;
const LABEL_X: i32 = 10;
/// Baseline offsets of the two labels, measured from the top of each part.
const SCREEN_LABEL_BASELINE: i32 = 20;
const CAMERA_LABEL_BASELINE: i32 = 40;

const BACKGROUND: Rgba<u8> = Rgba([0, 0, 0, 255]);
const LABEL_COLOR: Rgba<u8> = Rgba([255, 255, 255, 255]);

// ── FrameCompositor ───────────────────────────────────────────────────────────

#[derive(Debug, Default, Clone, Copy)]
pub struct FrameCompositor;

impl FrameCompositor {
    pub fn new() -> Self {
        Self
    }

    /// Take one sample for `mode`.
    ///
    /// Returns `None` when a required source is not Ready (or has no frame
    /// yet). That is an expected outcome, not an error; encoding failures are
    /// logged and also yield `None`.
    pub fn sample(
        &self,
        mode: CaptureMode,
        camera: &SourceHandle,
        screen: &SourceHandle,
    ) -> Option<Sample> {
        let frame = match mode {
            CaptureMode::Camera => camera.frame()?,
            CaptureMode::Screen => screen.frame()?,
            CaptureMode::Both => {
                let screen_frame = screen.frame()?;
                let camera_frame = camera.frame()?;
                compose_dual(&screen_frame, &camera_frame)
            }
        };

        match encode_jpeg(&frame) {
            Ok(encoded_image) => Some(Sample {
                mode,
                encoded_image,
                width: frame.width(),
                height: frame.height(),
                created_at: Utc::now(),
            }),
            Err(e) => {
                tracing::warn!(error = %e, %mode, "dropping sample");
                None
            }
        }
    }
}

// ── Compositing ───────────────────────────────────────────────────────────────

/// Stack `screen` above `camera`.
///
/// The canvas is `max(widths)` wide and `screen.h + camera.h + COMPOSITE_GAP`
/// tall; uncovered areas stay black.
pub fn compose_dual(screen: &RgbaImage, camera: &RgbaImage) -> RgbaImage {
    let width = screen.width().max(camera.width());
    let height = screen.height() + camera.height() + COMPOSITE_GAP;
    let mut canvas = RgbaImage::from_pixel(width, height, BACKGROUND);

    let camera_top = screen.height() + COMPOSITE_GAP;
    imageops::replace(&mut canvas, screen, 0, 0);
    imageops::replace(&mut canvas, camera, 0, i64::from(camera_top));

    draw_label(
        &mut canvas,
        LABEL_X,
        SCREEN_LABEL_BASELINE,
        SourceKind::Screen.composite_label(),
    );
    draw_label(
        &mut canvas,
        LABEL_X,
        screen.height() as i32 + CAMERA_LABEL_BASELINE,
        SourceKind::Camera.composite_label(),
    );

    canvas
}

/// Encode `frame` as baseline JPEG at [`JPEG_QUALITY`].
pub fn encode_jpeg(frame: &RgbaImage) -> Result<Vec<u8>> {
    let rgb: RgbImage = frame.convert();
    let mut buffer = Vec::new();
    JpegEncoder::new_with_quality(&mut buffer, JPEG_QUALITY)
        .encode_image(&rgb)
        .map_err(|err| ProctorError::Encode(err.to_string()))?;
    Ok(buffer)
}

// ── Labels ────────────────────────────────────────────────────────────────────

/// Draw `text` with its baseline at `baseline`. Unknown glyphs advance the
/// cursor without drawing.
fn draw_label(image: &mut RgbaImage, mut x: i32, baseline: i32, text: &str) {
    let (width, height) = (image.width() as i32, image.height() as i32);
    let top = baseline - 7 * LABEL_SCALE;

    for ch in text.chars().flat_map(|c| c.to_uppercase()) {
        if let Some(glyph) = glyph_bits(ch) {
            for (row, pattern) in glyph.iter().enumerate() {
                for col in 0..5 {
                    if (pattern >> (4 - col)) & 1 == 0 {
                        continue;
                    }
                    for dy in 0..LABEL_SCALE {
                        for dx in 0..LABEL_SCALE {
                            let px = x + col * LABEL_SCALE + dx;
                            let py = top + row as i32 * LABEL_SCALE + dy;
                            if (0..width).contains(&px) && (0..height).contains(&py) {
                                image.put_pixel(px as u32, py as u32, LABEL_COLOR);
                            }
                        }
                    }
                }
            }
        }
        x += 6 * LABEL_SCALE;
    }
}

fn glyph_bits(ch: char) -> Option<[u8; 7]> {
    match ch {
        'A' => Some([0b01110, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001]),
        'B' => Some([0b11110, 0b10001, 0b10001, 0b11110, 0b10001, 0b10001, 0b11110]),
        'C' => Some([0b01110, 0b10001, 0b10000, 0b10000, 0b10000, 0b10001, 0b01110]),
        'E' => Some([0b11111, 0b10000, 0b10000, 0b11110, 0b10000, 0b10000, 0b11111]),
        'M' => Some([0b10001, 0b11011, 0b10101, 0b10101, 0b10001, 0b10001, 0b10001]),
        'N' => Some([0b10001, 0b10001, 0b11001, 0b10101, 0b10011, 0b10001, 0b10001]),
        'P' => Some([0b11110, 0b10001, 0b10001, 0b11110, 0b10000, 0b10000, 0b10000]),
        'R' => Some([0b11110, 0b10001, 0b10001, 0b11110, 0b10100, 0b10010, 0b10001]),
        'S' => Some([0b01111, 0b10000, 0b10000, 0b01110, 0b00001, 0b00001, 0b11110]),
        'T' => Some([0b11111, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100]),
        'U' => Some([0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110]),
        'W' => Some([0b10001, 0b10001, 0b10001, 0b10101, 0b10101, 0b10101, 0b01010]),
        _ => None,
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::tests::FakeBackend;
    use crate::source::SourceEvent;
    use tokio::sync::mpsc;

    const SCREEN_COLOR: [u8; 4] = [0, 0, 200, 255];
    const CAMERA_COLOR: [u8; 4] = [0, 200, 0, 255];

    async fn handles(
        backend: &FakeBackend,
        start_camera: bool,
        start_screen: bool,
    ) -> (SourceHandle, SourceHandle, mpsc::UnboundedReceiver<SourceEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut camera = SourceHandle::new(SourceKind::Camera, tx.clone());
        let mut screen = SourceHandle::new(SourceKind::Screen, tx);
        if start_camera {
            camera.start(backend).await.unwrap();
        }
        if start_screen {
            screen.start(backend).await.unwrap();
        }
        (camera, screen, rx)
    }

    fn backend(camera: (u32, u32), screen: (u32, u32)) -> FakeBackend {
        FakeBackend::default()
            .with_frame(SourceKind::Camera, camera.0, camera.1, CAMERA_COLOR)
            .with_frame(SourceKind::Screen, screen.0, screen.1, SCREEN_COLOR)
    }

    #[test]
    fn test_composite_dimensions() {
        for ((sw, sh), (cw, ch)) in [
            ((1920, 1080), (640, 480)),
            ((320, 200), (640, 480)),
            ((100, 50), (100, 50)),
        ] {
            let screen = RgbaImage::from_pixel(sw, sh, Rgba(SCREEN_COLOR));
            let camera = RgbaImage::from_pixel(cw, ch, Rgba(CAMERA_COLOR));
            let composite = compose_dual(&screen, &camera);
            assert_eq!(composite.width(), sw.max(cw));
            assert_eq!(composite.height(), sh + ch + COMPOSITE_GAP);
        }
    }

    #[test]
    fn test_composite_layout() {
        let screen = RgbaImage::from_pixel(400, 300, Rgba(SCREEN_COLOR));
        let camera = RgbaImage::from_pixel(200, 100, Rgba(CAMERA_COLOR));
        let composite = compose_dual(&screen, &camera);

        // Screen occupies the top, away from its label.
        assert_eq!(composite.get_pixel(300, 200), &Rgba(SCREEN_COLOR));
        // Gap is background.
        assert_eq!(composite.get_pixel(300, 310), &BACKGROUND);
        // Camera starts right below the gap.
        assert_eq!(composite.get_pixel(150, 320 + 90), &Rgba(CAMERA_COLOR));
        // Right of the narrower camera frame stays background.
        assert_eq!(composite.get_pixel(350, 350), &BACKGROUND);
    }

    #[test]
    fn test_composite_labels_drawn() {
        let screen = RgbaImage::from_pixel(400, 300, Rgba(SCREEN_COLOR));
        let camera = RgbaImage::from_pixel(400, 100, Rgba(CAMERA_COLOR));
        let composite = compose_dual(&screen, &camera);

        let white_in = |y0: u32, y1: u32| {
            (y0..y1).any(|y| (10..200).any(|x| composite.get_pixel(x, y) == &LABEL_COLOR))
        };
        assert!(white_in(6, 20), "screen label missing");
        assert!(white_in(300 + 26, 300 + 40), "camera label missing");
        assert!(!white_in(100, 290), "no label in the middle of the screen frame");
    }

    #[test]
    fn test_encode_jpeg_produces_jpeg() {
        let frame = RgbaImage::from_pixel(64, 48, Rgba([10, 20, 30, 255]));
        let bytes = encode_jpeg(&frame).unwrap();
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
        let decoded = image::load_from_memory(&bytes).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (64, 48));
    }

    #[tokio::test]
    async fn test_sample_none_when_required_not_ready() {
        let backend = backend((64, 48), (128, 72));
        let compositor = FrameCompositor::new();

        let (camera, screen, _rx) = handles(&backend, false, false).await;
        for mode in [CaptureMode::Camera, CaptureMode::Screen, CaptureMode::Both] {
            assert!(compositor.sample(mode, &camera, &screen).is_none());
        }

        let (camera, screen, _rx) = handles(&backend, true, false).await;
        assert!(compositor.sample(CaptureMode::Camera, &camera, &screen).is_some());
        assert!(compositor.sample(CaptureMode::Screen, &camera, &screen).is_none());
        assert!(compositor.sample(CaptureMode::Both, &camera, &screen).is_none());

        let (camera, screen, _rx) = handles(&backend, false, true).await;
        assert!(compositor.sample(CaptureMode::Camera, &camera, &screen).is_none());
        assert!(compositor.sample(CaptureMode::Screen, &camera, &screen).is_some());
        assert!(compositor.sample(CaptureMode::Both, &camera, &screen).is_none());
    }

    #[tokio::test]
    async fn test_sample_none_after_stop() {
        let backend = backend((64, 48), (128, 72));
        let (mut camera, screen, _rx) = handles(&backend, true, true).await;
        camera.stop();
        let compositor = FrameCompositor::new();
        assert!(compositor.sample(CaptureMode::Camera, &camera, &screen).is_none());
        assert!(compositor.sample(CaptureMode::Both, &camera, &screen).is_none());
    }

    #[tokio::test]
    async fn test_sample_native_resolution_single() {
        let backend = backend((64, 48), (128, 72));
        let (camera, screen, _rx) = handles(&backend, true, true).await;
        let compositor = FrameCompositor::new();

        let s = compositor.sample(CaptureMode::Camera, &camera, &screen).unwrap();
        assert_eq!((s.width, s.height), (64, 48));
        assert_eq!(s.mode, CaptureMode::Camera);

        let s = compositor.sample(CaptureMode::Screen, &camera, &screen).unwrap();
        assert_eq!((s.width, s.height), (128, 72));
    }

    #[tokio::test]
    async fn test_sample_both_is_composite() {
        let backend = backend((64, 48), (128, 72));
        let (camera, screen, _rx) = handles(&backend, true, true).await;

        let s = FrameCompositor::new()
            .sample(CaptureMode::Both, &camera, &screen)
            .unwrap();
        assert_eq!(s.mode, CaptureMode::Both);
        assert_eq!(s.width, 128);
        assert_eq!(s.height, 72 + 48 + COMPOSITE_GAP);

        let decoded = image::load_from_memory(&s.encoded_image).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (s.width, s.height));
    }
}
