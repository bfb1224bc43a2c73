//! Evidence images for matched events.
//!
//! The snapshot is saved into the capture directory as
//! `<local time>-camera-<id>-<name>.jpg`. With the `annotate` feature the
//! matched boxes (yellow) and the camera's ignore areas (red) are drawn on
//! it first; otherwise the snapshot bytes are stored unchanged.

use anyhow::{Context, Result};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

use crate::config::CameraPolicy;
use crate::detect::Prediction;
use crate::session::Snapshot;

const TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

pub trait EvidenceWriter: Send + Sync {
    /// Persist `snapshot` with `predictions` overlaid; returns the saved path.
    fn persist(
        &self,
        camera: &CameraPolicy,
        snapshot: &Snapshot,
        predictions: &[Prediction],
    ) -> Result<PathBuf>;
}

pub struct CaptureDirWriter {
    root: PathBuf,
}

impl CaptureDirWriter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn capture_path(&self, camera: &CameraPolicy) -> PathBuf {
        let time_now = chrono::Local::now().format(TIME_FORMAT);
        self.root.join(format!(
            "{}-camera-{}-{}.jpg",
            time_now,
            sanitize_file_component(&camera.id),
            sanitize_file_component(&camera.name)
        ))
    }
}

impl EvidenceWriter for CaptureDirWriter {
    fn persist(
        &self,
        camera: &CameraPolicy,
        snapshot: &Snapshot,
        predictions: &[Prediction],
    ) -> Result<PathBuf> {
        fs::create_dir_all(&self.root)
            .with_context(|| format!("create capture dir {}", self.root.display()))?;
        let image = render(snapshot, predictions, &camera.ignore_areas)?;
        let path = self.capture_path(camera);
        write_atomic(&self.root, &path, &image)?;
        log::info!(
            "camera {}: capture of {} saved to {}",
            camera.id,
            camera.name,
            path.display()
        );
        Ok(path)
    }
}

#[cfg(feature = "annotate")]
fn render(
    snapshot: &Snapshot,
    predictions: &[Prediction],
    ignore_areas: &[crate::geometry::Rectangle],
) -> Result<Vec<u8>> {
    annotate::draw_evidence(&snapshot.bytes, predictions, ignore_areas)
}

#[cfg(not(feature = "annotate"))]
fn render(
    snapshot: &Snapshot,
    _predictions: &[Prediction],
    _ignore_areas: &[crate::geometry::Rectangle],
) -> Result<Vec<u8>> {
    Ok(snapshot.bytes.clone())
}

#[cfg(feature = "annotate")]
mod annotate {
    use anyhow::{Context, Result};
    use image::codecs::jpeg::JpegEncoder;
    use image::{Rgb, RgbImage};

    use crate::detect::Prediction;
    use crate::geometry::Rectangle;

    const PREDICTION_COLOR: Rgb<u8> = Rgb([255, 230, 66]);
    const IGNORE_COLOR: Rgb<u8> = Rgb([255, 66, 66]);
    const LINE_WIDTH: u32 = 2;
    const JPEG_QUALITY: u8 = 100;

    pub(super) fn draw_evidence(
        jpeg: &[u8],
        predictions: &[Prediction],
        ignore_areas: &[Rectangle],
    ) -> Result<Vec<u8>> {
        let mut img = image::load_from_memory(jpeg)
            .context("decode snapshot")?
            .into_rgb8();
        for prediction in predictions {
            draw_rect(&mut img, &prediction.bounds, PREDICTION_COLOR, LINE_WIDTH);
        }
        for area in ignore_areas {
            draw_rect(&mut img, area, IGNORE_COLOR, LINE_WIDTH);
        }
        let mut out = Vec::new();
        JpegEncoder::new_with_quality(&mut out, JPEG_QUALITY)
            .encode_image(&img)
            .context("encode evidence jpeg")?;
        Ok(out)
    }

    /// Outline `rect`, clamped to the image, `thickness` pixels inwards.
    pub(super) fn draw_rect(img: &mut RgbImage, rect: &Rectangle, color: Rgb<u8>, thickness: u32) {
        let (w, h) = img.dimensions();
        if w == 0 || h == 0 {
            return;
        }
        let clamp = |v: i64, max: u32| -> u32 { v.clamp(0, i64::from(max) - 1) as u32 };
        let x0 = clamp(rect.x_min, w);
        let y0 = clamp(rect.y_min, h);
        let x1 = clamp(rect.x_max, w);
        let y1 = clamp(rect.y_max, h);
        for t in 0..thickness {
            let xx0 = x0 + t;
            let yy0 = y0 + t;
            let xx1 = x1.saturating_sub(t);
            let yy1 = y1.saturating_sub(t);
            if xx0 > xx1 || yy0 > yy1 {
                break;
            }
            for x in xx0..=xx1 {
                img.put_pixel(x, yy0, color);
                img.put_pixel(x, yy1, color);
            }
            for y in yy0..=yy1 {
                img.put_pixel(xx0, y, color);
                img.put_pixel(xx1, y, color);
            }
        }
    }

}

fn sanitize_file_component(value: &str) -> String {
    value
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .take(64)
        .collect()
}

/// Writes through a uniquely named temp file in `dir`, then renames it over
/// `path`. Concurrent writers to the same `path` never share a temp file.
fn write_atomic(dir: &Path, path: &Path, data: &[u8]) -> Result<()> {
    let mut file = NamedTempFile::new_in(dir)
        .with_context(|| format!("create temp file in {}", dir.display()))?;
    file.write_all(data)?;
    file.as_file().sync_all()?;
    file.persist(path)
        .map_err(|e| e.error)
        .with_context(|| format!("persist {}", path.display()))?;
    Ok(())
}
