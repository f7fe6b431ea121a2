//! QR encoding and ticket compositing.
//!
//! The QR code is scaled by [`QR_SCALE`], centered horizontally and placed
//! [`QR_OFFSET_Y`] pixels below the background's vertical midpoint. Every step
//! is deterministic, so the same code always yields the same PNG bytes.
use image::imageops::{self, FilterType};
use image::{DynamicImage, GrayImage, ImageFormat, Luma, RgbaImage};
use qrcode::{EcLevel, QrCode};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const QR_SCALE: f32 = 1.55;
pub const QR_OFFSET_Y: u32 = 100;
/// Edge length of one QR module before scaling.
pub const QR_MODULE_PX: u32 = 10;

#[derive(Debug, Error)]
pub enum ImageError {
    #[error("qr encoding failed: {0}")]
    Qr(#[from] qrcode::types::QrError),
    #[error("image processing failed: {0}")]
    Image(#[from] image::ImageError),
    #[error("failed to load background {path}: {source}")]
    Background {
        path: PathBuf,
        source: image::ImageError,
    },
    #[error("qr code {qr_width}x{qr_height} at y={top} does not fit background {width}x{height}")]
    DoesNotFit {
        qr_width: u32,
        qr_height: u32,
        top: u32,
        width: u32,
        height: u32,
    },
    #[error("failed to archive ticket {path}: {source}")]
    Archive {
        path: PathBuf,
        source: std::io::Error,
    },
}

pub fn load_background(path: &Path) -> Result<RgbaImage, ImageError> {
    let img = image::open(path).map_err(|source| ImageError::Background {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(img.into_rgba8())
}

/// Encode `text` as a black-on-white QR code with a 4-module quiet zone.
pub fn encode_qr(text: &str) -> Result<GrayImage, ImageError> {
    let code = QrCode::with_error_correction_level(text.as_bytes(), EcLevel::L)?;
    Ok(code
        .render::<Luma<u8>>()
        .quiet_zone(true)
        .module_dimensions(QR_MODULE_PX, QR_MODULE_PX)
        .build())
}

/// Paste `qr`, scaled by `scale`, onto a copy of `background`: horizontally
/// centered, top edge `offset_y` below the vertical midpoint.
pub fn overlay(
    background: &RgbaImage,
    qr: &GrayImage,
    scale: f32,
    offset_y: u32,
) -> Result<RgbaImage, ImageError> {
    let qr_width = (qr.width() as f32 * scale) as u32;
    let qr_height = (qr.height() as f32 * scale) as u32;
    let (width, height) = background.dimensions();
    let top = height / 2 + offset_y;
    if qr_width > width || top.saturating_add(qr_height) > height {
        return Err(ImageError::DoesNotFit {
            qr_width,
            qr_height,
            top,
            width,
            height,
        });
    }

    let scaled = imageops::resize(qr, qr_width, qr_height, FilterType::Nearest);
    let scaled = DynamicImage::ImageLuma8(scaled).into_rgba8();
    let left = (width - qr_width) / 2;

    let mut ticket = background.clone();
    imageops::replace(&mut ticket, &scaled, i64::from(left), i64::from(top));
    Ok(ticket)
}

pub fn encode_png(image: &RgbaImage) -> Result<Vec<u8>, ImageError> {
    let mut buf = Cursor::new(Vec::new());
    image.write_to(&mut buf, ImageFormat::Png)?;
    Ok(buf.into_inner())
}

/// Full ticket for `code` as PNG bytes.
pub fn render_ticket(background: &RgbaImage, code: &str) -> Result<Vec<u8>, ImageError> {
    let qr = encode_qr(code)?;
    let ticket = overlay(background, &qr, QR_SCALE, QR_OFFSET_Y)?;
    encode_png(&ticket)
}

/// Write `png` to `{dir}/{code}.png` via a unique temporary file, so
/// concurrent writers never observe each other's partial output.
pub fn archive_ticket(dir: &Path, code: &str, png: &[u8]) -> Result<PathBuf, ImageError> {
    let target = dir.join(format!("{code}.png"));
    let tmp = dir.join(format!(".{code}.{}.tmp", uuid::Uuid::new_v4()));
    let archive_err = |source: std::io::Error| ImageError::Archive {
        path: target.clone(),
        source,
    };
    std::fs::write(&tmp, png).map_err(&archive_err)?;
    if let Err(err) = std::fs::rename(&tmp, &target) {
        let _ = std::fs::remove_file(&tmp);
        return Err(archive_err(err));
    }
    Ok(target)
}
