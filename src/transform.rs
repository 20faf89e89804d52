use crate::{config, error::TransformError};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use image::{DynamicImage, ImageFormat, imageops::FilterType};
use serde::{Deserialize, Serialize};
use std::io::Cursor;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColorMode {
    Grayscale,
    Rgb,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Re-encode in whatever format the source was decoded from.
    SameAsSource,
    Fixed(ImageFormat),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransformSpec {
    pub target_width: u32,
    pub target_height: u32,
    pub color_mode: ColorMode,
    pub output: OutputFormat,
}

impl Default for TransformSpec {
    fn default() -> Self {
        Self {
            target_width: 200,
            target_height: 200,
            color_mode: ColorMode::Grayscale,
            output: OutputFormat::SameAsSource,
        }
    }
}

impl TransformSpec {
    pub fn from_config(cfg: &config::Transform) -> Result<Self> {
        if cfg.width == 0 || cfg.height == 0 {
            return Err(anyhow!(
                "transform size must be non-zero: {}x{}",
                cfg.width,
                cfg.height
            ));
        }
        let color_mode = match cfg.color_mode.to_ascii_lowercase().as_str() {
            "grayscale" | "gray" | "l" => ColorMode::Grayscale,
            "rgb" => ColorMode::Rgb,
            other => return Err(anyhow!("unknown transform.color_mode: {other}")),
        };
        let output = match cfg.output_format.to_ascii_lowercase().as_str() {
            "auto" | "" => OutputFormat::SameAsSource,
            ext => OutputFormat::Fixed(
                ImageFormat::from_extension(ext)
                    .ok_or_else(|| anyhow!("unknown transform.output_format: {ext}"))?,
            ),
        };
        Ok(Self {
            target_width: cfg.width,
            target_height: cfg.height,
            color_mode,
            output,
        })
    }
}

/// Decode, resize, recolor and re-encode one image.
#[async_trait]
pub trait ImageTransformer: Send + Sync {
    async fn transform(&self, bytes: Vec<u8>, spec: &TransformSpec)
        -> Result<Vec<u8>, TransformError>;
}

/// `image`-crate codec. Work runs on the blocking pool.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageCodec;

#[async_trait]
impl ImageTransformer for ImageCodec {
    async fn transform(
        &self,
        bytes: Vec<u8>,
        spec: &TransformSpec,
    ) -> Result<Vec<u8>, TransformError> {
        let spec = *spec;
        tokio::task::spawn_blocking(move || transform_bytes(&bytes, &spec))
            .await
            .map_err(|e| TransformError::Aborted(e.to_string()))?
    }
}

pub fn transform_bytes(bytes: &[u8], spec: &TransformSpec) -> Result<Vec<u8>, TransformError> {
    let source_format =
        image::guess_format(bytes).map_err(|e| TransformError::Decode(e.to_string()))?;
    let img = image::load_from_memory_with_format(bytes, source_format)
        .map_err(|e| TransformError::Decode(e.to_string()))?;

    // Exact target size; aspect ratio is not preserved.
    let resized = img.resize_exact(spec.target_width, spec.target_height, FilterType::Triangle);
    let converted = match spec.color_mode {
        ColorMode::Grayscale => DynamicImage::ImageLuma8(resized.to_luma8()),
        ColorMode::Rgb => DynamicImage::ImageRgb8(resized.to_rgb8()),
    };

    let format = match spec.output {
        OutputFormat::SameAsSource => source_format,
        OutputFormat::Fixed(f) => f,
    };
    if !format.writing_enabled() {
        return Err(TransformError::UnsupportedFormat(format!("{format:?}")));
    }

    let mut out = Cursor::new(Vec::new());
    encodable_as(converted, format)
        .write_to(&mut out, format)
        .map_err(|e| TransformError::Encode(e.to_string()))?;
    Ok(out.into_inner())
}

/// The GIF encoder only takes RGB(A); gray pixels are widened with equal channels.
fn encodable_as(img: DynamicImage, format: ImageFormat) -> DynamicImage {
    match (format, img) {
        (ImageFormat::Gif, img @ DynamicImage::ImageLuma8(_)) => {
            DynamicImage::ImageRgba8(img.to_rgba8())
        }
        (_, img) => img,
    }
}
