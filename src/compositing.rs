//! Matte post-processing, alpha compositing and PNG data URL encoding

use crate::error::{BgRemovalError, Result};
use base64::{engine::general_purpose, Engine};
use image::{imageops::FilterType, DynamicImage, GrayImage, ImageFormat, RgbaImage};
use ndarray::Array4;
use std::io::Cursor;

const PNG_DATA_URL_PREFIX: &str = "data:image/png;base64,";

/// Convert a `[1, 1, H, W]` matte in `[0, 1]` into an 8-bit mask at model resolution
///
/// Values are scaled by 255 and truncated; out-of-range values saturate.
///
/// # Errors
/// - Tensor shape other than `[1, 1, H, W]`
pub fn matte_to_mask(matte: &Array4<f32>) -> Result<GrayImage> {
    let (batch, channels, height, width) = matte.dim();
    if batch != 1 || channels != 1 || height == 0 || width == 0 {
        return Err(BgRemovalError::processing(format!(
            "Invalid matte tensor shape {:?}, expected [1, 1, H, W]",
            matte.shape()
        )));
    }

    let pixels: Vec<u8> = matte
        .iter()
        .map(|value| (value * 255.0).clamp(0.0, 255.0) as u8)
        .collect();

    GrayImage::from_raw(width as u32, height as u32, pixels)
        .ok_or_else(|| BgRemovalError::processing("Matte buffer does not match its dimensions"))
}

/// Resize a mask to the original image dimensions with bilinear filtering
#[must_use]
pub fn resize_mask(mask: GrayImage, width: u32, height: u32) -> GrayImage {
    if mask.dimensions() == (width, height) {
        return mask;
    }
    image::imageops::resize(&mask, width, height, FilterType::Triangle)
}

/// Matte tensor to an alpha mask of the given dimensions
///
/// # Errors
/// - Invalid matte tensor shape
pub fn tensor_to_mask(matte: &Array4<f32>, dimensions: (u32, u32)) -> Result<GrayImage> {
    let mask = matte_to_mask(matte)?;
    Ok(resize_mask(mask, dimensions.0, dimensions.1))
}

/// Render `image` as RGBA and overwrite only its alpha channel with `mask`
///
/// Pixel `i` in row-major order receives `mask[i]` at byte offset `4*i+3`;
/// the RGB channels are left untouched.
///
/// # Errors
/// - Mask dimensions differ from the image dimensions
pub fn apply_alpha_mask(image: &DynamicImage, mask: &GrayImage) -> Result<RgbaImage> {
    let mut rgba = image.to_rgba8();
    if rgba.dimensions() != mask.dimensions() {
        return Err(BgRemovalError::processing_stage_error(
            "compositing",
            "mask dimensions differ from image dimensions",
            Some(&format!(
                "image {}x{}, mask {}x{}",
                rgba.width(),
                rgba.height(),
                mask.width(),
                mask.height()
            )),
        ));
    }

    for (pixel, alpha) in rgba.pixels_mut().zip(mask.as_raw()) {
        pixel.0[3] = *alpha;
    }

    Ok(rgba)
}

/// Encode an RGBA buffer as PNG bytes
///
/// # Errors
/// - PNG encoder failures
pub fn encode_png(image: &RgbaImage) -> Result<Vec<u8>> {
    let mut buffer = Cursor::new(Vec::new());
    image.write_to(&mut buffer, ImageFormat::Png)?;
    Ok(buffer.into_inner())
}

/// Wrap PNG bytes in a `data:image/png;base64,` URL
#[must_use]
pub fn png_data_url(png: &[u8]) -> String {
    format!(
        "{PNG_DATA_URL_PREFIX}{}",
        general_purpose::STANDARD.encode(png)
    )
}

/// Data URL for raw file bytes, typed by content sniffing
#[must_use]
pub fn bytes_to_data_url(bytes: &[u8]) -> String {
    let mime = image::guess_format(bytes)
        .map(|format| format.to_mime_type())
        .unwrap_or("application/octet-stream");
    format!(
        "data:{mime};base64,{}",
        general_purpose::STANDARD.encode(bytes)
    )
}

/// Decode the payload of a base64 data URL
///
/// # Errors
/// - Not a base64 data URL
/// - Invalid base64 payload
pub fn decode_data_url(url: &str) -> Result<Vec<u8>> {
    let payload = url
        .strip_prefix("data:")
        .and_then(|rest| rest.split_once(";base64,"))
        .map(|(_, payload)| payload)
        .ok_or_else(|| BgRemovalError::processing("Not a base64 data URL"))?;

    general_purpose::STANDARD
        .decode(payload)
        .map_err(|e| BgRemovalError::processing(format!("Invalid data URL payload: {e}")))
}

/// Approximate decoded size of a data URL: three quarters of its length
///
/// Includes the URL prefix, so it slightly overestimates the PNG byte count.
#[must_use]
pub fn estimate_encoded_size(data_url: &str) -> u64 {
    (data_url.len() as f64 * 0.75) as u64
}
