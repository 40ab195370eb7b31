//! Pixel-level behaviour of mask generation and compositing

use image::{DynamicImage, GrayImage, Luma, Rgb, RgbImage};
use ndarray::Array4;
use rmbg_batch::compositing::{apply_alpha_mask, matte_to_mask, tensor_to_mask};

#[test]
fn test_two_by_two_alpha_exact() {
    let image = RgbImage::from_fn(2, 2, |x, y| Rgb([x as u8 * 100, y as u8 * 100, 7]));
    let mask = GrayImage::from_raw(2, 2, vec![0, 128, 255, 64]).unwrap();

    let rgba = apply_alpha_mask(&DynamicImage::ImageRgb8(image.clone()), &mask).unwrap();

    let alpha: Vec<u8> = rgba.pixels().map(|p| p.0[3]).collect();
    assert_eq!(alpha, vec![0, 128, 255, 64]);
    for (out, input) in rgba.pixels().zip(image.pixels()) {
        assert_eq!(out.0[..3], input.0);
    }
    assert_eq!(rgba.as_raw()[4 + 3], 128);
}

#[test]
fn test_mask_resized_to_original_dimensions() {
    let matte = Array4::from_shape_fn((1, 1, 16, 16), |(_, _, y, x)| ((x + y) % 2) as f32);
    let mask = tensor_to_mask(&matte, (37, 53)).unwrap();

    assert_eq!(mask.dimensions(), (37, 53));
    assert_eq!(mask.as_raw().len(), 37 * 53);

    let image = DynamicImage::new_rgb8(37, 53);
    let rgba = apply_alpha_mask(&image, &mask).unwrap();
    assert_eq!(rgba.pixels().count(), 37 * 53);
}

#[test]
fn test_matte_scaling_truncates_and_saturates() {
    let matte = Array4::from_shape_vec((1, 1, 1, 4), vec![0.0, 0.5, 1.0, 1.2]).unwrap();
    let mask = matte_to_mask(&matte).unwrap();
    assert_eq!(mask.as_raw(), &vec![0, 127, 255, 255]);
}

#[test]
fn test_mismatched_mask_rejected() {
    let image = DynamicImage::new_rgb8(3, 3);
    let mask = GrayImage::from_pixel(2, 2, Luma([255]));
    assert!(apply_alpha_mask(&image, &mask).is_err());
}
