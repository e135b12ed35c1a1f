use std::io::Cursor;

use anyhow::{Context, Result};
use base64::{prelude::BASE64_STANDARD, Engine};
use candle_core::utils::{cuda_is_available, metal_is_available};
use candle_core::{DType, Device, Tensor};
use image::{codecs::jpeg::JpegEncoder, imageops::FilterType, DynamicImage};
use tracing::warn;

use crate::DeviceMap;

/// Quality used for the transported JPEG, matching the usual PIL default.
pub const JPEG_QUALITY: u8 = 75;

pub fn select_best_device(device_map: DeviceMap) -> Result<Device> {
    match device_map {
        DeviceMap::ForceCpu => Ok(Device::Cpu),
        DeviceMap::Ordinal(ordinal) if cuda_is_available() => Ok(Device::new_cuda(ordinal)?),
        DeviceMap::Ordinal(ordinal) if metal_is_available() => Ok(Device::new_metal(ordinal)?),
        DeviceMap::Ordinal(_) => {
            #[cfg(all(target_os = "macos", target_arch = "aarch64"))]
            {
                warn!("running on CPU, to run on GPU(metal) build with `--features metal`");
            }
            #[cfg(not(all(target_os = "macos", target_arch = "aarch64")))]
            {
                warn!("running on CPU, to run on GPU build with `--features cuda`");
            }
            Ok(Device::Cpu)
        }
    }
}

/// Converts a u8 tensor with shape (3, height, width) into an RGB image.
pub fn tensor_to_image(img: &Tensor) -> Result<DynamicImage> {
    let (channels, height, width) = img.dims3()?;
    if channels != 3 {
        anyhow::bail!("tensor_to_image expects an image with 3 channels, got {channels}");
    }
    let img = img.permute((1, 2, 0))?.flatten_all()?;
    let pixels = img.to_vec1::<u8>()?;
    let buffer = image::ImageBuffer::from_raw(width as u32, height as u32, pixels)
        .ok_or_else(|| candle_core::Error::msg("error converting tensor to image buffer"))?;
    Ok(DynamicImage::ImageRgb8(buffer))
}

/// Resizes `img` to fill `width` x `height` and returns a (1, 3, height, width)
/// f32 tensor on the CPU with values in [-1, 1].
pub fn image_to_tensor(img: &DynamicImage, width: usize, height: usize) -> Result<Tensor> {
    let pixels = img
        .resize_to_fill(width as u32, height as u32, FilterType::CatmullRom)
        .to_rgb8()
        .into_raw();
    let tensor = Tensor::from_vec(pixels, (height, width, 3), &Device::Cpu)?
        .permute((2, 0, 1))?
        .to_dtype(DType::F32)?
        .affine(2. / 255., -1.)?
        .unsqueeze(0)?;
    Ok(tensor)
}

/// Decodes a base64 image (optionally wrapped in a `data:` URL) into RGB.
/// Line breaks inside the payload, as in MIME-wrapped base64, are ignored.
pub fn decode_reference_image(encoded: &str) -> Result<DynamicImage> {
    let payload = match encoded.split_once(',') {
        Some((header, data)) if header.starts_with("data:") => data,
        _ => encoded,
    };
    let payload: String = payload
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .collect();
    let bytes = BASE64_STANDARD
        .decode(payload)
        .context("reference image is not valid base64")?;
    let img = image::load_from_memory(&bytes).context("unrecognized reference image data")?;
    Ok(DynamicImage::ImageRgb8(img.to_rgb8()))
}

/// Encodes an image as JPEG and wraps it in standard base64.
pub fn encode_jpeg_base64(img: &DynamicImage) -> image::ImageResult<String> {
    let mut bytes = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(Cursor::new(&mut bytes), JPEG_QUALITY);
    encoder.encode_image(&img.to_rgb8())?;
    Ok(BASE64_STANDARD.encode(&bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GenericImageView, ImageFormat, Rgba, RgbaImage};

    fn png_base64(width: u32, height: u32) -> String {
        let img = RgbaImage::from_pixel(width, height, Rgba([200, 40, 10, 128]));
        let mut bytes = Vec::new();
        DynamicImage::ImageRgba8(img)
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        BASE64_STANDARD.encode(bytes)
    }

    #[test]
    fn decodes_png_into_rgb() {
        let img = decode_reference_image(&png_base64(16, 8)).unwrap();
        assert_eq!(img.dimensions(), (16, 8));
        assert!(matches!(img, DynamicImage::ImageRgb8(_)));
    }

    #[test]
    fn accepts_data_url_prefix() {
        let url = format!("data:image/png;base64,{}", png_base64(4, 4));
        assert_eq!(decode_reference_image(&url).unwrap().dimensions(), (4, 4));
    }

    #[test]
    fn accepts_line_wrapped_base64() {
        let encoded = png_base64(24, 24);
        let wrapped = encoded
            .as_bytes()
            .chunks(32)
            .map(|line| std::str::from_utf8(line).unwrap())
            .collect::<Vec<_>>()
            .join("\n")
            + "\n";
        assert!(wrapped.matches('\n').count() > 1);
        assert_eq!(decode_reference_image(&wrapped).unwrap().dimensions(), (24, 24));
    }

    #[test]
    fn rejects_garbage() {
        assert!(decode_reference_image("not base64 at all!").is_err());
        let not_an_image = BASE64_STANDARD.encode(b"plain text");
        assert!(decode_reference_image(&not_an_image).is_err());
    }

    #[test]
    fn jpeg_output_keeps_dimensions() {
        let img = DynamicImage::new_rgb8(64, 32);
        let encoded = encode_jpeg_base64(&img).unwrap();
        let bytes = BASE64_STANDARD.decode(encoded).unwrap();
        assert_eq!(image::guess_format(&bytes).unwrap(), ImageFormat::Jpeg);
        let decoded = image::load_from_memory(&bytes).unwrap();
        assert_eq!(decoded.dimensions(), (64, 32));
    }

    #[test]
    fn image_tensor_is_scaled_to_unit_range() {
        let img = DynamicImage::ImageRgb8(image::RgbImage::from_pixel(
            10,
            10,
            image::Rgb([255, 0, 255]),
        ));
        let t = image_to_tensor(&img, 8, 16).unwrap();
        assert_eq!(t.dims(), &[1, 3, 16, 8]);
        let values = t.flatten_all().unwrap().to_vec1::<f32>().unwrap();
        assert!(values.iter().all(|v| v.abs() <= 1.0 + 1e-5));
    }

    #[test]
    fn tensor_round_trips_to_image() {
        let t = Tensor::zeros((3, 5, 7), DType::U8, &Device::Cpu).unwrap();
        let img = tensor_to_image(&t).unwrap();
        assert_eq!(img.dimensions(), (7, 5));

        let bad = Tensor::zeros((4, 5, 7), DType::U8, &Device::Cpu).unwrap();
        assert!(tensor_to_image(&bad).is_err());
    }
}
