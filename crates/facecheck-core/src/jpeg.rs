//! Normalized image buffers: decode anything `image` understands, force RGB,
//! re-encode as JPEG.

use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, RgbImage};

/// Default JPEG quality for re-encoded buffers.
pub const DEFAULT_JPEG_QUALITY: u8 = 75;

/// An encoded RGB JPEG image.
///
/// Always produced from an 8-bit 3-channel image, so decoding `data`
/// yields RGB pixels of `width` × `height`.
#[derive(Clone, PartialEq, Eq)]
pub struct JpegImage {
    data: Vec<u8>,
    width: u32,
    height: u32,
}

impl std::fmt::Debug for JpegImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JpegImage")
            .field("bytes", &self.data.len())
            .field("width", &self.width)
            .field("height", &self.height)
            .finish()
    }
}

impl JpegImage {
    /// Decode arbitrary image bytes and re-encode them as RGB JPEG.
    ///
    /// Images with alpha, palette, grayscale, or 16-bit channels are
    /// converted to 8-bit RGB first.
    pub fn normalize(bytes: &[u8], quality: u8) -> Result<Self, image::ImageError> {
        let decoded = image::load_from_memory(bytes)?;
        let rgb = match decoded {
            DynamicImage::ImageRgb8(rgb) => rgb,
            other => {
                tracing::debug!(color = ?other.color(), "converting image to RGB");
                other.to_rgb8()
            }
        };
        Self::encode(&rgb, quality)
    }

    /// Encode an RGB image as JPEG.
    pub fn encode(rgb: &RgbImage, quality: u8) -> Result<Self, image::ImageError> {
        let mut data = Vec::new();
        JpegEncoder::new_with_quality(&mut data, quality.clamp(1, 100)).encode_image(rgb)?;
        Ok(Self {
            data,
            width: rgb.width(),
            height: rgb.height(),
        })
    }

    /// Decode back into RGB pixels.
    pub fn to_rgb(&self) -> Result<RgbImage, image::ImageError> {
        image::load_from_memory_with_format(&self.data, image::ImageFormat::Jpeg)
            .map(|img| img.to_rgb8())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, LumaA, Rgba, RgbaImage};
    use std::io::Cursor;

    fn png_bytes(img: DynamicImage) -> Vec<u8> {
        let mut out = Vec::new();
        img.write_to(&mut Cursor::new(&mut out), ImageFormat::Png).unwrap();
        out
    }

    #[test]
    fn test_normalize_rgba_png_to_rgb_jpeg() {
        let rgba = RgbaImage::from_pixel(8, 6, Rgba([200, 10, 10, 128]));
        let jpeg = JpegImage::normalize(&png_bytes(DynamicImage::ImageRgba8(rgba)), 75).unwrap();

        assert_eq!((jpeg.width(), jpeg.height()), (8, 6));
        // JPEG SOI marker
        assert_eq!(&jpeg.as_bytes()[..2], &[0xFF, 0xD8]);

        let decoded = image::load_from_memory(jpeg.as_bytes()).unwrap();
        assert_eq!(decoded.color(), image::ColorType::Rgb8);
    }

    #[test]
    fn test_normalize_grayscale_alpha() {
        let gray = image::ImageBuffer::from_pixel(4, 4, LumaA([90u8, 255]));
        let jpeg = JpegImage::normalize(&png_bytes(DynamicImage::ImageLumaA8(gray)), 75).unwrap();
        let rgb = jpeg.to_rgb().unwrap();
        assert_eq!(rgb.dimensions(), (4, 4));
    }

    #[test]
    fn test_normalize_rejects_non_image() {
        assert!(JpegImage::normalize(b"<html>not an image</html>", 75).is_err());
    }

    #[test]
    fn test_normalize_rejects_truncated_png() {
        let bytes = png_bytes(DynamicImage::new_rgb8(16, 16));
        assert!(JpegImage::normalize(&bytes[..bytes.len() / 2], 75).is_err());
    }
}
