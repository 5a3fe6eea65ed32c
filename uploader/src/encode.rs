use coffee_cam_common::frame::{EncodedImage, Frame, FrameError, PixelFormat};
use image::codecs::jpeg::JpegEncoder;
use image::{ExtendedColorType, ImageEncoder};
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    #[error("cannot encode frame: {0}")]
    InvalidFrame(#[from] FrameError),
    #[error("JPEG encoder failed: {0}")]
    Codec(#[from] image::ImageError),
}

/// Compress a raw frame to an in-memory JPEG.
///
/// `quality` is 0..=100; the codec's floor is 1, so 0 is clamped up.
pub fn encode(frame: &Frame, quality: u8) -> Result<EncodedImage, EncodeError> {
    frame.validate()?;

    let color = match frame.format {
        PixelFormat::Rgb8 | PixelFormat::Bgr8 => ExtendedColorType::Rgb8,
        PixelFormat::Luma8 => ExtendedColorType::L8,
    };
    let pixels = frame.to_encodable();

    let mut buffer = Vec::with_capacity(frame.expected_len() / 8);
    let encoder = JpegEncoder::new_with_quality(&mut buffer, quality.clamp(1, 100));
    encoder.write_image(&pixels, frame.width, frame.height, color)?;

    debug!(
        width = frame.width,
        height = frame.height,
        raw_bytes = frame.data.len(),
        jpeg_bytes = buffer.len(),
        quality,
        "frame encoded"
    );

    Ok(EncodedImage::jpeg(buffer, frame.width, frame.height))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GenericImageView, ImageReader};
    use std::io::Cursor;

    fn gradient(width: u32, height: u32, format: PixelFormat) -> Frame {
        let bpp = format.bytes_per_pixel();
        let mut data = Vec::with_capacity(width as usize * height as usize * bpp);
        for y in 0..height {
            for x in 0..width {
                for c in 0..bpp {
                    data.push(((x + y * 3 + c as u32 * 40) % 256) as u8);
                }
            }
        }
        Frame::new(width, height, format, data)
    }

    fn decode(bytes: &[u8]) -> image::DynamicImage {
        ImageReader::new(Cursor::new(bytes))
            .with_guessed_format()
            .unwrap()
            .decode()
            .unwrap()
    }

    #[test]
    fn reencoded_jpeg_keeps_dimensions() {
        let frame = gradient(320, 240, PixelFormat::Rgb8);
        let image = encode(&frame, 85).unwrap();
        assert_eq!(image.content_type, "image/jpeg");
        assert_eq!(&image.bytes[..2], &[0xFF, 0xD8]);
        assert_eq!(decode(&image.bytes).dimensions(), (320, 240));
        assert_eq!((image.width, image.height), (320, 240));
    }

    #[test]
    fn bgr_and_luma_frames_encode() {
        for format in [PixelFormat::Bgr8, PixelFormat::Luma8] {
            let frame = gradient(64, 48, format);
            let image = encode(&frame, 85).unwrap();
            assert_eq!(decode(&image.bytes).dimensions(), (64, 48));
        }
    }

    #[test]
    fn same_input_same_output() {
        let frame = gradient(32, 32, PixelFormat::Rgb8);
        let a = encode(&frame, 85).unwrap();
        let b = encode(&frame, 85).unwrap();
        assert_eq!(a.bytes, b.bytes);
    }

    #[test]
    fn lower_quality_is_smaller() {
        let frame = gradient(256, 256, PixelFormat::Rgb8);
        let high = encode(&frame, 95).unwrap();
        let low = encode(&frame, 10).unwrap();
        assert!(low.len() < high.len());
    }

    #[test]
    fn zero_quality_is_clamped() {
        let frame = gradient(16, 16, PixelFormat::Rgb8);
        assert!(encode(&frame, 0).is_ok());
    }

    #[test]
    fn malformed_frames_are_encode_errors() {
        let empty = Frame::new(0, 0, PixelFormat::Rgb8, vec![]);
        assert!(matches!(encode(&empty, 85), Err(EncodeError::InvalidFrame(_))));

        let short = Frame::new(10, 10, PixelFormat::Rgb8, vec![0; 10]);
        assert!(matches!(encode(&short, 85), Err(EncodeError::InvalidFrame(_))));
    }
}
