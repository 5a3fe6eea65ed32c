/// Pixel layout of a raw [`Frame`] buffer. All formats are 8 bits per channel,
/// tightly packed, rows top to bottom.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    Rgb8,
    /// Channel order produced by many capture stacks; swizzled before encoding.
    Bgr8,
    Luma8,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Rgb8 | PixelFormat::Bgr8 => 3,
            PixelFormat::Luma8 => 1,
        }
    }
}

/// One raw captured image, before compression.
///
/// Owned by the driver for a single iteration and dropped once encoded.
#[derive(Debug, Clone)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub data: Vec<u8>,
    pub captured_at_ms: i64,
}

impl Frame {
    pub fn new(width: u32, height: u32, format: PixelFormat, data: Vec<u8>) -> Self {
        Self {
            width,
            height,
            format,
            data,
            captured_at_ms: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// Buffer length a well-formed frame of these dimensions must have.
    pub fn expected_len(&self) -> usize {
        self.width as usize * self.height as usize * self.format.bytes_per_pixel()
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0 || self.data.is_empty()
    }

    /// Check the buffer against the declared geometry.
    pub fn validate(&self) -> Result<(), FrameError> {
        if self.is_empty() {
            return Err(FrameError::Empty {
                width: self.width,
                height: self.height,
            });
        }
        let expected = self.expected_len();
        if self.data.len() != expected {
            return Err(FrameError::SizeMismatch {
                got: self.data.len(),
                expected,
            });
        }
        Ok(())
    }

    /// Pixel buffer converted to packed RGB (or left as luma), ready for a codec.
    pub fn to_encodable(&self) -> Vec<u8> {
        match self.format {
            PixelFormat::Bgr8 => self
                .data
                .chunks_exact(3)
                .flat_map(|px| [px[2], px[1], px[0]])
                .collect(),
            PixelFormat::Rgb8 | PixelFormat::Luma8 => self.data.clone(),
        }
    }
}

pub const JPEG_CONTENT_TYPE: &str = "image/jpeg";

/// Compressed image bytes plus the content type they are uploaded with.
#[derive(Debug, Clone)]
pub struct EncodedImage {
    pub bytes: Vec<u8>,
    pub content_type: &'static str,
    pub width: u32,
    pub height: u32,
}

impl EncodedImage {
    pub fn jpeg(bytes: Vec<u8>, width: u32, height: u32) -> Self {
        Self {
            bytes,
            content_type: JPEG_CONTENT_TYPE,
            width,
            height,
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("empty frame ({width}x{height})")]
    Empty { width: u32, height: u32 },
    #[error("frame buffer has {got} bytes, expected {expected}")]
    SizeMismatch { got: usize, expected: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn well_formed_frame_validates() {
        let frame = Frame::new(4, 2, PixelFormat::Rgb8, vec![0; 24]);
        assert_eq!(frame.expected_len(), 24);
        assert!(frame.validate().is_ok());
        assert!(frame.captured_at_ms > 0);
    }

    #[test]
    fn empty_frame_rejected() {
        let frame = Frame::new(0, 0, PixelFormat::Rgb8, vec![]);
        assert!(frame.is_empty());
        assert!(matches!(frame.validate(), Err(FrameError::Empty { .. })));

        let frame = Frame::new(640, 480, PixelFormat::Rgb8, vec![]);
        assert!(matches!(frame.validate(), Err(FrameError::Empty { .. })));
    }

    #[test]
    fn truncated_buffer_rejected() {
        let frame = Frame::new(4, 4, PixelFormat::Luma8, vec![0; 15]);
        match frame.validate() {
            Err(FrameError::SizeMismatch { got, expected }) => {
                assert_eq!(got, 15);
                assert_eq!(expected, 16);
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn bgr_swizzled_to_rgb() {
        let frame = Frame::new(2, 1, PixelFormat::Bgr8, vec![1, 2, 3, 4, 5, 6]);
        assert_eq!(frame.to_encodable(), vec![3, 2, 1, 6, 5, 4]);
    }

    #[test]
    fn encoded_image_is_tagged_jpeg() {
        let image = EncodedImage::jpeg(vec![0xFF, 0xD8], 1, 1);
        assert_eq!(image.content_type, "image/jpeg");
        assert_eq!(image.len(), 2);
        assert!(!image.is_empty());
    }
}
