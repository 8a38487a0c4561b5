//! Header for raw pictures that travel through CPU-addressable buffers

use bytes::{Buf, BufMut};

use super::{CodecError, CodecResult};

/// Size of the serialized header in bytes.
pub const RAW_FRAME_HEADER_LEN: usize = 16;

/// Leading bytes of every decoded picture handed out on the buffer path.
///
/// Layout (little endian): width `u32`, height `u32`, presentation time `i64`.
/// The packed YUV 4:2:0 planes follow immediately after.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawFrameHeader {
    pub width: u32,
    pub height: u32,
    pub presentation_time_us: i64,
}

impl RawFrameHeader {
    pub fn new(width: u32, height: u32, presentation_time_us: i64) -> Self {
        Self {
            width,
            height,
            presentation_time_us,
        }
    }

    /// Writes the header into the first bytes of `buffer`.
    ///
    /// # Errors
    /// - `CodecError::BufferTooSmall` - `buffer` is shorter than the header
    pub fn write_to(&self, buffer: &mut [u8]) -> CodecResult<()> {
        if buffer.len() < RAW_FRAME_HEADER_LEN {
            return Err(CodecError::BufferTooSmall {
                needed: RAW_FRAME_HEADER_LEN,
                available: buffer.len(),
            });
        }

        let mut cursor = &mut buffer[..RAW_FRAME_HEADER_LEN];
        cursor.put_u32_le(self.width);
        cursor.put_u32_le(self.height);
        cursor.put_i64_le(self.presentation_time_us);
        Ok(())
    }

    /// Parses a header from the start of `buffer`.
    ///
    /// # Errors
    /// - `CodecError::BufferTooSmall` - `buffer` is shorter than the header
    pub fn read_from(buffer: &[u8]) -> CodecResult<Self> {
        if buffer.len() < RAW_FRAME_HEADER_LEN {
            return Err(CodecError::BufferTooSmall {
                needed: RAW_FRAME_HEADER_LEN,
                available: buffer.len(),
            });
        }

        let mut cursor = &buffer[..RAW_FRAME_HEADER_LEN];
        Ok(Self {
            width: cursor.get_u32_le(),
            height: cursor.get_u32_le(),
            presentation_time_us: cursor.get_i64_le(),
        })
    }

    /// Byte length of the packed YUV 4:2:0 planes for this picture size.
    pub fn yuv420_len(&self) -> usize {
        yuv420_len(self.width, self.height)
    }
}

/// Byte length of packed YUV 4:2:0 planes for a `width` x `height` picture.
pub fn yuv420_len(width: u32, height: u32) -> usize {
    let luma = width as usize * height as usize;
    let chroma = width.div_ceil(2) as usize * height.div_ceil(2) as usize;
    luma + 2 * chroma
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_layout_is_little_endian() {
        let mut buffer = [0u8; 20];
        RawFrameHeader::new(854, 480, 1_000_000)
            .write_to(&mut buffer)
            .unwrap();

        assert_eq!(&buffer[..4], &854u32.to_le_bytes());
        assert_eq!(&buffer[4..8], &480u32.to_le_bytes());
        assert_eq!(&buffer[8..16], &1_000_000i64.to_le_bytes());
        assert_eq!(
            RawFrameHeader::read_from(&buffer).unwrap(),
            RawFrameHeader::new(854, 480, 1_000_000)
        );
    }

    #[test]
    fn test_short_buffers_are_rejected() {
        let mut short = [0u8; 8];
        assert!(matches!(
            RawFrameHeader::new(2, 2, 0).write_to(&mut short),
            Err(CodecError::BufferTooSmall {
                needed: RAW_FRAME_HEADER_LEN,
                available: 8
            })
        ));
        assert!(RawFrameHeader::read_from(&short).is_err());
    }

    #[test]
    fn test_yuv420_len_rounds_chroma_up() {
        assert_eq!(yuv420_len(1920, 1080), 1920 * 1080 * 3 / 2);
        assert_eq!(yuv420_len(3, 3), 9 + 2 * 4);
    }
}
