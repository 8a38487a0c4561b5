//! Picture conversion between FFmpeg frames and packed raw buffers

use std::borrow::Cow;

use ffmpeg_next as ffmpeg;
use ffmpeg::format::Pixel;
use ffmpeg::software::scaling::{Context as Scaler, Flags as ScaleFlags};
use ffmpeg::util::frame::Video as VideoFrame;

use super::{Owned, platform_error};
use crate::codec::{
    CodecError, CodecResult, CropRect, RAW_FRAME_HEADER_LEN, RawFrameHeader, yuv420_len,
};

/// Width and height of plane `plane` of a 4:2:0 picture.
fn plane_size(plane: usize, width: u32, height: u32) -> (usize, usize) {
    if plane == 0 {
        (width as usize, height as usize)
    } else {
        (width.div_ceil(2) as usize, height.div_ceil(2) as usize)
    }
}

/// Serializes a YUV420P frame as raw header plus packed planes.
///
/// # Errors
/// - `CodecError::Platform` - `frame` is not planar 4:2:0
pub(crate) fn pack_yuv420(frame: &VideoFrame, presentation_time_us: i64) -> CodecResult<Vec<u8>> {
    if frame.format() != Pixel::YUV420P {
        return Err(CodecError::Platform {
            reason: format!("Cannot pack {:?} as yuv420p", frame.format()),
        });
    }

    let header = RawFrameHeader::new(frame.width(), frame.height(), presentation_time_us);
    let mut out = vec![0u8; RAW_FRAME_HEADER_LEN + header.yuv420_len()];
    header.write_to(&mut out)?;

    let mut cursor = RAW_FRAME_HEADER_LEN;
    for plane in 0..3 {
        let (width, height) = plane_size(plane, frame.width(), frame.height());
        let stride = frame.stride(plane);
        let data = frame.data(plane);
        for row in 0..height {
            let start = row * stride;
            out[cursor..cursor + width].copy_from_slice(&data[start..start + width]);
            cursor += width;
        }
    }
    Ok(out)
}

/// Rebuilds a YUV420P frame from a raw header and packed planes.
///
/// # Errors
/// - `CodecError::BufferTooSmall` - `data` is shorter than its header claims
pub(crate) fn unpack_yuv420(data: &[u8]) -> CodecResult<(VideoFrame, i64)> {
    let header = RawFrameHeader::read_from(data)?;
    let needed = RAW_FRAME_HEADER_LEN + yuv420_len(header.width, header.height);
    if data.len() < needed {
        return Err(CodecError::BufferTooSmall {
            needed,
            available: data.len(),
        });
    }

    let mut frame = VideoFrame::new(Pixel::YUV420P, header.width, header.height);
    let mut cursor = RAW_FRAME_HEADER_LEN;
    for plane in 0..3 {
        let (width, height) = plane_size(plane, header.width, header.height);
        let stride = frame.stride(plane);
        let target = frame.data_mut(plane);
        for row in 0..height {
            let start = row * stride;
            target[start..start + width].copy_from_slice(&data[cursor..cursor + width]);
            cursor += width;
        }
    }
    Ok((frame, header.presentation_time_us))
}

/// Copies the `crop` region out of a YUV420P frame. Offsets are rounded
/// down to even values to keep chroma aligned.
fn crop_yuv420(frame: &VideoFrame, crop: CropRect) -> CodecResult<VideoFrame> {
    let x = crop.x & !1;
    let y = crop.y & !1;
    let width = crop.width.min(frame.width().saturating_sub(x)) & !1;
    let height = crop.height.min(frame.height().saturating_sub(y)) & !1;
    if width == 0 || height == 0 {
        return Err(CodecError::Configuration {
            reason: format!(
                "Crop {}x{}+{}+{} is outside the {}x{} picture",
                crop.width,
                crop.height,
                crop.x,
                crop.y,
                frame.width(),
                frame.height()
            ),
        });
    }

    let mut out = VideoFrame::new(Pixel::YUV420P, width, height);
    for plane in 0..3 {
        let (plane_width, plane_height) = plane_size(plane, width, height);
        let (offset_x, offset_y) = if plane == 0 {
            (x as usize, y as usize)
        } else {
            ((x / 2) as usize, (y / 2) as usize)
        };
        let source_stride = frame.stride(plane);
        let target_stride = out.stride(plane);
        let source = frame.data(plane);
        let target = out.data_mut(plane);
        for row in 0..plane_height {
            let from = (offset_y + row) * source_stride + offset_x;
            let to = row * target_stride;
            target[to..to + plane_width].copy_from_slice(&source[from..from + plane_width]);
        }
    }
    out.set_pts(frame.pts());
    Ok(out)
}

#[derive(Clone, Copy, PartialEq, Eq)]
struct ScaleKey {
    source: (Pixel, u32, u32),
    target: (Pixel, u32, u32),
}

/// Cached software scaler, rebuilt whenever the source or target changes.
#[derive(Default)]
pub(crate) struct Converter {
    scaler: Option<(ScaleKey, Owned<Scaler>)>,
}

impl Converter {
    /// Converts `frame` into `format` at `width` x `height`, borrowing it
    /// when it already matches.
    ///
    /// # Errors
    /// - `CodecError::Platform` - The scaler could not be built or failed
    pub(crate) fn convert<'f>(
        &mut self,
        frame: &'f VideoFrame,
        format: Pixel,
        width: u32,
        height: u32,
    ) -> CodecResult<Cow<'f, VideoFrame>> {
        if frame.format() == format && frame.width() == width && frame.height() == height {
            return Ok(Cow::Borrowed(frame));
        }

        let key = ScaleKey {
            source: (frame.format(), frame.width(), frame.height()),
            target: (format, width, height),
        };
        if self.scaler.as_ref().is_none_or(|(cached, _)| *cached != key) {
            let scaler = Scaler::get(
                frame.format(),
                frame.width(),
                frame.height(),
                format,
                width,
                height,
                ScaleFlags::BILINEAR,
            )
            .map_err(|e| platform_error("creating scaler", e))?;
            self.scaler = Some((key, Owned(scaler)));
        }

        let mut out = VideoFrame::empty();
        if let Some((_, scaler)) = self.scaler.as_mut() {
            scaler
                .run(frame, &mut out)
                .map_err(|e| platform_error("scaling frame", e))?;
        }
        out.set_pts(frame.pts());
        Ok(Cow::Owned(out))
    }

    /// Crops (when asked) and scales a decoded picture for an encoder.
    ///
    /// # Errors
    /// - `CodecError::Configuration` - The crop lies outside the picture
    /// - `CodecError::Platform` - Scaling failed
    pub(crate) fn prepare(
        &mut self,
        frame: &VideoFrame,
        crop: Option<CropRect>,
        format: Pixel,
        width: u32,
        height: u32,
    ) -> CodecResult<VideoFrame> {
        let cropped = match crop {
            Some(crop) => {
                let planar = self
                    .convert(frame, Pixel::YUV420P, frame.width(), frame.height())?
                    .into_owned();
                Cow::Owned(crop_yuv420(&planar, crop)?)
            }
            None => Cow::Borrowed(frame),
        };
        Ok(self.convert(&cropped, format, width, height)?.into_owned())
    }
}
