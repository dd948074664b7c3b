//! Decoding of one image descriptor into a temporary RGBA raster.

use weezl::{decode::Decoder as LzwDecoder, BitOrder, LzwStatus};

use crate::common::{FrameRect, Raster};
use crate::error::Result;
use crate::memory::{AllocationTracker, Tracked};
use crate::reader::{DecodingError, DecodingFormatError, ImageDescriptor};

/// Row order of interlaced images: (first row, row step) for each pass.
const INTERLACE_PASSES: [(usize, usize); 4] = [(0, 8), (4, 8), (2, 4), (1, 2)];

/// Decodes the part of `desc` that is visible on a `canvas` sized screen when
/// the frame is drawn at `rect`.
///
/// The whole frame is decompressed one row at a time, but only the visible
/// rows and columns are kept, so memory follows the clipped area and not the
/// declared one. Returns `None` if no pixel is visible.
///
/// Pixels equal to `transparent` get alpha 0, all others alpha 255. Indices
/// past the end of the color table decode as opaque black.
pub(crate) fn decode_frame<'t>(
    desc: &ImageDescriptor<'_>,
    rect: FrameRect,
    canvas: (u32, u32),
    global_palette: Option<&[u8]>,
    transparent: Option<u8>,
    tracker: Option<&'t AllocationTracker>,
) -> Result<Option<Tracked<'t, Raster>>> {
    let palette = desc
        .local_palette
        .or(global_palette)
        .ok_or(DecodingFormatError::MissingColorPalette)?;

    let (_, _, visible_width, visible_height) = rect.clip(canvas.0, canvas.1);
    let (visible_width, visible_height) = (visible_width as usize, visible_height as usize);

    let mut row = Tracked::zeroed(tracker, usize::from(rect.width), "frame row buffer")?;
    let mut indices = Tracked::zeroed(
        tracker,
        visible_width * visible_height,
        "frame index buffer",
    )?;
    let mut rows = RowDecoder::new(desc);
    for y in row_order(usize::from(rect.height), desc.interlaced) {
        rows.fill(&mut row)?;
        if y < visible_height {
            let start = y * visible_width;
            indices[start..start + visible_width].copy_from_slice(&row[..visible_width]);
        }
    }
    if indices.is_empty() {
        return Ok(None);
    }

    let mut raster = Tracked::raster(tracker, visible_width as u32, visible_height as u32)?;
    for (dst, &index) in raster.pixels_mut().chunks_exact_mut(4).zip(indices.iter()) {
        if transparent == Some(index) {
            continue;
        }
        let i = usize::from(index) * 3;
        let rgb = palette.get(i..i + 3).unwrap_or(&[0, 0, 0]);
        dst.copy_from_slice(&[rgb[0], rgb[1], rgb[2], 0xFF]);
    }
    Ok(Some(raster))
}

/// Display row of every stored row, in storage order.
fn row_order(height: usize, interlaced: bool) -> impl Iterator<Item = usize> {
    let passes: &[(usize, usize)] = if interlaced {
        &INTERLACE_PASSES
    } else {
        &[(0, 1)]
    };
    passes
        .iter()
        .flat_map(move |&(start, step)| (start..height).step_by(step))
}

/// Decompresses the sub-blocks of one image a row at a time.
struct RowDecoder<'a, 'd> {
    decoder: LzwDecoder,
    blocks: core::slice::Iter<'a, &'d [u8]>,
    input: &'d [u8],
    done: bool,
}

impl<'a, 'd> RowDecoder<'a, 'd> {
    fn new(desc: &'a ImageDescriptor<'d>) -> Self {
        Self {
            decoder: LzwDecoder::new(BitOrder::Lsb, desc.min_code_size),
            blocks: desc.data.iter(),
            input: &[],
            done: false,
        }
    }

    /// Fills all of `row`, failing as soon as the data runs out.
    ///
    /// Data past the end code, or past the last row, is never read.
    fn fill(&mut self, row: &mut [u8]) -> core::result::Result<(), DecodingError> {
        let mut filled = 0;
        while filled < row.len() {
            if self.input.is_empty() && !self.done {
                if let Some(&block) = self.blocks.next() {
                    self.input = block;
                }
            }
            let result = self.decoder.decode_bytes(self.input, &mut row[filled..]);
            self.input = &self.input[result.consumed_in..];
            filled += result.consumed_out;
            match result.status {
                Ok(LzwStatus::Done) => self.done = true,
                Ok(LzwStatus::Ok | LzwStatus::NoProgress) => {}
                Err(_) => return Err(DecodingFormatError::CorruptImageData.into()),
            }
            if result.consumed_in == 0 && result.consumed_out == 0 {
                if self.done || self.blocks.len() == 0 {
                    return Err(DecodingFormatError::ImageDataTooShort.into());
                }
                self.input = &[];
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec::Vec;
    use weezl::encode::Encoder as LzwEncoder;

    const PALETTE: &[u8] = &[10, 20, 30, 40, 50, 60, 70, 80, 90, 100, 110, 120];

    fn descriptor(rect: FrameRect, interlaced: bool, data: &[u8]) -> ImageDescriptor<'_> {
        ImageDescriptor {
            rect,
            interlaced,
            local_palette: Some(PALETTE),
            min_code_size: 2,
            data: data.chunks(255).collect(),
        }
    }

    fn decode_clipped(
        indices: &[u8],
        rect: FrameRect,
        canvas: (u32, u32),
        interlaced: bool,
        trns: Option<u8>,
    ) -> Result<Option<Raster>> {
        let data = LzwEncoder::new(BitOrder::Lsb, 2).encode(indices).unwrap();
        let desc = descriptor(rect, interlaced, &data);
        let frame = decode_frame(&desc, rect, canvas, None, trns, None)?;
        Ok(frame.map(|raster| (*raster).clone()))
    }

    fn decode(
        indices: &[u8],
        width: u16,
        height: u16,
        interlaced: bool,
        trns: Option<u8>,
    ) -> Result<Raster> {
        let rect = FrameRect::full(width, height);
        let canvas = (u32::from(width), u32::from(height));
        decode_clipped(indices, rect, canvas, interlaced, trns).map(|frame| frame.unwrap())
    }

    #[test]
    fn expands_palette_and_transparency() {
        let raster = decode(&[0, 1, 2, 3], 2, 2, false, Some(2)).unwrap();
        assert_eq!(raster.pixel(0, 0), Some([10, 20, 30, 255]));
        assert_eq!(raster.pixel(1, 0), Some([40, 50, 60, 255]));
        assert_eq!(raster.pixel(0, 1), Some([0, 0, 0, 0]));
        assert_eq!(raster.pixel(1, 1), Some([100, 110, 120, 255]));
    }

    #[test]
    fn deinterlaces_rows() {
        // Rows stored in pass order 0, 4, 2, 1, 3 for a 5 row image.
        let stored = [0, 3, 1, 2, 1];
        let raster = decode(&stored, 1, 5, true, None).unwrap();
        let rows: Vec<u8> = (0..5).map(|y| raster.pixel(0, y).unwrap()[0]).collect();
        assert_eq!(rows, [10, 70, 40, 40, 100]);
    }

    #[test]
    fn keeps_only_the_visible_area() {
        let indices: Vec<u8> = (0..16).map(|i| i % 4).collect();
        let rect = FrameRect::full(4, 4);
        let raster = decode_clipped(&indices, rect, (2, 3), false, None)
            .unwrap()
            .unwrap();
        assert_eq!((raster.width(), raster.height()), (2, 3));
        assert_eq!(raster.pixel(1, 2), Some([40, 50, 60, 255]));

        let offset = FrameRect {
            left: 1,
            top: 0,
            width: 1,
            height: 5,
        };
        let raster = decode_clipped(&[0, 3, 1, 2, 1], offset, (2, 2), true, None)
            .unwrap()
            .unwrap();
        assert_eq!((raster.width(), raster.height()), (1, 2));
        assert_eq!(raster.pixel(0, 1), Some([70, 80, 90, 255]));
    }

    #[test]
    fn invisible_frames_are_still_validated() {
        let rect = FrameRect {
            left: 5,
            top: 5,
            width: 2,
            height: 2,
        };
        let visible = decode_clipped(&[1; 4], rect, (2, 2), false, None).unwrap();
        assert_eq!(visible, None);
        let err = decode_clipped(&[1; 3], rect, (2, 2), false, None).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::DecodeFailed);
    }

    #[test]
    fn short_data_is_rejected() {
        let err = decode(&[0, 1, 2], 2, 2, false, None).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::DecodeFailed);
    }

    #[test]
    fn huge_declared_frame_fails_within_one_row() {
        let tracker = AllocationTracker::new();
        // Clear, index 1, end: a single pixel of data.
        let data = [0x4C, 0x01];
        let rect = FrameRect::full(u16::MAX, u16::MAX);
        let desc = descriptor(rect, false, &data);
        let err = decode_frame(&desc, rect, (1, 1), None, None, Some(&tracker)).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::DecodeFailed);
        assert_eq!(tracker.peak(), usize::from(u16::MAX) + 1);
        assert_eq!(tracker.outstanding(), 0);
    }

    #[test]
    fn missing_palette_is_rejected() {
        let data = LzwEncoder::new(BitOrder::Lsb, 2).encode(&[0; 4]).unwrap();
        let rect = FrameRect::full(2, 2);
        let desc = ImageDescriptor {
            local_palette: None,
            ..descriptor(rect, false, &data)
        };
        assert!(decode_frame(&desc, rect, (2, 2), None, None, None).is_err());
    }

    #[test]
    fn garbage_is_corrupt() {
        let rect = FrameRect::full(4, 4);
        let desc = descriptor(rect, false, &[0xFF, 0xFF, 0xFF, 0xFF]);
        let err = decode_frame(&desc, rect, (4, 4), None, None, None).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::DecodeFailed);
    }
}
