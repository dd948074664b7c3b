//! # Minimal single-frame gif encoder

use alloc::vec::Vec;
use core::fmt;
use std::io::{self, Write};

use weezl::{encode::Encoder as LzwEncoder, BitOrder};

use crate::common::{Block, Extension};
use crate::quantize::QuantizedRaster;
use crate::traits::WriteBytesExt;

/// The image has incorrect properties, making it impossible to encode as a gif.
#[derive(Debug)]
#[non_exhaustive]
pub enum EncodingFormatError {
    /// The image has too many colors.
    TooManyColors,
    /// The image has no color palette which is required.
    MissingColorPalette,
    /// LZW data is not valid for GIF.
    InvalidMinCodeSize,
    /// A second frame was written; only still images are supported.
    AnimationUnsupported,
}

impl core::error::Error for EncodingFormatError {}
impl fmt::Display for EncodingFormatError {
    #[cold]
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooManyColors => write!(fmt, "the image has too many colors"),
            Self::MissingColorPalette => write!(
                fmt,
                "the GIF format requires a color palette but none was given"
            ),
            Self::InvalidMinCodeSize => write!(fmt, "LZW data is invalid"),
            Self::AnimationUnsupported => {
                write!(
                    fmt,
                    "animated GIF output is not supported; only one frame can be written"
                )
            }
        }
    }
}

/// Encoding error.
#[derive(Debug)]
#[non_exhaustive]
pub enum EncodingError {
    /// Frame buffer is too small for the declared dimensions.
    FrameBufferTooSmallForDimensions,
    /// Failed to internally allocate a buffer of sufficient size.
    OutOfMemory,
    /// Expected a writer but none found.
    WriterNotFound,
    /// Returned if the to image is not encodable as a gif.
    Format(EncodingFormatError),
    /// Wraps an I/O error.
    Io(io::Error),
}

impl fmt::Display for EncodingError {
    #[cold]
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FrameBufferTooSmallForDimensions => {
                fmt.write_str("Frame Buffer Too Small for Dimensions")
            }
            Self::OutOfMemory => fmt.write_str("Out of Memory"),
            Self::WriterNotFound => fmt.write_str("Writer Not Found"),
            Self::Io(err) => err.fmt(fmt),
            Self::Format(err) => err.fmt(fmt),
        }
    }
}

impl core::error::Error for EncodingError {
    #[cold]
    fn source(&self) -> Option<&(dyn core::error::Error + 'static)> {
        match self {
            Self::FrameBufferTooSmallForDimensions => None,
            Self::OutOfMemory => None,
            Self::WriterNotFound => None,
            Self::Io(err) => Some(err),
            Self::Format(err) => Some(err),
        }
    }
}

impl From<io::Error> for EncodingError {
    #[cold]
    fn from(err: io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<EncodingFormatError> for EncodingError {
    #[cold]
    fn from(err: EncodingFormatError) -> Self {
        Self::Format(err)
    }
}

/// An indexed image handed to [`Encoder::write_frame`].
#[derive(Debug, Clone, Copy)]
pub struct IndexedFrame<'a> {
    /// Width of the frame.
    pub width: u16,
    /// Height of the frame.
    pub height: u16,
    /// One palette index per pixel, row by row.
    pub buffer: &'a [u8],
    /// Palette index that is not drawn.
    pub transparent: Option<u8>,
}

impl<'a> From<&'a QuantizedRaster<'_>> for IndexedFrame<'a> {
    fn from(raster: &'a QuantizedRaster<'_>) -> Self {
        Self {
            width: raster.width,
            height: raster.height,
            buffer: &raster.indices,
            transparent: raster.transparent,
        }
    }
}

/// Still-image GIF encoder.
///
/// Writes the header and global color table on creation, exactly one frame,
/// and the trailer on [`into_inner`](Self::into_inner) or drop.
pub struct Encoder<W: Write> {
    w: Option<W>,
    width: u16,
    height: u16,
    frame_written: bool,
    buffer: Vec<u8>,
}

impl<W: Write> Encoder<W> {
    /// Creates a new encoder.
    ///
    /// `global_palette` gives the global color palette in the format `[r, g, b, ...]`.
    /// It must hold at least one color since frames carry no local table.
    pub fn new(
        w: W,
        width: u16,
        height: u16,
        global_palette: &[u8],
    ) -> Result<Self, EncodingError> {
        Self {
            w: Some(w),
            width,
            height,
            frame_written: false,
            buffer: Vec::new(),
        }
        .write_global_palette(global_palette)
    }

    /// Writes the global color palette.
    fn write_global_palette(mut self, palette: &[u8]) -> Result<Self, EncodingError> {
        if palette.len() < 3 {
            return Err(EncodingFormatError::MissingColorPalette.into());
        }
        let (palette, padding, table_size) = Self::check_color_table(palette)?;
        // Global table present, 8 bits of color resolution, unsorted.
        let flags = 0b1000_0000 | 0b0111_0000 | table_size;
        self.write_screen_desc(flags)?;
        Self::write_color_table(self.writer()?, palette, padding)?;
        Ok(self)
    }

    /// Writes the single frame of the image at the origin.
    ///
    /// A graphics control extension is written only when the frame has a
    /// transparent index. Calling this twice fails with
    /// [`EncodingFormatError::AnimationUnsupported`].
    pub fn write_frame(&mut self, frame: &IndexedFrame<'_>) -> Result<(), EncodingError> {
        if self.frame_written {
            return Err(EncodingFormatError::AnimationUnsupported.into());
        }
        if usize::from(frame.width)
            .checked_mul(usize::from(frame.height))
            .map_or(true, |size| frame.buffer.len() < size)
        {
            return Err(EncodingError::FrameBufferTooSmallForDimensions);
        }
        if let Some(trns) = frame.transparent {
            self.write_control_ext(0, trns)?;
        }
        self.write_frame_header(frame)?;
        let len = usize::from(frame.width) * usize::from(frame.height);
        self.write_image_block(&frame.buffer[..len])?;
        self.frame_written = true;
        Ok(())
    }

    fn write_frame_header(&mut self, frame: &IndexedFrame<'_>) -> Result<(), EncodingError> {
        let writer = self.writer()?;
        writer.write_le(Block::Image as u8)?;
        writer.write_le(0u16)?;
        writer.write_le(0u16)?;
        writer.write_le(frame.width)?;
        writer.write_le(frame.height)?;
        // No local color table, not interlaced.
        writer.write_le(0u8)?;
        Ok(())
    }

    fn write_image_block(&mut self, data: &[u8]) -> Result<(), EncodingError> {
        self.buffer.clear();
        self.buffer
            .try_reserve(data.len() / 4)
            .map_err(|_| EncodingError::OutOfMemory)?;
        lzw_encode(data, &mut self.buffer);

        let writer = self.w.as_mut().ok_or(EncodingError::WriterNotFound)?;
        Self::write_encoded_image_block(writer, &self.buffer)
    }

    fn write_encoded_image_block(
        writer: &mut W,
        data_with_min_code_size: &[u8],
    ) -> Result<(), EncodingError> {
        let (&min_code_size, data) = data_with_min_code_size.split_first().unwrap_or((&2, &[]));
        if !(2..=11).contains(&min_code_size) {
            return Err(EncodingFormatError::InvalidMinCodeSize.into());
        }
        writer.write_le(min_code_size)?;

        let mut iter = data.chunks_exact(0xFF);
        for full_block in iter.by_ref() {
            writer.write_le(0xFFu8)?;
            writer.write_all(full_block)?;
        }
        let last_block = iter.remainder();
        if !last_block.is_empty() {
            writer.write_le(last_block.len() as u8)?;
            writer.write_all(last_block)?;
        }
        writer.write_le(0u8)?;
        Ok(())
    }

    fn write_color_table(
        writer: &mut W,
        table: &[u8],
        padding: usize,
    ) -> Result<(), EncodingError> {
        writer.write_all(table)?;
        for _ in 0..padding {
            writer.write_all(&[0, 0, 0])?;
        }
        Ok(())
    }

    fn check_color_table(table: &[u8]) -> Result<(&[u8], usize, u8), EncodingError> {
        let num_colors = table.len() / 3;
        if num_colors > 256 {
            return Err(EncodingError::from(EncodingFormatError::TooManyColors));
        }
        let table_size = flag_size(num_colors);
        let padding = (2 << table_size) - num_colors;
        Ok((&table[..num_colors * 3], padding, table_size))
    }

    /// Writes a graphics control extension with the transparency flag set and
    /// the disposal left unspecified.
    fn write_control_ext(&mut self, delay: u16, trns: u8) -> Result<(), EncodingError> {
        let flags = 1u8;
        let writer = self.writer()?;
        writer.write_le(Block::Extension as u8)?;
        writer.write_le(Extension::Control as u8)?;
        writer.write_le(4u8)?;
        writer.write_le(flags)?;
        writer.write_le(delay)?;
        writer.write_le(trns)?;
        writer.write_le(0u8)?;
        Ok(())
    }

    fn write_screen_desc(&mut self, flags: u8) -> Result<(), EncodingError> {
        let width = self.width;
        let height = self.height;
        let writer = self.writer()?;
        writer.write_all(b"GIF89a")?;
        writer.write_le(width)?;
        writer.write_le(height)?;
        writer.write_le(flags)?;
        writer.write_le(0u8)?;
        writer.write_le(0u8)?;
        Ok(())
    }

    /// Finishes writing, and returns the `io::Write` instance used by this encoder
    pub fn into_inner(mut self) -> Result<W, EncodingError> {
        self.write_trailer()?;
        self.w.take().ok_or(EncodingError::WriterNotFound)
    }

    fn write_trailer(&mut self) -> Result<(), EncodingError> {
        self.writer()?.write_le(Block::Trailer as u8)?;
        Ok(())
    }

    #[inline]
    fn writer(&mut self) -> Result<&mut W, EncodingError> {
        self.w.as_mut().ok_or(EncodingError::WriterNotFound)
    }
}

impl<W: Write> Drop for Encoder<W> {
    fn drop(&mut self) {
        if self.w.is_some() {
            let _ = self.write_trailer();
        }
    }
}

/// Serializes `raster` as a complete single-frame GIF89a file.
pub fn write_static_gif(raster: &QuantizedRaster<'_>) -> Result<Vec<u8>, EncodingError> {
    let mut out = Vec::new();
    out.try_reserve(raster.indices.len() / 2 + 800)
        .map_err(|_| EncodingError::OutOfMemory)?;
    let mut encoder = Encoder::new(out, raster.width, raster.height, raster.palette.as_rgb())?;
    encoder.write_frame(&IndexedFrame::from(raster))?;
    encoder.into_inner()
}

/// Encodes the data into the provided buffer.
///
/// The first byte is the minimum code size, followed by LZW data.
fn lzw_encode(data: &[u8], buffer: &mut Vec<u8>) {
    let mut max_byte = 0;
    for &byte in data {
        if byte > max_byte {
            max_byte = byte;
            if byte > 127 {
                break;
            }
        }
    }
    let palette_min_len = u32::from(max_byte) + 1;
    let min_code_size = palette_min_len.max(4).next_power_of_two().trailing_zeros() as u8;
    buffer.push(min_code_size);
    let mut enc = LzwEncoder::new(BitOrder::Lsb, min_code_size);
    let len = enc.into_vec(buffer).encode_all(data).consumed_out;
    buffer.truncate(len + 1);
}

// Color table size converted to flag bits
fn flag_size(size: usize) -> u8 {
    (size.clamp(2, 255).next_power_of_two().trailing_zeros() - 1) as u8
}

#[test]
fn test_flag_size() {
    #[rustfmt::skip]
    fn expected(size: usize) -> u8 {
        match size {
            0  ..=2   => 0,
            3  ..=4   => 1,
            5  ..=8   => 2,
            9  ..=16  => 3,
            17 ..=32  => 4,
            33 ..=64  => 5,
            65 ..=128 => 6,
            129..=256 => 7,
            _ => 7
        }
    }

    for i in 0..300 {
        assert_eq!(flag_size(i), expected(i));
    }
}

#[test]
fn error_cast() {
    use alloc::boxed::Box;
    let _: Box<dyn core::error::Error> =
        EncodingError::from(EncodingFormatError::AnimationUnsupported).into();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::EncodingFormatError::{AnimationUnsupported, MissingColorPalette};
    use crate::quantize::{quantize, Palette, TRANSPARENT_INDEX};
    use crate::reader::{Record, RecordReader};
    use crate::Raster;

    fn two_by_two(alpha: u8) -> Vec<u8> {
        let pixels = [0, 0, 255, 255, 255, 255, 255, alpha].repeat(2);
        let raster = Raster::from_rgba(2, 2, pixels).unwrap();
        let palette = Palette::fixed();
        write_static_gif(&quantize(&raster, &palette).unwrap()).unwrap()
    }

    #[test]
    fn writes_screen_and_global_table() {
        let gif = two_by_two(255);
        assert_eq!(&gif[..6], b"GIF89a");
        assert_eq!(&gif[6..10], [2, 0, 2, 0]);
        assert_eq!(gif[10], 0b1111_0111);
        assert_eq!(*gif.last().unwrap(), Block::Trailer as u8);

        let reader = RecordReader::new(&gif).unwrap();
        let palette = reader.screen().global_palette.clone().unwrap();
        assert_eq!(palette.len(), 768);
        assert_eq!(&palette[180 * 3..181 * 3], [255, 0, 0]);
    }

    #[test]
    fn control_extension_only_with_transparency() {
        let opaque = two_by_two(255);
        let records: Vec<_> = RecordReader::new(&opaque)
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(records.len(), 1);
        assert!(matches!(records[0], Record::ImageDescriptor(_)));

        let clear = two_by_two(0);
        let records: Vec<_> = RecordReader::new(&clear).unwrap().collect::<Result<_, _>>().unwrap();
        assert_eq!(records.len(), 2);
        let Record::Extension(ext) = &records[0] else {
            panic!("expected control extension");
        };
        assert_eq!(ext.label, Extension::Control as u8);
        assert_eq!(ext.sub_blocks[0], [1, 0, 0, TRANSPARENT_INDEX]);
    }

    #[test]
    fn refuses_second_frame() {
        let indices = [0u8; 4];
        let frame = IndexedFrame {
            width: 2,
            height: 2,
            buffer: &indices,
            transparent: None,
        };
        let mut encoder = Encoder::new(Vec::new(), 2, 2, Palette::fixed().as_rgb()).unwrap();
        encoder.write_frame(&frame).unwrap();
        assert!(matches!(
            encoder.write_frame(&frame),
            Err(EncodingError::Format(AnimationUnsupported))
        ));
    }

    #[test]
    fn short_buffer_is_rejected() {
        let frame = IndexedFrame {
            width: 4,
            height: 4,
            buffer: &[0; 3],
            transparent: None,
        };
        let mut encoder = Encoder::new(Vec::new(), 4, 4, &[0, 0, 0]).unwrap();
        assert!(matches!(
            encoder.write_frame(&frame),
            Err(EncodingError::FrameBufferTooSmallForDimensions)
        ));
    }

    #[test]
    fn palette_is_required() {
        assert!(matches!(
            Encoder::new(Vec::new(), 1, 1, &[]),
            Err(EncodingError::Format(MissingColorPalette))
        ));
    }
}
