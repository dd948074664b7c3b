//! Pull-based reader over the block structure of a GIF byte buffer.
//!
//! [`RecordReader`] hands out whole records: an image descriptor together with
//! its color table and compressed sub-blocks, an extension with all of its
//! sub-blocks, or the trailer. Sub-blocks borrow from the input buffer, so no
//! pixel data is copied until a frame is actually decoded.

use alloc::vec::Vec;
use core::fmt;

use crate::common::{Block, FrameRect};

/// An error returned in the case of the image not being formatted properly.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum DecodingFormatError {
    /// The buffer does not start with `GIF87a` or `GIF89a`.
    BadSignature,
    /// The buffer ended inside a block or before the trailer.
    Truncated,
    /// A byte that should introduce a block is not one of the known block labels.
    UnknownBlock(u8),
    /// The LZW minimum code size of an image is outside `1..=11`.
    InvalidMinCodeSize(u8),
    /// A frame has neither a local nor a global color table.
    MissingColorPalette,
    /// The compressed pixel data is not a valid LZW stream.
    CorruptImageData,
    /// The compressed pixel data ended before the frame was filled.
    ImageDataTooShort,
    /// Neither the logical screen nor the first frame gives a usable canvas size.
    InvalidCanvasSize,
}

impl core::error::Error for DecodingFormatError {}
impl fmt::Display for DecodingFormatError {
    #[cold]
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadSignature => fmt.write_str("malformed GIF header"),
            Self::Truncated => fmt.write_str("unexpected end of GIF data"),
            Self::UnknownBlock(byte) => write!(fmt, "unknown block type encountered: {byte:#04x}"),
            Self::InvalidMinCodeSize(size) => write!(fmt, "invalid LZW minimum code size {size}"),
            Self::MissingColorPalette => {
                fmt.write_str("no color table available for current frame")
            }
            Self::CorruptImageData => fmt.write_str("corrupt LZW image data"),
            Self::ImageDataTooShort => {
                fmt.write_str("image data ended before the frame was filled")
            }
            Self::InvalidCanvasSize => fmt.write_str("canvas has zero width or height"),
        }
    }
}

/// Decoding error.
#[derive(Debug)]
#[non_exhaustive]
pub enum DecodingError {
    /// Failed to internally allocate a buffer of sufficient size.
    OutOfMemory,
    /// Returned if the image is found to be malformed.
    Format(DecodingFormatError),
}

impl fmt::Display for DecodingError {
    #[cold]
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfMemory => fmt.write_str("Out of Memory"),
            Self::Format(err) => err.fmt(fmt),
        }
    }
}

impl core::error::Error for DecodingError {
    #[cold]
    fn source(&self) -> Option<&(dyn core::error::Error + 'static)> {
        match self {
            Self::OutOfMemory => None,
            Self::Format(err) => Some(err),
        }
    }
}

impl From<DecodingFormatError> for DecodingError {
    #[cold]
    fn from(err: DecodingFormatError) -> Self {
        Self::Format(err)
    }
}

/// GIF version
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Version {
    /// GIF87a
    V87a,
    /// GIF89a
    V89a,
}

/// The header and logical screen descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogicalScreen {
    /// Format version.
    pub version: Version,
    /// Declared canvas width; may be zero in malformed files.
    pub width: u16,
    /// Declared canvas height; may be zero in malformed files.
    pub height: u16,
    /// Background color index into the global color table.
    pub background_index: u8,
    /// Global color table as `[r, g, b, ...]`.
    pub global_palette: Option<Vec<u8>>,
}

impl LogicalScreen {
    /// The background color from the global color table, if it has one.
    #[must_use]
    pub fn background_color(&self) -> Option<[u8; 3]> {
        let palette = self.global_palette.as_deref()?;
        let i = usize::from(self.background_index) * 3;
        palette.get(i..i + 3).map(|rgb| [rgb[0], rgb[1], rgb[2]])
    }
}

/// An image descriptor together with everything up to its block terminator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageDescriptor<'a> {
    /// Where the frame sits on the canvas, as declared.
    pub rect: FrameRect,
    /// Rows are stored in the 4-pass interlaced order.
    pub interlaced: bool,
    /// Local color table as `[r, g, b, ...]`.
    pub local_palette: Option<&'a [u8]>,
    /// LZW minimum code size.
    pub min_code_size: u8,
    /// Compressed data sub-blocks, length prefixes removed.
    pub data: Vec<&'a [u8]>,
}

/// An extension block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionBlock<'a> {
    /// Extension label, see [`crate::Extension`].
    pub label: u8,
    /// Payload sub-blocks, length prefixes removed.
    pub sub_blocks: Vec<&'a [u8]>,
}

/// A structural record of a GIF stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record<'a> {
    /// An image and its compressed data.
    ImageDescriptor(ImageDescriptor<'a>),
    /// An extension block, known or not.
    Extension(ExtensionBlock<'a>),
    /// The trailer; no records follow.
    Terminate,
}

/// Pull reader over the records of an in-memory GIF.
#[derive(Debug, Clone)]
pub struct RecordReader<'a> {
    data: &'a [u8],
    pos: usize,
    screen: LogicalScreen,
    finished: bool,
}

impl<'a> RecordReader<'a> {
    /// Reads the header, logical screen descriptor and global color table.
    pub fn new(data: &'a [u8]) -> Result<Self, DecodingError> {
        let version = match data.get(..6) {
            Some(b"GIF87a") => Version::V87a,
            Some(b"GIF89a") => Version::V89a,
            Some(_) => return Err(DecodingFormatError::BadSignature.into()),
            None if b"GIF89a".starts_with(data) || b"GIF87a".starts_with(data) => {
                return Err(DecodingFormatError::Truncated.into())
            }
            None => return Err(DecodingFormatError::BadSignature.into()),
        };
        let mut reader = Self {
            data,
            pos: 6,
            screen: LogicalScreen {
                version,
                width: 0,
                height: 0,
                background_index: 0,
                global_palette: None,
            },
            finished: false,
        };
        let width = reader.u16()?;
        let height = reader.u16()?;
        let flags = reader.u8()?;
        let background_index = reader.u8()?;
        let _aspect_ratio = reader.u8()?;
        let global_palette = if flags & 0x80 != 0 {
            let table = reader.color_table(flags)?;
            let mut owned = Vec::new();
            owned
                .try_reserve_exact(table.len())
                .map_err(|_| DecodingError::OutOfMemory)?;
            owned.extend_from_slice(table);
            Some(owned)
        } else {
            None
        };
        reader.screen = LogicalScreen {
            version,
            width,
            height,
            background_index,
            global_palette,
        };
        Ok(reader)
    }

    /// The logical screen read from the header.
    #[must_use]
    pub fn screen(&self) -> &LogicalScreen {
        &self.screen
    }

    /// Reads the next record.
    ///
    /// Once [`Record::Terminate`] has been returned every further call returns it again.
    pub fn next_record(&mut self) -> Result<Record<'a>, DecodingError> {
        if self.finished {
            return Ok(Record::Terminate);
        }
        let result = self.read_record();
        if let Ok(Record::Terminate) | Err(_) = result {
            self.finished = true;
        }
        result
    }

    fn read_record(&mut self) -> Result<Record<'a>, DecodingError> {
        let byte = self.u8()?;
        match Block::from_u8(byte) {
            Some(Block::Image) => self.image_descriptor().map(Record::ImageDescriptor),
            Some(Block::Extension) => {
                let label = self.u8()?;
                let sub_blocks = self.sub_blocks()?;
                Ok(Record::Extension(ExtensionBlock { label, sub_blocks }))
            }
            Some(Block::Trailer) => Ok(Record::Terminate),
            None => Err(DecodingFormatError::UnknownBlock(byte).into()),
        }
    }

    fn image_descriptor(&mut self) -> Result<ImageDescriptor<'a>, DecodingError> {
        let rect = FrameRect {
            left: self.u16()?,
            top: self.u16()?,
            width: self.u16()?,
            height: self.u16()?,
        };
        let flags = self.u8()?;
        let local_palette = if flags & 0x80 != 0 {
            Some(self.color_table(flags)?)
        } else {
            None
        };
        let min_code_size = self.u8()?;
        if !(1..=11).contains(&min_code_size) {
            let err = DecodingFormatError::InvalidMinCodeSize(min_code_size);
            return Err(err.into());
        }
        let data = self.sub_blocks()?;
        Ok(ImageDescriptor {
            rect,
            interlaced: flags & 0x40 != 0,
            local_palette,
            min_code_size,
            data,
        })
    }

    /// Color table size is given by the low 3 bits of `flags`.
    fn color_table(&mut self, flags: u8) -> Result<&'a [u8], DecodingError> {
        let entries = 2usize << (flags & 0b111);
        self.take(entries * 3)
    }

    fn sub_blocks(&mut self) -> Result<Vec<&'a [u8]>, DecodingError> {
        let mut blocks = Vec::new();
        loop {
            let len = self.u8()?;
            if len == 0 {
                return Ok(blocks);
            }
            let block = self.take(usize::from(len))?;
            blocks
                .try_reserve(1)
                .map_err(|_| DecodingError::OutOfMemory)?;
            blocks.push(block);
        }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], DecodingError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.data.len())
            .ok_or(DecodingFormatError::Truncated)?;
        let bytes = &self.data[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn u8(&mut self) -> Result<u8, DecodingError> {
        self.take(1).map(|b| b[0])
    }

    fn u16(&mut self) -> Result<u16, DecodingError> {
        self.take(2).map(|b| u16::from_le_bytes([b[0], b[1]]))
    }
}

impl<'a> Iterator for RecordReader<'a> {
    type Item = Result<Record<'a>, DecodingError>;

    /// Yields records up to, but not including, the trailer. Stops after the first error.
    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.next_record() {
            Ok(Record::Terminate) => None,
            other => Some(other),
        }
    }
}
