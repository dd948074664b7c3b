use alloc::vec::Vec;

use crate::error::{Error, Result};

/// Known GIF block labels.
///
/// Note that the block uniquely specifies the layout of bytes that follow and how they are
/// framed. For example, the header always has a fixed length but is followed by a variable amount
/// of additional data. An image descriptor may be followed by a local color table depending on
/// information read in it. Therefore, it doesn't make sense to continue parsing after encountering
/// an unknown block as the semantics of following bytes are unclear.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u8)]
pub enum Block {
    /// Image block.
    Image = 0x2C,
    /// Extension block.
    Extension = 0x21,
    /// Image trailer.
    Trailer = 0x3B,
}

impl Block {
    /// Converts `u8` to `Option<Self>`
    #[must_use]
    pub fn from_u8(n: u8) -> Option<Self> {
        match n {
            0x2C => Some(Self::Image),
            0x21 => Some(Self::Extension),
            0x3B => Some(Self::Trailer),
            _ => None,
        }
    }
}

/// Known GIF extension labels.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u8)]
pub enum Extension {
    /// Plain Text extension.
    Text = 0x01,
    /// Control extension.
    Control = 0xF9,
    /// Comment extension.
    Comment = 0xFE,
    /// Application extension.
    Application = 0xFF,
}

impl Extension {
    /// Converts `u8` to a `Extension` if it is known.
    #[must_use]
    pub fn from_u8(n: u8) -> Option<Self> {
        match n {
            0x01 => Some(Self::Text),
            0xF9 => Some(Self::Control),
            0xFE => Some(Self::Comment),
            0xFF => Some(Self::Application),
            _ => None,
        }
    }
}

/// Disposal method
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum DisposalMethod {
    /// Leave the canvas as the frame left it. Also used for unspecified and unknown methods.
    #[default]
    None = 1,
    /// Clears the frame's rectangle to the background.
    RestoreBackground = 2,
    /// Restores the canvas to how it looked before the frame was drawn.
    RestorePrevious = 3,
}

impl DisposalMethod {
    /// Decodes the 3-bit disposal field of a graphics control block.
    ///
    /// Values 0 ("unspecified") and 4..=7 (reserved) behave like [`DisposalMethod::None`].
    #[must_use]
    pub fn from_u8(n: u8) -> Self {
        match n {
            2 => Self::RestoreBackground,
            3 => Self::RestorePrevious,
            _ => Self::None,
        }
    }
}

/// The sub-rectangle of the canvas covered by one frame.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct FrameRect {
    /// Offset from the left canvas edge.
    pub left: u16,
    /// Offset from the top canvas edge.
    pub top: u16,
    /// Width of the frame.
    pub width: u16,
    /// Height of the frame.
    pub height: u16,
}

impl FrameRect {
    /// Rectangle at the origin covering `width` by `height`.
    #[must_use]
    pub fn full(width: u16, height: u16) -> Self {
        Self {
            left: 0,
            top: 0,
            width,
            height,
        }
    }

    /// Returns `true` if either dimension is zero.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Intersects the rectangle with a `width` by `height` canvas.
    ///
    /// Returns `(x, y, w, h)` in canvas coordinates; `w` or `h` is zero if the
    /// rectangle lies entirely outside.
    #[must_use]
    pub(crate) fn clip(&self, width: u32, height: u32) -> (u32, u32, u32, u32) {
        let x = u32::from(self.left).min(width);
        let y = u32::from(self.top).min(height);
        let w = (u32::from(self.left) + u32::from(self.width)).min(width) - x;
        let h = (u32::from(self.top) + u32::from(self.height)).min(height) - y;
        (x, y, w, h)
    }
}

/// An owned RGBA raster, 4 bytes per pixel in row-major order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Raster {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl Raster {
    /// Allocates a fully transparent raster.
    pub fn new(width: u32, height: u32) -> Result<Self> {
        let len = rgba_len(width, height)?;
        let mut pixels = Vec::new();
        pixels
            .try_reserve_exact(len)
            .map_err(|_| Error::out_of_memory("raster allocation"))?;
        pixels.resize(len, 0);
        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    /// Wraps existing RGBA pixels.
    pub fn from_rgba(width: u32, height: u32, pixels: Vec<u8>) -> Result<Self> {
        if rgba_len(width, height)? != pixels.len() {
            return Err(Error::invalid_input(
                "pixel buffer length does not match the dimensions",
            ));
        }
        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    /// Width in pixels.
    #[must_use]
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Height in pixels.
    #[must_use]
    pub fn height(&self) -> u32 {
        self.height
    }

    /// RGBA bytes.
    #[must_use]
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Mutable RGBA bytes.
    pub fn pixels_mut(&mut self) -> &mut [u8] {
        &mut self.pixels
    }

    /// The pixel at `(x, y)`, or `None` outside the raster.
    #[must_use]
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let i = (y as usize * self.width as usize + x as usize) * 4;
        Some([
            self.pixels[i],
            self.pixels[i + 1],
            self.pixels[i + 2],
            self.pixels[i + 3],
        ])
    }

    /// Consumes the raster and returns its pixels.
    #[must_use]
    pub fn into_pixels(self) -> Vec<u8> {
        self.pixels
    }
}

/// The composited, viewer-visible state of an animation.
///
/// Its size is fixed when it is created and never changes afterwards.
pub type Canvas = Raster;

fn rgba_len(width: u32, height: u32) -> Result<usize> {
    if width == 0 || height == 0 {
        return Err(Error::invalid_input("raster dimensions must be non-zero"));
    }
    (width as usize)
        .checked_mul(height as usize)
        .and_then(|n| n.checked_mul(4))
        .ok_or_else(|| Error::out_of_memory("raster dimensions overflow"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disposal_from_bits() {
        assert_eq!(DisposalMethod::from_u8(0), DisposalMethod::None);
        assert_eq!(DisposalMethod::from_u8(1), DisposalMethod::None);
        assert_eq!(
            DisposalMethod::from_u8(2),
            DisposalMethod::RestoreBackground
        );
        assert_eq!(DisposalMethod::from_u8(3), DisposalMethod::RestorePrevious);
        assert_eq!(DisposalMethod::from_u8(7), DisposalMethod::None);
    }

    #[test]
    fn clip_to_canvas() {
        let rect = FrameRect {
            left: 6,
            top: 2,
            width: 10,
            height: 3,
        };
        assert_eq!(rect.clip(8, 8), (6, 2, 2, 3));
        let outside = FrameRect {
            left: 20,
            top: 0,
            width: 4,
            height: 4,
        };
        assert_eq!(outside.clip(8, 8).2, 0);
    }

    #[test]
    fn raster_rejects_mismatched_buffer() {
        assert!(Raster::from_rgba(2, 2, vec![0; 15]).is_err());
        assert!(Raster::new(0, 4).is_err());
        let raster = Raster::from_rgba(1, 1, vec![1, 2, 3, 4]).unwrap();
        assert_eq!(raster.pixel(0, 0), Some([1, 2, 3, 4]));
        assert_eq!(raster.pixel(1, 0), None);
    }
}
