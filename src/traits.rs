//! Traits used in this library
use std::io::{Result, Write};

/// A 24-bit unsigned value, as used in WebP chunk fields.
///
/// The upper byte of the wrapped value is discarded when written.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) struct U24(pub u32);

impl U24 {
    pub(crate) const MAX: u32 = 0x00FF_FFFF;
}

/// Writer extension to write little endian data
pub(crate) trait WriteBytesExt<T> {
    /// Writes `T` to a bytes stream. Least significant byte first.
    fn write_le(&mut self, n: T) -> Result<()>;
}

impl<W: Write + ?Sized> WriteBytesExt<u8> for W {
    #[inline(always)]
    fn write_le(&mut self, n: u8) -> Result<()> {
        self.write_all(&[n])
    }
}

impl<W: Write + ?Sized> WriteBytesExt<u16> for W {
    #[inline]
    fn write_le(&mut self, n: u16) -> Result<()> {
        self.write_all(&n.to_le_bytes())
    }
}

impl<W: Write + ?Sized> WriteBytesExt<U24> for W {
    #[inline]
    fn write_le(&mut self, n: U24) -> Result<()> {
        self.write_all(&n.0.to_le_bytes()[..3])
    }
}

impl<W: Write + ?Sized> WriteBytesExt<u32> for W {
    #[inline]
    fn write_le(&mut self, n: u32) -> Result<()> {
        self.write_all(&n.to_le_bytes())
    }
}

#[test]
fn u24_drops_high_byte() {
    let mut out = alloc::vec::Vec::new();
    out.write_le(U24(0x1234_5678)).unwrap();
    assert_eq!(out, [0x78, 0x56, 0x34]);
}
