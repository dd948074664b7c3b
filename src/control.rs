//! Per-frame metadata carried by extension blocks.

use crate::common::{DisposalMethod, Extension};
use crate::reader::ExtensionBlock;

/// Application identifiers whose first data sub-block carries a loop count.
const LOOP_APPLICATIONS: [&[u8; 11]; 2] = [b"NETSCAPE2.0", b"ANIMEXTS1.0"];

/// Graphics control data for the next image.
///
/// Lives for exactly one frame: it is parsed before an image descriptor and
/// reset to its default once that image has been composited.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct GraphicsControl {
    /// What happens to the canvas after the frame has been shown.
    pub disposal: DisposalMethod,
    /// Display time in units of 10 ms.
    pub delay: u16,
    /// Palette index that is not drawn.
    pub transparent: Option<u8>,
}

impl GraphicsControl {
    /// Parses a graphics control extension.
    ///
    /// Returns `None` for blocks that are not graphics control extensions or
    /// whose first sub-block is shorter than the four bytes it must hold.
    #[must_use]
    pub fn parse(ext: &ExtensionBlock<'_>) -> Option<Self> {
        if ext.label != Extension::Control as u8 {
            return None;
        }
        let block = ext.sub_blocks.first()?;
        let &[flags, delay_lo, delay_hi, trns, ..] = *block else {
            return None;
        };
        Some(Self {
            disposal: DisposalMethod::from_u8((flags >> 2) & 0b111),
            delay: u16::from_le_bytes([delay_lo, delay_hi]),
            transparent: (flags & 1 != 0).then_some(trns),
        })
    }

    /// Display time in milliseconds.
    #[must_use]
    pub fn delay_ms(&self) -> u32 {
        u32::from(self.delay) * 10
    }

    /// Clears the state after the frame it describes has been processed.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Loop-count information found in a stream.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct LoopExtension {
    /// Whether a loop-count application extension was seen.
    pub present: bool,
    /// Its decoded value; 0 means loop forever.
    pub value: u16,
}

impl LoopExtension {
    /// Records `ext` if it is a loop-count application extension.
    ///
    /// The identifier block must be one of the known 11-byte signatures and the
    /// next sub-block must be `[0x01, lo, hi]`. Anything else leaves `self` as is.
    /// Returns whether the block was recognized.
    pub fn update(&mut self, ext: &ExtensionBlock<'_>) -> bool {
        if ext.label != Extension::Application as u8 {
            return false;
        }
        let Some(ident) = ext.sub_blocks.first() else {
            return false;
        };
        if !LOOP_APPLICATIONS.iter().any(|sig| ident[..] == sig[..]) {
            return false;
        }
        match ext.sub_blocks.get(1).map(|b| &b[..]) {
            Some(&[1, lo, hi, ..]) => {
                self.present = true;
                self.value = u16::from_le_bytes([lo, hi]);
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ext(label: u8, blocks: &[&'static [u8]]) -> ExtensionBlock<'static> {
        ExtensionBlock {
            label,
            sub_blocks: blocks.to_vec(),
        }
    }

    #[test]
    fn parses_graphics_control() {
        let block = ext(0xF9, &[&[0b0000_1001, 0x2C, 0x01, 7]]);
        let gce = GraphicsControl::parse(&block).unwrap();
        assert_eq!(gce.disposal, DisposalMethod::RestoreBackground);
        assert_eq!(gce.delay, 300);
        assert_eq!(gce.delay_ms(), 3000);
        assert_eq!(gce.transparent, Some(7));
    }

    #[test]
    fn transparency_index_ignored_without_flag() {
        let block = ext(0xF9, &[&[0b0000_1100, 0, 0, 7]]);
        let gce = GraphicsControl::parse(&block).unwrap();
        assert_eq!(gce.disposal, DisposalMethod::RestorePrevious);
        assert_eq!(gce.transparent, None);
    }

    #[test]
    fn short_graphics_control_is_ignored() {
        assert_eq!(GraphicsControl::parse(&ext(0xF9, &[&[1, 2]])), None);
        assert_eq!(GraphicsControl::parse(&ext(0xFE, &[&[1, 2, 3, 4]])), None);
    }

    #[test]
    fn reset_restores_defaults() {
        let mut gce = GraphicsControl {
            disposal: DisposalMethod::RestorePrevious,
            delay: 4,
            transparent: Some(3),
        };
        gce.reset();
        assert_eq!(gce, GraphicsControl::default());
        assert_eq!(gce.disposal, DisposalMethod::None);
    }

    #[test]
    fn loop_extension_signatures() {
        for sig in [&b"NETSCAPE2.0"[..], &b"ANIMEXTS1.0"[..]] {
            let mut lp = LoopExtension::default();
            assert!(lp.update(&ext(0xFF, &[sig, &[1, 5, 0]])));
            let expected = LoopExtension {
                present: true,
                value: 5,
            };
            assert_eq!(lp, expected);
        }
    }

    #[test]
    fn unknown_application_is_ignored() {
        let mut lp = LoopExtension::default();
        assert!(!lp.update(&ext(0xFF, &[&b"XMP DataXMP"[..], &[1, 5, 0]])));
        assert!(!lp.update(&ext(0xFF, &[&b"NETSCAPE2.0"[..], &[2, 5, 0]])));
        assert!(!lp.update(&ext(0xFF, &[&b"NETSCAPE2.0"[..]])));
        assert_eq!(lp, LoopExtension::default());
    }
}
