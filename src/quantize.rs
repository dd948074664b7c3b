//! Fixed-palette color reduction for GIF output.

use alloc::vec::Vec;

use crate::common::Raster;
use crate::error::{Error, Result};

/// Palette index reserved for pixels that are not drawn.
pub const TRANSPARENT_INDEX: u8 = 255;

/// Pixels with alpha below this are mapped to [`TRANSPARENT_INDEX`].
const ALPHA_THRESHOLD: u8 = 0x80;

/// Distance between two cube levels on each axis.
const CUBE_STEP: u8 = 51;

/// Levels per cube axis.
const CUBE_LEVELS: u8 = 6;

/// A 256-entry RGB color table.
#[derive(Clone, PartialEq, Eq)]
pub struct Palette {
    rgb: [u8; 256 * 3],
}

impl Palette {
    /// The web-safe color cube followed by a gray ramp.
    ///
    /// Entries 0..216 hold a 6x6x6 cube with red varying slowest and blue
    /// fastest. Entries 216.. hold grays 6, 12, 18 and so on. Entry 255 is the
    /// transparency sentinel and is black.
    #[must_use]
    pub fn fixed() -> Self {
        let mut rgb = [0; 256 * 3];
        let mut entries = rgb.chunks_exact_mut(3);
        for r in 0..CUBE_LEVELS {
            for g in 0..CUBE_LEVELS {
                for b in 0..CUBE_LEVELS {
                    if let Some(entry) = entries.next() {
                        entry.copy_from_slice(&[r * CUBE_STEP, g * CUBE_STEP, b * CUBE_STEP]);
                    }
                }
            }
        }
        for (level, entry) in (1..=40u8).zip(entries) {
            entry.fill(level * 6);
        }
        let sentinel = usize::from(TRANSPARENT_INDEX) * 3;
        rgb[sentinel..sentinel + 3].fill(0);
        Self { rgb }
    }

    /// The table as `[r, g, b, r, g, b, ...]`.
    #[must_use]
    pub fn as_rgb(&self) -> &[u8] {
        &self.rgb
    }

    /// The color stored at `index`.
    #[must_use]
    pub fn get(&self, index: u8) -> [u8; 3] {
        let i = usize::from(index) * 3;
        [self.rgb[i], self.rgb[i + 1], self.rgb[i + 2]]
    }
}

impl core::fmt::Debug for Palette {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Palette").field("entries", &256).finish()
    }
}

/// A raster reduced to one palette index per pixel.
#[derive(Debug, Clone)]
pub struct QuantizedRaster<'p> {
    /// Width in pixels.
    pub width: u16,
    /// Height in pixels.
    pub height: u16,
    /// Row-major palette indices.
    pub indices: Vec<u8>,
    /// The palette the indices refer to.
    pub palette: &'p Palette,
    /// The sentinel index, if any pixel uses it.
    pub transparent: Option<u8>,
}

/// Cube index of an opaque color.
///
/// Each channel is rounded to its nearest cube level on its own. Gray entries
/// are never produced.
#[must_use]
pub fn cube_index(r: u8, g: u8, b: u8) -> u8 {
    let level = |v: u8| {
        ((u16::from(v) + u16::from(CUBE_STEP / 2)) / u16::from(CUBE_STEP)).min(5) as u8
    };
    level(r) * 36 + level(g) * 6 + level(b)
}

/// Maps every pixel of `raster` into `palette`, which must be [`Palette::fixed`].
///
/// Fails with `InvalidInput` if the raster does not fit GIF dimensions.
pub fn quantize<'p>(raster: &Raster, palette: &'p Palette) -> Result<QuantizedRaster<'p>> {
    let width = u16::try_from(raster.width())
        .map_err(|_| Error::invalid_input("raster too wide for a GIF"))?;
    let height = u16::try_from(raster.height())
        .map_err(|_| Error::invalid_input("raster too tall for a GIF"))?;

    let mut indices = Vec::new();
    indices
        .try_reserve_exact(raster.pixels().len() / 4)
        .map_err(|_| Error::out_of_memory("quantized index buffer"))?;
    let mut transparent = None;
    indices.extend(raster.pixels().chunks_exact(4).map(|px| {
        if px[3] < ALPHA_THRESHOLD {
            transparent = Some(TRANSPARENT_INDEX);
            TRANSPARENT_INDEX
        } else {
            cube_index(px[0], px[1], px[2])
        }
    }));

    Ok(QuantizedRaster {
        width,
        height,
        indices,
        palette,
        transparent,
    })
}
