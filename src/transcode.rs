//! Entry points: GIF to animated WebP, and WebP to a still GIF.

use alloc::vec::Vec;
use std::io::{Read, Write};

use tracing::{debug, warn};

use crate::assembler::{AnimationEncoder, Assembler, FrameConfig, KeyframeBounds, LoopPolicy};
use crate::compositor::composite_records;
use crate::encoder::write_static_gif;
use crate::error::{Error, ErrorKind, Result};
use crate::memory::{self, AllocationTracker};
use crate::quantize::{quantize, Palette};
use crate::reader::{DecodingError, DecodingFormatError, RecordReader};
use crate::webp::{AnimEncoderOptions, RasterDecoder, WebpAnimEncoder, WebpRasterDecoder};

/// Options for converting a GIF into an animated WebP.
#[derive(Clone, Debug, PartialEq)]
pub struct GifToWebpOptions {
    quality: f32,
    lossless: bool,
    allow_mixed: bool,
    minimize_size: bool,
    kmin: Option<u32>,
    kmax: Option<u32>,
    loop_count: Option<u16>,
    loop_compatibility: bool,
}

impl Default for GifToWebpOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl GifToWebpOptions {
    /// Creates the default options: quality 75, lossy, automatic keyframes and loop count.
    #[must_use]
    pub fn new() -> Self {
        Self {
            quality: 75.0,
            lossless: false,
            allow_mixed: false,
            minimize_size: false,
            kmin: None,
            kmax: None,
            loop_count: None,
            loop_compatibility: false,
        }
    }

    /// Sets the quality factor applied to every frame. Must lie in `0.0..=100.0`.
    pub fn set_quality(&mut self, quality: f32) {
        self.quality = quality;
    }

    /// Encodes frames losslessly. Also selects the lossless keyframe defaults.
    pub fn set_lossless(&mut self, lossless: bool) {
        self.lossless = lossless;
    }

    /// Lets the encoder pick lossy or lossless per frame, whichever is smaller.
    pub fn set_allow_mixed(&mut self, allow_mixed: bool) {
        self.allow_mixed = allow_mixed;
    }

    /// Spends more encode time looking for a smaller file.
    pub fn set_minimize_size(&mut self, minimize_size: bool) {
        self.minimize_size = minimize_size;
    }

    /// Minimum distance between keyframes; `None` derives it from the lossless flag.
    pub fn set_kmin(&mut self, kmin: Option<u32>) {
        self.kmin = kmin;
    }

    /// Maximum distance between keyframes; `None` derives it from the lossless flag.
    pub fn set_kmax(&mut self, kmax: Option<u32>) {
        self.kmax = kmax;
    }

    /// Forces the loop count of the output; `None` derives it from the source.
    pub fn set_loop_count(&mut self, loop_count: Option<u16>) {
        self.loop_count = loop_count;
    }

    /// Writes any finite source loop count as a single play, as older converters did.
    pub fn set_loop_compatibility(&mut self, loop_compatibility: bool) {
        self.loop_compatibility = loop_compatibility;
    }

    /// The quality factor.
    #[must_use]
    pub fn quality(&self) -> f32 {
        self.quality
    }

    /// Whether frames are encoded losslessly.
    #[must_use]
    pub fn lossless(&self) -> bool {
        self.lossless
    }

    /// Whether per-frame lossy/lossless selection is enabled.
    #[must_use]
    pub fn allow_mixed(&self) -> bool {
        self.allow_mixed
    }

    /// Whether size minimization is enabled.
    #[must_use]
    pub fn minimize_size(&self) -> bool {
        self.minimize_size
    }

    /// Keyframe bounds after filling in the defaults.
    #[must_use]
    pub fn keyframe_bounds(&self) -> KeyframeBounds {
        KeyframeBounds::resolve(self.kmin, self.kmax, self.lossless)
    }

    /// The loop count override.
    #[must_use]
    pub fn loop_count(&self) -> Option<u16> {
        self.loop_count
    }

    /// Whether the compatibility loop policy is selected.
    #[must_use]
    pub fn loop_compatibility(&self) -> bool {
        self.loop_compatibility
    }

    /// The per-frame configuration shared by every frame.
    #[must_use]
    pub fn frame_config(&self) -> FrameConfig {
        FrameConfig {
            quality: self.quality,
            lossless: self.lossless,
        }
    }

    fn anim_options(&self) -> AnimEncoderOptions {
        AnimEncoderOptions {
            keyframes: self.keyframe_bounds(),
            allow_mixed: self.allow_mixed,
            minimize_size: self.minimize_size,
        }
    }

    fn validate(&self) -> Result<()> {
        if !(0.0..=100.0).contains(&self.quality) {
            return Err(Error::invalid_input(alloc::format!(
                "quality {} is outside 0..=100",
                self.quality
            )));
        }
        Ok(())
    }
}

/// Options for converting a WebP into a GIF.
///
/// There are no settings yet.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[non_exhaustive]
pub struct WebpToGifOptions {}

impl WebpToGifOptions {
    /// Creates the default options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

/// Result of a conversion to GIF.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GifConversion {
    /// The single-frame GIF file.
    pub data: Vec<u8>,
    /// The source was animated and only its first frame was written.
    ///
    /// Animated GIF output is not supported.
    pub animation_dropped: bool,
}

/// Converts a GIF file into an animated WebP file.
pub fn gif_to_webp(data: &[u8], options: &GifToWebpOptions) -> Result<Vec<u8>> {
    let encoder = WebpAnimEncoder::new(options.anim_options());
    gif_to_animation(data, options, encoder, None)
}

/// Like [`gif_to_webp`], charging every large buffer to `tracker`.
pub fn gif_to_webp_tracked(
    data: &[u8],
    options: &GifToWebpOptions,
    tracker: &AllocationTracker,
) -> Result<Vec<u8>> {
    let anim_options = options.anim_options();
    let encoder = WebpAnimEncoder::new(anim_options).with_tracker(tracker);
    gif_to_animation(data, options, encoder, Some(tracker))
}

/// Composites every frame of a GIF and hands it to `encoder`.
///
/// The encoder receives the canvases in display order, then the time at which
/// the last frame ends, and finally the resolved loop count and background.
pub fn gif_to_animation<E: AnimationEncoder>(
    data: &[u8],
    options: &GifToWebpOptions,
    encoder: E,
    tracker: Option<&AllocationTracker>,
) -> Result<Vec<u8>> {
    options.validate()?;
    let reader = open_gif(data)?;
    let mut assembler = Assembler::new(encoder, options.frame_config());
    let summary = composite_records(reader, &mut assembler, tracker)?;
    debug!(
        frames = summary.frame_count,
        width = summary.width,
        height = summary.height,
        duration_ms = summary.end_timestamp,
        "composited GIF"
    );
    let policy = LoopPolicy {
        frame_count: summary.frame_count,
        had_loop_extension: summary.loop_extension.present,
        loop_value: summary.loop_extension.value,
        compatibility: options.loop_compatibility,
        override_count: options.loop_count,
    };
    assembler.finish(summary.end_timestamp, policy, summary.background)
}

fn open_gif(data: &[u8]) -> Result<RecordReader<'_>> {
    if data.is_empty() {
        return Err(Error::invalid_input("input buffer is empty"));
    }
    RecordReader::new(data).map_err(|err| match err {
        DecodingError::Format(DecodingFormatError::BadSignature) => {
            Error::new(ErrorKind::UnsupportedFormat, "input is not a GIF file")
        }
        err => err.into(),
    })
}

/// Converts a WebP file into a single-frame GIF with a fixed palette.
pub fn webp_to_gif(data: &[u8], options: &WebpToGifOptions) -> Result<GifConversion> {
    raster_to_gif(data, options, &mut WebpRasterDecoder::new(), None)
}

/// Like [`webp_to_gif`], charging every large buffer to `tracker`.
pub fn webp_to_gif_tracked(
    data: &[u8],
    options: &WebpToGifOptions,
    tracker: &AllocationTracker,
) -> Result<GifConversion> {
    raster_to_gif(data, options, &mut WebpRasterDecoder::new(), Some(tracker))
}

/// Decodes `data` with `decoder` and writes its first frame as a GIF.
pub fn raster_to_gif<D: RasterDecoder + ?Sized>(
    data: &[u8],
    _options: &WebpToGifOptions,
    decoder: &mut D,
    tracker: Option<&AllocationTracker>,
) -> Result<GifConversion> {
    if data.is_empty() {
        return Err(Error::invalid_input("input buffer is empty"));
    }
    let decoded = decoder.decode(data)?;
    let raster = &decoded.raster;
    let _raster_charge = memory::charge(tracker, raster.pixels().len())?;
    let _indices_charge = memory::charge(tracker, raster.pixels().len() / 4)?;

    let palette = Palette::fixed();
    let quantized = quantize(raster, &palette)?;
    let data = write_static_gif(&quantized)?;

    let animation_dropped = decoded.frame_count > 1;
    if animation_dropped {
        warn!(
            frames = decoded.frame_count,
            "animated GIF output is not supported; wrote the first frame only"
        );
    }
    debug!(
        width = quantized.width,
        height = quantized.height,
        transparent = quantized.transparent.is_some(),
        bytes = data.len(),
        "wrote static GIF"
    );
    Ok(GifConversion {
        data,
        animation_dropped,
    })
}

/// A reusable GIF to animated WebP conversion.
#[derive(Clone, Debug, Default)]
pub struct Gif2Webp {
    options: GifToWebpOptions,
}

impl Gif2Webp {
    /// Creates the command.
    #[must_use]
    pub fn new(options: GifToWebpOptions) -> Self {
        Self { options }
    }

    /// The options every run uses.
    #[must_use]
    pub fn options(&self) -> &GifToWebpOptions {
        &self.options
    }

    /// Converts one GIF.
    pub fn run(&self, data: &[u8]) -> Result<Vec<u8>> {
        gif_to_webp(data, &self.options)
    }

    /// Converts one GIF, charging its buffers to `tracker`.
    pub fn run_tracked(&self, data: &[u8], tracker: &AllocationTracker) -> Result<Vec<u8>> {
        gif_to_webp_tracked(data, &self.options, tracker)
    }

    /// Reads a whole GIF from `input` and writes the WebP to `output`.
    ///
    /// Nothing is written if the conversion fails.
    pub fn run_io<R: Read, W: Write>(&self, mut input: R, mut output: W) -> Result<()> {
        let data = read_all(&mut input)?;
        let webp = self.run(&data)?;
        output.write_all(&webp).map_err(write_error)
    }
}

/// A reusable WebP to GIF conversion.
#[derive(Clone, Debug, Default)]
pub struct Webp2Gif {
    options: WebpToGifOptions,
}

impl Webp2Gif {
    /// Creates the command.
    #[must_use]
    pub fn new(options: WebpToGifOptions) -> Self {
        Self { options }
    }

    /// The options every run uses.
    #[must_use]
    pub fn options(&self) -> &WebpToGifOptions {
        &self.options
    }

    /// Converts one WebP.
    pub fn run(&self, data: &[u8]) -> Result<GifConversion> {
        webp_to_gif(data, &self.options)
    }

    /// Converts one WebP, charging its buffers to `tracker`.
    pub fn run_tracked(&self, data: &[u8], tracker: &AllocationTracker) -> Result<GifConversion> {
        webp_to_gif_tracked(data, &self.options, tracker)
    }

    /// Reads a whole WebP from `input` and writes the GIF to `output`.
    ///
    /// Returns whether animation frames were dropped.
    pub fn run_io<R: Read, W: Write>(&self, mut input: R, mut output: W) -> Result<bool> {
        let data = read_all(&mut input)?;
        let gif = self.run(&data)?;
        output.write_all(&gif.data).map_err(write_error)?;
        Ok(gif.animation_dropped)
    }
}

fn read_all<R: Read>(input: &mut R) -> Result<Vec<u8>> {
    let mut data = Vec::new();
    input.read_to_end(&mut data).map_err(read_error)?;
    Ok(data)
}

#[cold]
fn read_error(err: std::io::Error) -> Error {
    Error::with_source(ErrorKind::InvalidInput, "could not read input", err)
}

#[cold]
fn write_error(err: std::io::Error) -> Error {
    Error::with_source(ErrorKind::EncodeFailed, "could not write output", err)
}
