//! Animated WebP assembly and WebP raster decoding.
//!
//! Animated files are laid out as
//!
//! ```text
//! RIFF <size> WEBP
//!   VP8X  flags, canvas size
//!   ANIM  background color, loop count
//!   ANMF  offset, size, duration, flags, then the frame's ALPH/VP8/VP8L chunks
//!   ANMF  ...
//! ```
//!
//! Frame bitstreams come from a [`FrameEncoder`]; the container itself is
//! written here.

use alloc::vec::Vec;
use std::io::{self, Cursor, Write};

use image_webp::WebPDecoder;
use tracing::{debug, trace, warn};

use crate::assembler::{AnimationEncoder, AnimationParams, FrameConfig, KeyframeBounds};
use crate::common::{Canvas, Raster};
use crate::error::{Error, ErrorKind, Result};
use crate::memory::{AllocationTracker, Tracked};
use crate::traits::{WriteBytesExt, U24};

/// Largest canvas side a WebP file can describe.
pub const MAX_DIMENSION: u32 = 16384;

const VP8X_FLAG_ANIMATION: u8 = 0x02;
const VP8X_FLAG_ALPHA: u8 = 0x10;
const ANMF_FLAG_NO_BLEND: u8 = 0x02;

/// A frame bitstream as a run of complete `ALPH`/`VP8 `/`VP8L` chunks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedImage {
    /// Chunk headers, payloads and padding, ready to be embedded in an `ANMF` chunk.
    pub chunks: Vec<u8>,
    /// The image has at least one pixel that is not fully opaque.
    pub has_alpha: bool,
}

/// Compresses one RGBA image into WebP image chunks.
pub trait FrameEncoder {
    /// Encodes `rgba`, which holds `width * height` pixels.
    fn encode_frame(
        &mut self,
        rgba: &[u8],
        width: u32,
        height: u32,
        config: &FrameConfig,
    ) -> Result<EncodedImage>;
}

/// The built-in frame encoder.
///
/// Lossless requests produce a `VP8L` bitstream through `image-webp`. Lossy
/// requests produce a `VP8 ` bitstream at the requested quality through
/// `zenwebp`, preceded by an `ALPH` chunk when the image is not opaque.
#[derive(Debug, Default, Clone, Copy)]
pub struct WebpFrameEncoder;

impl WebpFrameEncoder {
    /// Creates the encoder.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl FrameEncoder for WebpFrameEncoder {
    fn encode_frame(
        &mut self,
        rgba: &[u8],
        width: u32,
        height: u32,
        config: &FrameConfig,
    ) -> Result<EncodedImage> {
        let has_alpha = rgba.chunks_exact(4).any(|px| px[3] != 0xFF);
        let file = if config.lossless {
            encode_lossless(rgba, width, height)?
        } else {
            encode_lossy(rgba, width, height, config.quality)?
        };

        let mut chunks = Vec::new();
        for chunk in RiffChunks::new(&file)? {
            let (fourcc, payload) = chunk?;
            if matches!(&fourcc, b"ALPH" | b"VP8 " | b"VP8L") {
                write_chunk(&mut chunks, fourcc, payload)
                    .map_err(container_error)?;
            }
        }
        if chunks.is_empty() {
            return Err(Error::new(
                ErrorKind::EncodeFailed,
                "encoder produced no image chunk",
            ));
        }
        Ok(EncodedImage { chunks, has_alpha })
    }
}

fn encode_lossless(rgba: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
    let mut file = Vec::new();
    image_webp::WebPEncoder::new(&mut file)
        .encode(rgba, width, height, image_webp::ColorType::Rgba8)
        .map_err(encode_error)?;
    Ok(file)
}

fn encode_lossy(rgba: &[u8], width: u32, height: u32, quality: f32) -> Result<Vec<u8>> {
    zenwebp::Encoder::new_rgba(rgba, width, height)
        .quality(quality)
        .encode()
        .map_err(|err| {
            warn!(error = ?err, "VP8 encoding failed");
            Error::new(ErrorKind::EncodeFailed, "lossy frame encoding failed")
        })
}

#[cold]
fn encode_error(err: image_webp::EncodingError) -> Error {
    Error::with_source(ErrorKind::EncodeFailed, "frame encoding failed", err)
}

/// Iterates over the chunks of a `RIFF`/`WEBP` file.
#[derive(Debug, Clone)]
pub struct RiffChunks<'a> {
    rest: &'a [u8],
}

impl<'a> RiffChunks<'a> {
    /// Checks the file header. Fails with `UnsupportedFormat` if `data` is not a WebP file.
    pub fn new(data: &'a [u8]) -> Result<Self> {
        if !is_webp(data) {
            return Err(Error::new(
                ErrorKind::UnsupportedFormat,
                "not a RIFF/WEBP file",
            ));
        }
        let declared = u32::from_le_bytes([data[4], data[5], data[6], data[7]]) as usize;
        let end = declared.saturating_add(8).min(data.len());
        Ok(Self {
            rest: &data[12..end],
        })
    }
}

impl<'a> Iterator for RiffChunks<'a> {
    type Item = Result<([u8; 4], &'a [u8])>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.rest.is_empty() {
            return None;
        }
        let Some((header, body)) = self.rest.split_first_chunk::<8>() else {
            self.rest = &[];
            return Some(Err(Error::new(
                ErrorKind::DecodeFailed,
                "truncated chunk header",
            )));
        };
        let fourcc = [header[0], header[1], header[2], header[3]];
        let size = u32::from_le_bytes([header[4], header[5], header[6], header[7]]) as usize;
        if size > body.len() {
            self.rest = &[];
            return Some(Err(Error::new(ErrorKind::DecodeFailed, "truncated chunk")));
        }
        let padded = (size + (size & 1)).min(body.len());
        self.rest = &body[padded..];
        Some(Ok((fourcc, &body[..size])))
    }
}

/// Returns `true` if `data` starts with a `RIFF`/`WEBP` header.
#[must_use]
pub fn is_webp(data: &[u8]) -> bool {
    data.len() >= 12 && &data[..4] == b"RIFF" && &data[8..12] == b"WEBP"
}

fn write_chunk<W: Write + ?Sized>(w: &mut W, fourcc: [u8; 4], payload: &[u8]) -> io::Result<()> {
    w.write_all(&fourcc)?;
    w.write_le(payload.len() as u32)?;
    w.write_all(payload)?;
    if payload.len() % 2 == 1 {
        w.write_le(0u8)?;
    }
    Ok(())
}

#[cold]
fn container_error(err: io::Error) -> Error {
    Error::with_source(
        ErrorKind::EncodeFailed,
        "could not write WebP container",
        err,
    )
}

/// Animation-level encoder settings.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct AnimEncoderOptions {
    /// Keyframe spacing; sanitized on construction.
    pub keyframes: KeyframeBounds,
    /// Try both lossless and lossy encodings of each frame and keep the smaller.
    pub allow_mixed: bool,
    /// Try both keyframe and sub-frame encodings where allowed and keep the smaller.
    pub minimize_size: bool,
}

impl Default for AnimEncoderOptions {
    fn default() -> Self {
        Self {
            keyframes: KeyframeBounds::resolve(None, None, false),
            allow_mixed: false,
            minimize_size: false,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
struct SubRect {
    x: u32,
    y: u32,
    width: u32,
    height: u32,
}

impl SubRect {
    fn full(width: u32, height: u32) -> Self {
        Self {
            x: 0,
            y: 0,
            width,
            height,
        }
    }

    fn area(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }
}

#[derive(Debug)]
struct PendingFrame {
    rect: SubRect,
    image: EncodedImage,
    timestamp: u32,
}

#[derive(Debug)]
struct AnimFrame {
    rect: SubRect,
    duration: u32,
    chunks: Vec<u8>,
}

/// Builds an animated WebP file from full canvases.
///
/// Each canvas is stored either whole (a keyframe) or as the smallest
/// even-aligned rectangle covering the pixels that changed since the previous
/// canvas. All frames are written without blending or disposal, so a decoder
/// reproduces every canvas exactly.
#[derive(Debug)]
pub struct WebpAnimEncoder<'t, F = WebpFrameEncoder> {
    frame_encoder: F,
    options: AnimEncoderOptions,
    tracker: Option<&'t AllocationTracker>,
    size: Option<(u32, u32)>,
    previous: Option<Tracked<'t, Canvas>>,
    pending: Option<PendingFrame>,
    frames: Vec<AnimFrame>,
    frames_since_keyframe: u32,
    has_alpha: bool,
    finished: bool,
}

impl WebpAnimEncoder<'_, WebpFrameEncoder> {
    /// Creates an encoder using the built-in frame encoder.
    #[must_use]
    pub fn new(options: AnimEncoderOptions) -> Self {
        Self::with_frame_encoder(WebpFrameEncoder::new(), options)
    }
}

impl<'t, F: FrameEncoder> WebpAnimEncoder<'t, F> {
    /// Creates an encoder that compresses frames with `frame_encoder`.
    pub fn with_frame_encoder(frame_encoder: F, mut options: AnimEncoderOptions) -> Self {
        options.keyframes = options.keyframes.sanitized();
        Self {
            frame_encoder,
            options,
            tracker: None,
            size: None,
            previous: None,
            pending: None,
            frames: Vec::new(),
            frames_since_keyframe: 0,
            has_alpha: false,
            finished: false,
        }
    }

    /// Charges the copy of the previous canvas and the per-frame crop buffers
    /// to `tracker`. Buffers allocated before this call are not charged.
    #[must_use]
    pub fn with_tracker(mut self, tracker: &'t AllocationTracker) -> Self {
        self.tracker = Some(tracker);
        self
    }

    fn check_size(&mut self, canvas: &Canvas) -> Result<()> {
        let size = (canvas.width(), canvas.height());
        match self.size {
            Some(expected) if expected != size => {
                Err(Error::invalid_input("canvas size changed between frames"))
            }
            Some(_) => Ok(()),
            None => {
                if size.0 > MAX_DIMENSION || size.1 > MAX_DIMENSION {
                    return Err(Error::new(
                        ErrorKind::EncodeFailed,
                        alloc::format!("{}x{} exceeds the WebP canvas limit", size.0, size.1),
                    ));
                }
                self.size = Some(size);
                Ok(())
            }
        }
    }

    /// Closes the pending frame now that the next entry's time is known.
    fn flush_pending(&mut self, timestamp: u32) -> Result<()> {
        let Some(pending) = self.pending.take() else {
            return Ok(());
        };
        let duration = timestamp
            .checked_sub(pending.timestamp)
            .ok_or_else(|| Error::invalid_input("timestamps must not decrease"))?
            .min(U24::MAX);
        self.has_alpha |= pending.image.has_alpha;
        self.frames
            .try_reserve(1)
            .map_err(|_| Error::out_of_memory("animation frame list"))?;
        self.frames.push(AnimFrame {
            rect: pending.rect,
            duration,
            chunks: pending.image.chunks,
        });
        Ok(())
    }

    /// Encodes `rect` of `canvas`. With mixed encoding allowed, both bitstreams
    /// are produced and the smaller one is kept.
    fn encode_rect(
        &mut self,
        canvas: &Canvas,
        rect: SubRect,
        config: &FrameConfig,
    ) -> Result<EncodedImage> {
        let pixels = crop(canvas, rect, self.tracker)?;
        let (width, height) = (rect.width, rect.height);
        let encoder = &mut self.frame_encoder;
        if !self.options.allow_mixed {
            return encoder.encode_frame(&pixels, width, height, config);
        }
        let lossless = FrameConfig {
            lossless: true,
            ..*config
        };
        let lossy = FrameConfig {
            lossless: false,
            ..*config
        };
        let exact = encoder.encode_frame(&pixels, width, height, &lossless)?;
        let approximate = encoder.encode_frame(&pixels, width, height, &lossy)?;
        trace!(
            lossless = exact.chunks.len(),
            lossy = approximate.chunks.len(),
            "mixed frame candidates"
        );
        if approximate.chunks.len() < exact.chunks.len() {
            Ok(approximate)
        } else {
            Ok(exact)
        }
    }

    /// Remembers `canvas` for the next changed-rectangle search.
    fn keep_previous(&mut self, canvas: &Canvas) -> Result<()> {
        match self.previous.as_mut() {
            Some(previous) => previous.pixels_mut().copy_from_slice(canvas.pixels()),
            None => {
                let mut previous = Tracked::raster(self.tracker, canvas.width(), canvas.height())?;
                previous.pixels_mut().copy_from_slice(canvas.pixels());
                self.previous = Some(previous);
            }
        }
        Ok(())
    }
}

impl<F: FrameEncoder> AnimationEncoder for WebpAnimEncoder<'_, F> {
    fn add_frame(
        &mut self,
        canvas: &Canvas,
        timestamp_ms: u32,
        config: &FrameConfig,
    ) -> Result<()> {
        if self.finished {
            return Err(Error::invalid_input(
                "frame added after the animation was finished",
            ));
        }
        self.check_size(canvas)?;
        self.flush_pending(timestamp_ms)?;

        let (width, height) = (canvas.width(), canvas.height());
        let full = SubRect::full(width, height);
        let distance = self.frames_since_keyframe + 1;
        let keyframes = self.options.keyframes;

        let changed = self
            .previous
            .as_ref()
            .map(|previous| changed_rect(previous, canvas));
        let (rect, image) = match changed {
            None => (full, self.encode_rect(canvas, full, config)?),
            Some(sub) => {
                if keyframes.forces(distance) {
                    (full, self.encode_rect(canvas, full, config)?)
                } else if !keyframes.allows(distance) || sub == full {
                    (sub, self.encode_rect(canvas, sub, config)?)
                } else if self.options.minimize_size {
                    let key = self.encode_rect(canvas, full, config)?;
                    let delta = self.encode_rect(canvas, sub, config)?;
                    if key.chunks.len() <= delta.chunks.len() {
                        (full, key)
                    } else {
                        (sub, delta)
                    }
                } else if sub.area() * 4 >= full.area() * 3 {
                    (full, self.encode_rect(canvas, full, config)?)
                } else {
                    (sub, self.encode_rect(canvas, sub, config)?)
                }
            }
        };

        if rect == full {
            self.frames_since_keyframe = 0;
        } else {
            self.frames_since_keyframe = distance;
        }
        trace!(
            timestamp = timestamp_ms,
            x = rect.x,
            y = rect.y,
            width = rect.width,
            height = rect.height,
            keyframe = rect == full,
            bytes = image.chunks.len(),
            "encoded animation frame"
        );

        self.keep_previous(canvas)?;
        self.pending = Some(PendingFrame {
            rect,
            image,
            timestamp: timestamp_ms,
        });
        Ok(())
    }

    fn finish(&mut self, timestamp_ms: u32) -> Result<()> {
        self.flush_pending(timestamp_ms)?;
        self.finished = true;
        self.previous = None;
        Ok(())
    }

    fn assemble(self, params: &AnimationParams) -> Result<Vec<u8>> {
        if !self.finished {
            return Err(Error::new(
                ErrorKind::EncodeFailed,
                "animation was not finished",
            ));
        }
        let Some((width, height)) = self.size.filter(|_| !self.frames.is_empty()) else {
            return Err(Error::new(
                ErrorKind::EncodeFailed,
                "animation has no frames",
            ));
        };
        debug!(
            frames = self.frames.len(),
            width,
            height,
            loop_count = params.loop_count,
            "writing animated WebP"
        );
        write_container(width, height, self.has_alpha, params, &self.frames)
            .map_err(container_error)
    }
}

fn write_container(
    width: u32,
    height: u32,
    has_alpha: bool,
    params: &AnimationParams,
    frames: &[AnimFrame],
) -> io::Result<Vec<u8>> {
    let mut body = Vec::new();
    body.write_all(b"WEBP")?;

    let mut flags = VP8X_FLAG_ANIMATION;
    if has_alpha {
        flags |= VP8X_FLAG_ALPHA;
    }
    let mut vp8x = Vec::with_capacity(10);
    vp8x.write_le(flags)?;
    vp8x.write_le(U24(0))?;
    vp8x.write_le(U24(width - 1))?;
    vp8x.write_le(U24(height - 1))?;
    write_chunk(&mut body, *b"VP8X", &vp8x)?;

    let [r, g, b, a] = params.background;
    let mut anim = Vec::with_capacity(6);
    anim.write_all(&[b, g, r, a])?;
    anim.write_le(params.loop_count)?;
    write_chunk(&mut body, *b"ANIM", &anim)?;

    let mut anmf = Vec::new();
    for frame in frames {
        anmf.clear();
        anmf.write_le(U24(frame.rect.x / 2))?;
        anmf.write_le(U24(frame.rect.y / 2))?;
        anmf.write_le(U24(frame.rect.width - 1))?;
        anmf.write_le(U24(frame.rect.height - 1))?;
        anmf.write_le(U24(frame.duration))?;
        anmf.write_le(ANMF_FLAG_NO_BLEND)?;
        anmf.write_all(&frame.chunks)?;
        write_chunk(&mut body, *b"ANMF", &anmf)?;
    }

    let size = u32::try_from(body.len())
        .map_err(|_| io::Error::other("animation exceeds 4 GiB"))?;
    let mut out = Vec::new();
    out.try_reserve_exact(body.len() + 8)
        .map_err(|_| io::Error::from(io::ErrorKind::OutOfMemory))?;
    out.write_all(b"RIFF")?;
    out.write_le(size)?;
    out.write_all(&body)?;
    Ok(out)
}

/// Smallest rectangle with even offsets covering every pixel that differs
/// between `a` and `b`; a single pixel at the origin if they are equal.
fn changed_rect(a: &Canvas, b: &Canvas) -> SubRect {
    let width = a.width() as usize;
    let (mut min_x, mut min_y, mut max_x, mut max_y) = (usize::MAX, usize::MAX, 0, 0);
    let rows_a = a.pixels().chunks_exact(width * 4);
    let rows_b = b.pixels().chunks_exact(width * 4);
    for (y, (row_a, row_b)) in rows_a.zip(rows_b).enumerate() {
        if row_a == row_b {
            continue;
        }
        let mut pixels = row_a.chunks_exact(4).zip(row_b.chunks_exact(4));
        let Some(first) = pixels.position(|(p, q)| p != q) else {
            continue;
        };
        let last = row_a
            .chunks_exact(4)
            .zip(row_b.chunks_exact(4))
            .rposition(|(p, q)| p != q)
            .unwrap_or(first);
        min_x = min_x.min(first);
        max_x = max_x.max(last);
        min_y = min_y.min(y);
        max_y = y;
    }
    if min_y == usize::MAX {
        return SubRect {
            x: 0,
            y: 0,
            width: 1,
            height: 1,
        };
    }
    let x = (min_x & !1) as u32;
    let y = (min_y & !1) as u32;
    SubRect {
        x,
        y,
        width: max_x as u32 + 1 - x,
        height: max_y as u32 + 1 - y,
    }
}

fn crop<'t>(
    canvas: &Canvas,
    rect: SubRect,
    tracker: Option<&'t AllocationTracker>,
) -> Result<Tracked<'t, Vec<u8>>> {
    let row_len = rect.width as usize * 4;
    let mut out = Tracked::zeroed(tracker, rect.area() as usize * 4, "frame crop buffer")?;
    let stride = canvas.width() as usize * 4;
    let rows = canvas.pixels().chunks_exact(stride).skip(rect.y as usize);
    for (dst, src) in out.chunks_exact_mut(row_len).zip(rows) {
        dst.copy_from_slice(&src[rect.x as usize * 4..][..row_len]);
    }
    Ok(out)
}

/// A still image obtained from a [`RasterDecoder`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedRaster {
    /// The RGBA pixels of the first frame.
    pub raster: Raster,
    /// Frames in the source; greater than one for animations.
    pub frame_count: u32,
}

/// Decodes container bytes into one RGBA raster.
pub trait RasterDecoder {
    /// Decodes the first frame of `data`.
    fn decode(&mut self, data: &[u8]) -> Result<DecodedRaster>;
}

/// WebP decoder backed by `image-webp`.
#[derive(Debug, Default, Clone, Copy)]
pub struct WebpRasterDecoder;

impl WebpRasterDecoder {
    /// Creates the decoder.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl RasterDecoder for WebpRasterDecoder {
    fn decode(&mut self, data: &[u8]) -> Result<DecodedRaster> {
        if !is_webp(data) {
            return Err(Error::new(
                ErrorKind::UnsupportedFormat,
                "input is not a WebP file",
            ));
        }
        let mut decoder = WebPDecoder::new(Cursor::new(data)).map_err(decode_error)?;
        let (width, height) = decoder.dimensions();
        let len = decoder
            .output_buffer_size()
            .ok_or_else(|| Error::out_of_memory("image dimensions overflow"))?;
        let mut buf = Vec::new();
        buf.try_reserve_exact(len)
            .map_err(|_| Error::out_of_memory("decoded image buffer"))?;
        buf.resize(len, 0);

        let frame_count = if decoder.is_animated() {
            let frames = decoder.num_frames();
            decoder.read_frame(&mut buf).map_err(decode_error)?;
            if frames > 1 {
                warn!(frames, "animated WebP flattened to its first frame");
            }
            frames
        } else {
            decoder.read_image(&mut buf).map_err(decode_error)?;
            1
        };

        let pixels = (width as usize) * (height as usize);
        let rgba = if buf.len() == pixels * 3 {
            let mut rgba = Vec::new();
            rgba.try_reserve_exact(pixels * 4)
                .map_err(|_| Error::out_of_memory("RGBA expansion buffer"))?;
            for px in buf.chunks_exact(3) {
                rgba.extend_from_slice(&[px[0], px[1], px[2], 0xFF]);
            }
            rgba
        } else {
            buf
        };
        Ok(DecodedRaster {
            raster: Raster::from_rgba(width, height, rgba)?,
            frame_count,
        })
    }
}

#[cold]
fn decode_error(err: image_webp::DecodingError) -> Error {
    Error::with_source(ErrorKind::DecodeFailed, "malformed WebP data", err)
}
