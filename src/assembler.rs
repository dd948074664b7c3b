//! Hands composited canvases to an animation encoder and settles the loop count.

use alloc::vec::Vec;

use tracing::debug;

use crate::common::Canvas;
use crate::compositor::FrameSink;
use crate::error::{Error, ErrorKind, Result};

/// Encode settings applied identically to every frame.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct FrameConfig {
    /// Quality factor in `0.0..=100.0`.
    pub quality: f32,
    /// Encode losslessly.
    pub lossless: bool,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            quality: 75.0,
            lossless: false,
        }
    }
}

/// Distance bounds, in frames, between two keyframes.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct KeyframeBounds {
    /// A keyframe is never placed closer than this to the previous one.
    pub kmin: u32,
    /// A keyframe is always placed this far from the previous one; 0 disables that.
    pub kmax: u32,
}

impl KeyframeBounds {
    /// Fills in unset bounds from the encoding mode.
    ///
    /// Lossless encoding defaults to `9..17`, lossy encoding to `3..5`.
    #[must_use]
    pub fn resolve(kmin: Option<u32>, kmax: Option<u32>, lossless: bool) -> Self {
        let (default_min, default_max) = if lossless { (9, 17) } else { (3, 5) };
        Self {
            kmin: kmin.unwrap_or(default_min),
            kmax: kmax.unwrap_or(default_max),
        }
    }

    /// Brings the bounds into a consistent state.
    ///
    /// `kmax == 0` turns forced keyframes off, `kmax == 1` makes every frame a
    /// keyframe, and otherwise `kmin` is kept strictly below `kmax`.
    #[must_use]
    pub fn sanitized(self) -> Self {
        match self.kmax {
            0 => Self {
                kmin: u32::MAX,
                kmax: 0,
            },
            1 => Self { kmin: 0, kmax: 1 },
            kmax => Self {
                kmin: self.kmin.min(kmax - 1),
                kmax,
            },
        }
    }

    /// Whether a frame `distance` frames after the last keyframe must be one.
    #[must_use]
    pub fn forces(&self, distance: u32) -> bool {
        self.kmax != 0 && distance >= self.kmax
    }

    /// Whether a frame `distance` frames after the last keyframe may be one.
    #[must_use]
    pub fn allows(&self, distance: u32) -> bool {
        self.kmax != 0 && distance >= self.kmin
    }
}

/// Container-level parameters supplied when the animation is assembled.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct AnimationParams {
    /// Number of plays; 0 loops forever.
    pub loop_count: u16,
    /// Background color hint as RGBA.
    pub background: [u8; 4],
}

/// An encoder producing an animation container from full canvases.
///
/// Mirrors the usual add-frames-then-assemble shape of animation encoders:
/// [`add_frame`](Self::add_frame) is called once per canvas with
/// non-decreasing timestamps, [`finish`](Self::finish) once with the time the
/// last frame ends, and [`assemble`](Self::assemble) once to obtain the bytes.
pub trait AnimationEncoder {
    /// Adds a canvas shown from `timestamp_ms` on.
    fn add_frame(&mut self, canvas: &Canvas, timestamp_ms: u32, config: &FrameConfig) -> Result<()>;

    /// Closes the stream; the last frame is shown until `timestamp_ms`.
    fn finish(&mut self, timestamp_ms: u32) -> Result<()>;

    /// Produces the container.
    fn assemble(self, params: &AnimationParams) -> Result<Vec<u8>>
    where
        Self: Sized;
}

/// Inputs of the loop-count decision.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct LoopPolicy {
    /// Number of frames in the animation.
    pub frame_count: u32,
    /// A loop-count extension was present in the source.
    pub had_loop_extension: bool,
    /// Value of that extension.
    pub loop_value: u16,
    /// Reproduce the loop handling of older converters.
    pub compatibility: bool,
    /// Loop count requested by the caller.
    pub override_count: Option<u16>,
}

impl LoopPolicy {
    /// Loop count for the target container, where 0 means forever and other
    /// values count total plays.
    ///
    /// GIF counts repeats after the first play, so finite values gain one. In
    /// compatibility mode that adjustment is skipped and any finite loop is
    /// written as a single play.
    #[must_use]
    pub fn resolve(&self) -> u16 {
        if let Some(count) = self.override_count {
            return count;
        }
        if self.frame_count == 1 {
            return 0;
        }
        if self.compatibility {
            return u16::from(self.loop_value != 0);
        }
        match (self.had_loop_extension, self.loop_value) {
            (false, _) => 1,
            (true, 0) => 0,
            (true, u16::MAX) => u16::MAX,
            (true, n) => n + 1,
        }
    }
}

/// Streams composited canvases into an [`AnimationEncoder`].
#[derive(Debug)]
pub struct Assembler<E> {
    encoder: E,
    config: FrameConfig,
    frame_count: u32,
    last_timestamp: Option<u32>,
}

impl<E: AnimationEncoder> Assembler<E> {
    /// Creates an assembler that encodes every frame with `config`.
    pub fn new(encoder: E, config: FrameConfig) -> Self {
        Self {
            encoder,
            config,
            frame_count: 0,
            last_timestamp: None,
        }
    }

    /// Frames forwarded so far.
    #[must_use]
    pub fn frame_count(&self) -> u32 {
        self.frame_count
    }

    /// Sends the closing entry at `end_timestamp` and assembles the container.
    ///
    /// `policy.frame_count` is taken from the frames actually forwarded.
    pub fn finish(
        mut self,
        end_timestamp: u32,
        mut policy: LoopPolicy,
        background: [u8; 4],
    ) -> Result<Vec<u8>> {
        if self.frame_count == 0 {
            return Err(Error::new(
                ErrorKind::EncodeFailed,
                "animation has no frames",
            ));
        }
        if self.last_timestamp.is_some_and(|last| end_timestamp < last) {
            return Err(Error::invalid_input(
                "end timestamp precedes the last frame",
            ));
        }
        self.encoder.finish(end_timestamp)?;
        policy.frame_count = self.frame_count;
        let loop_count = policy.resolve();
        debug!(frames = self.frame_count, loop_count, ?policy, "assembling animation");
        self.encoder.assemble(&AnimationParams {
            loop_count,
            background,
        })
    }
}

impl<E: AnimationEncoder> FrameSink for Assembler<E> {
    fn push_frame(&mut self, canvas: &Canvas, timestamp_ms: u32) -> Result<()> {
        if self.last_timestamp.is_some_and(|last| timestamp_ms < last) {
            return Err(Error::invalid_input("frame timestamps must not decrease"));
        }
        self.encoder.add_frame(canvas, timestamp_ms, &self.config)?;
        self.last_timestamp = Some(timestamp_ms);
        self.frame_count += 1;
        Ok(())
    }
}
