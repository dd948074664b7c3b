#![forbid(unsafe_code)]
//! # GIF to animated WebP transcoding
//!
//! This library turns animated GIF files into animated WebP files, and WebP
//! images back into still GIF files.
//!
//! ## GIF to WebP
//!
//! Every GIF frame is composited onto a canvas the way a viewer would show it,
//! honoring transparency and the three disposal methods. Each resulting canvas
//! is handed, with its start time, to an animation encoder. The loop count is
//! carried over from the `NETSCAPE2.0` extension, converted from GIF's
//! "repeats after the first play" to WebP's "total plays".
//!
//! ```rust,no_run
//! use gifwebp::{Gif2Webp, GifToWebpOptions};
//!
//! let mut options = GifToWebpOptions::new();
//! options.set_lossless(true);
//! let gif = std::fs::read("animation.gif").unwrap();
//! let webp = Gif2Webp::new(options).run(&gif).unwrap();
//! std::fs::write("animation.webp", webp).unwrap();
//! ```
//!
//! The compositing stage is available on its own through [`composite_records`]
//! with any [`FrameSink`], and any [`AnimationEncoder`] can take the place of
//! the built-in [`WebpAnimEncoder`] via [`gif_to_animation`].
//!
//! ## WebP to GIF
//!
//! The reverse direction decodes one raster, maps it onto a fixed 256-color
//! palette (a 6x6x6 color cube, a gray ramp, and a transparency index) and
//! writes a single-frame GIF. Animated GIF output is not supported: for an
//! animated source only the first frame is written, and
//! [`GifConversion::animation_dropped`] says so.
//!
//! ```rust,no_run
//! use gifwebp::{webp_to_gif, WebpToGifOptions};
//!
//! let webp = std::fs::read("image.webp").unwrap();
//! let gif = webp_to_gif(&webp, &WebpToGifOptions::new()).unwrap();
//! assert!(!gif.animation_dropped);
//! std::fs::write("image.gif", gif.data).unwrap();
//! ```
//!
//! ## Memory
//!
//! The forward path holds two canvases and the encoder's copy of the previous
//! canvas, plus the buffers of one frame at a time, regardless of the number of
//! frames. A frame only allocates its on-canvas part and one row of its
//! declared width. Pass an [`AllocationTracker`] to the `*_tracked` functions
//! to observe or limit those allocations.
//!
//! ## Logging
//!
//! Progress is reported through [`tracing`] at `debug` and `trace` level;
//! lossy fallbacks are reported at `warn`. No subscriber is installed.
#![deny(missing_docs)]
#![allow(unknown_lints)] // Certain lints only apply to later versions of Rust
#![allow(clippy::manual_range_contains)]
#![deny(clippy::alloc_instead_of_core)]
#![deny(clippy::std_instead_of_alloc)]
#![deny(clippy::std_instead_of_core)]

#[macro_use]
extern crate alloc;

mod assembler;
mod common;
mod compositor;
mod control;
mod encoder;
mod error;
mod frame;
mod memory;
mod quantize;
mod reader;
mod traits;
mod transcode;
mod webp;

pub use crate::common::{Canvas, DisposalMethod, FrameRect, Raster};
pub use crate::error::{Error, ErrorKind, Result};
pub use crate::memory::AllocationTracker;

pub use crate::control::{GraphicsControl, LoopExtension};
pub use crate::reader::{DecodingError, DecodingFormatError, LogicalScreen, Version};

pub use crate::compositor::{
    composite_records, AnimationTimeline, CompositeSummary, Compositor, FrameSink,
};

pub use crate::assembler::{
    AnimationEncoder, AnimationParams, Assembler, FrameConfig, KeyframeBounds, LoopPolicy,
};
pub use crate::webp::{
    AnimEncoderOptions, DecodedRaster, EncodedImage, FrameEncoder, RasterDecoder, WebpAnimEncoder,
    WebpFrameEncoder, WebpRasterDecoder,
};

pub use crate::encoder::{
    write_static_gif, Encoder, EncodingError, EncodingFormatError, IndexedFrame,
};
pub use crate::quantize::{cube_index, quantize, Palette, QuantizedRaster, TRANSPARENT_INDEX};

pub use crate::transcode::{
    gif_to_animation, gif_to_webp, gif_to_webp_tracked, raster_to_gif, webp_to_gif,
    webp_to_gif_tracked, Gif2Webp, GifConversion, GifToWebpOptions, Webp2Gif, WebpToGifOptions,
};

/// Low-level access to the GIF block structure.
pub mod streaming_decoder {
    pub use crate::common::{Block, Extension};
    pub use crate::reader::{ExtensionBlock, ImageDescriptor, Record, RecordReader};
}

/// WebP container helpers.
pub mod riff {
    pub use crate::webp::{is_webp, RiffChunks, MAX_DIMENSION};
}
