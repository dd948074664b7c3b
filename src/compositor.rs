//! Reconstruction of the visible canvas of a GIF animation.
//!
//! The [`Compositor`] consumes image descriptors one at a time together with
//! the graphics control state that preceded them. For every frame it
//!
//! 1. snapshots the canvas if the frame will later ask to restore it,
//! 2. decodes the frame and draws its opaque pixels over the canvas,
//! 3. hands the canvas and the frame's start time to a [`FrameSink`],
//! 4. advances the running timestamp, and
//! 5. applies the frame's disposal so the canvas is ready for the next one.
//!
//! The canvas and its snapshot are two independently owned buffers of the same
//! size, allocated on the first frame and dropped with the compositor.

use alloc::vec::Vec;

use tracing::{debug, trace};

use crate::common::{Canvas, DisposalMethod, FrameRect};
use crate::control::{GraphicsControl, LoopExtension};
use crate::error::Result;
use crate::frame::decode_frame;
use crate::memory::{AllocationTracker, Tracked};
use crate::reader::{DecodingFormatError, ImageDescriptor, LogicalScreen, Record, RecordReader};

/// Alpha at or above which a decoded pixel replaces the canvas pixel.
const ALPHA_THRESHOLD: u8 = 0x80;

/// Frames whose delay is at most this many centiseconds are shown for [`MIN_FRAME_DURATION_MS`].
const MIN_FRAME_DELAY: u16 = 10;

/// Display time given to frames with a near-zero delay.
const MIN_FRAME_DURATION_MS: u32 = 100;

/// Pixel value of cleared canvas areas: transparent black.
const BACKGROUND: [u8; 4] = [0, 0, 0, 0];

/// Receives each composited canvas in display order.
pub trait FrameSink {
    /// Called once per frame with the canvas as it should be shown from `timestamp_ms` on.
    fn push_frame(&mut self, canvas: &Canvas, timestamp_ms: u32) -> Result<()>;

    /// Called when compositing fails after some frames may have been pushed.
    ///
    /// Those frames do not form an animation and should be dropped.
    fn discard(&mut self) {}
}

/// A sink that keeps a copy of every canvas.
///
/// Memory grows with the number of frames; streaming sinks such as
/// [`Assembler`](crate::Assembler) should be preferred for large inputs.
#[derive(Debug, Clone, Default)]
pub struct AnimationTimeline {
    entries: Vec<(Canvas, u32)>,
}

impl AnimationTimeline {
    /// Creates an empty timeline.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The recorded `(canvas, timestamp)` pairs in display order.
    #[must_use]
    pub fn entries(&self) -> &[(Canvas, u32)] {
        &self.entries
    }

    /// Number of frames recorded.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if no frame was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Consumes the timeline.
    #[must_use]
    pub fn into_entries(self) -> Vec<(Canvas, u32)> {
        self.entries
    }
}

impl FrameSink for AnimationTimeline {
    fn push_frame(&mut self, canvas: &Canvas, timestamp_ms: u32) -> Result<()> {
        self.entries
            .try_reserve(1)
            .map_err(|_| crate::Error::out_of_memory("animation timeline"))?;
        self.entries.push((canvas.clone(), timestamp_ms));
        Ok(())
    }

    fn discard(&mut self) {
        self.entries.clear();
    }
}

struct Screens<'t> {
    canvas: Tracked<'t, Canvas>,
    previous: Tracked<'t, Canvas>,
}

impl Screens<'_> {
    fn save(&mut self) {
        self.previous
            .pixels_mut()
            .copy_from_slice(self.canvas.pixels());
    }

    fn restore(&mut self) {
        self.canvas
            .pixels_mut()
            .copy_from_slice(self.previous.pixels());
    }
}

/// Applies GIF blend and disposal rules frame by frame.
pub struct Compositor<'t> {
    screens: Option<Screens<'t>>,
    timestamp: u32,
    frame_count: u32,
    tracker: Option<&'t AllocationTracker>,
}

impl<'t> Compositor<'t> {
    /// Creates a compositor in the uninitialized state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            screens: None,
            timestamp: 0,
            frame_count: 0,
            tracker: None,
        }
    }

    /// Creates a compositor that charges its buffers to `tracker`.
    #[must_use]
    pub fn with_tracker(tracker: &'t AllocationTracker) -> Self {
        Self {
            tracker: Some(tracker),
            ..Self::new()
        }
    }

    /// The canvas, once the first frame has been seen.
    #[must_use]
    pub fn canvas(&self) -> Option<&Canvas> {
        self.screens.as_ref().map(|s| &*s.canvas)
    }

    /// Start time of the next frame, which is also the end time of the last one.
    #[must_use]
    pub fn timestamp(&self) -> u32 {
        self.timestamp
    }

    /// Number of frames composited so far.
    #[must_use]
    pub fn frame_count(&self) -> u32 {
        self.frame_count
    }

    /// Composites one frame and resets `control` afterwards.
    pub fn composite_frame(
        &mut self,
        screen: &LogicalScreen,
        desc: &ImageDescriptor<'_>,
        control: &mut GraphicsControl,
        sink: &mut dyn FrameSink,
    ) -> Result<()> {
        let mut rect = desc.rect;
        let screens = match self.screens.take() {
            Some(screens) => screens,
            None => self.allocate(screen, &mut rect)?,
        };
        let screens = self.screens.insert(screens);
        let (canvas_width, canvas_height) = (screens.canvas.width(), screens.canvas.height());
        if rect.is_empty() {
            rect = FrameRect::full(canvas_width as u16, canvas_height as u16);
        }

        if control.disposal == DisposalMethod::RestorePrevious {
            screens.save();
        }

        let frame = decode_frame(
            desc,
            rect,
            (canvas_width, canvas_height),
            screen.global_palette.as_deref(),
            control.transparent,
            self.tracker,
        )?;
        if let Some(frame) = frame {
            blend(&mut screens.canvas, &frame, rect);
        }

        sink.push_frame(&screens.canvas, self.timestamp)?;

        let duration = if control.delay <= MIN_FRAME_DELAY {
            MIN_FRAME_DURATION_MS
        } else {
            control.delay_ms()
        };
        trace!(
            frame = self.frame_count,
            timestamp = self.timestamp,
            duration,
            disposal = ?control.disposal,
            "composited frame"
        );
        self.timestamp = self.timestamp.saturating_add(duration);
        self.frame_count += 1;

        match control.disposal {
            DisposalMethod::None => {}
            DisposalMethod::RestoreBackground => clear(&mut screens.canvas, rect),
            DisposalMethod::RestorePrevious => screens.restore(),
        }
        control.reset();
        Ok(())
    }

    /// Allocates canvas and snapshot on the first frame.
    ///
    /// A degenerate logical screen is replaced by the first frame's size, with
    /// that frame moved to the origin.
    fn allocate(&self, screen: &LogicalScreen, rect: &mut FrameRect) -> Result<Screens<'t>> {
        let (width, height) = if screen.width == 0 || screen.height == 0 {
            rect.left = 0;
            rect.top = 0;
            (rect.width, rect.height)
        } else {
            (screen.width, screen.height)
        };
        if width == 0 || height == 0 {
            return Err(DecodingFormatError::InvalidCanvasSize.into());
        }
        debug!(width, height, "allocating canvas");
        Ok(Screens {
            canvas: Tracked::raster(self.tracker, u32::from(width), u32::from(height))?,
            previous: Tracked::raster(self.tracker, u32::from(width), u32::from(height))?,
        })
    }
}

impl Default for Compositor<'_> {
    fn default() -> Self {
        Self::new()
    }
}

/// Copies every pixel of `frame` with alpha at or above the threshold onto `canvas` at `rect`.
///
/// `frame` holds only the part of `rect` that lies on the canvas.
fn blend(canvas: &mut Canvas, frame: &Canvas, rect: FrameRect) {
    let canvas_width = canvas.width() as usize;
    let frame_width = frame.width() as usize;
    let (x, y, w, h) = rect.clip(canvas.width(), canvas.height());
    let (x, y, w, h) = (x as usize, y as usize, w as usize, h as usize);
    let src = frame.pixels();
    let dst = canvas.pixels_mut();
    for row in 0..h {
        let src_row = &src[row * frame_width * 4..][..w * 4];
        let dst_row = &mut dst[((y + row) * canvas_width + x) * 4..][..w * 4];
        for (d, s) in dst_row.chunks_exact_mut(4).zip(src_row.chunks_exact(4)) {
            if s[3] >= ALPHA_THRESHOLD {
                d.copy_from_slice(s);
            }
        }
    }
}

/// Resets the pixels of `rect` to the background.
fn clear(canvas: &mut Canvas, rect: FrameRect) {
    let canvas_width = canvas.width() as usize;
    let (x, y, w, h) = rect.clip(canvas.width(), canvas.height());
    let (x, y, w, h) = (x as usize, y as usize, w as usize, h as usize);
    let dst = canvas.pixels_mut();
    for row in y..y + h {
        for px in dst[(row * canvas_width + x) * 4..][..w * 4].chunks_exact_mut(4) {
            px.copy_from_slice(&BACKGROUND);
        }
    }
}

/// Summary of a fully composited stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompositeSummary {
    /// Number of frames handed to the sink.
    pub frame_count: u32,
    /// Canvas width.
    pub width: u32,
    /// Canvas height.
    pub height: u32,
    /// Timestamp at which the last frame ends.
    pub end_timestamp: u32,
    /// Loop-count information found in the stream.
    pub loop_extension: LoopExtension,
    /// Background color as RGBA; transparent white when the GIF has none or it is the
    /// transparent color of the first frame.
    pub background: [u8; 4],
}

/// Runs every record of `reader` through a [`Compositor`] into `sink`.
///
/// Unknown extensions are skipped. Fails on the first malformed record, after
/// calling [`FrameSink::discard`]; a stream without any image fails with
/// [`InvalidCanvasSize`](DecodingFormatError::InvalidCanvasSize).
pub fn composite_records(
    reader: RecordReader<'_>,
    sink: &mut dyn FrameSink,
    tracker: Option<&AllocationTracker>,
) -> Result<CompositeSummary> {
    let summary = composite_stream(reader, sink, tracker);
    if summary.is_err() {
        sink.discard();
    }
    summary
}

fn composite_stream(
    mut reader: RecordReader<'_>,
    sink: &mut dyn FrameSink,
    tracker: Option<&AllocationTracker>,
) -> Result<CompositeSummary> {
    let screen = reader.screen().clone();
    let mut compositor = match tracker {
        Some(tracker) => Compositor::with_tracker(tracker),
        None => Compositor::new(),
    };
    let mut control = GraphicsControl::default();
    let mut loop_extension = LoopExtension::default();
    let mut background = [0xFF, 0xFF, 0xFF, 0];

    loop {
        match reader.next_record()? {
            Record::ImageDescriptor(desc) => {
                if compositor.frame_count() == 0 {
                    background = background_color(&screen, control.transparent);
                }
                compositor
                    .composite_frame(&screen, &desc, &mut control, sink)?;
            }
            Record::Extension(ext) => {
                if let Some(parsed) = GraphicsControl::parse(&ext) {
                    control = parsed;
                } else if loop_extension.update(&ext) {
                    debug!(value = loop_extension.value, "loop count extension");
                } else {
                    trace!(label = ext.label, "skipping extension");
                }
            }
            Record::Terminate => break,
        }
    }

    let (width, height) = compositor
        .canvas()
        .map(|c| (c.width(), c.height()))
        .ok_or(DecodingFormatError::InvalidCanvasSize)?;
    Ok(CompositeSummary {
        frame_count: compositor.frame_count(),
        width,
        height,
        end_timestamp: compositor.timestamp(),
        loop_extension,
        background,
    })
}

fn background_color(screen: &LogicalScreen, transparent: Option<u8>) -> [u8; 4] {
    match screen.background_color() {
        Some(_) if transparent == Some(screen.background_index) => [0xFF, 0xFF, 0xFF, 0],
        Some([r, g, b]) => [r, g, b, 0xFF],
        None => [0xFF, 0xFF, 0xFF, 0],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::Version;

    const RED: [u8; 4] = [255, 0, 0, 255];
    const GREEN: [u8; 4] = [0, 255, 0, 255];
    const BLUE: [u8; 4] = [0, 0, 255, 255];

    /// A compositor over a screen whose global table is black, red, green, blue.
    struct Scene<'t> {
        screen: LogicalScreen,
        compositor: Compositor<'t>,
        timeline: AnimationTimeline,
        control: GraphicsControl,
    }

    impl<'t> Scene<'t> {
        fn new(width: u16, height: u16) -> Self {
            Self::with_compositor(width, height, Compositor::new())
        }

        fn with_compositor(width: u16, height: u16, compositor: Compositor<'t>) -> Self {
            Self {
                screen: LogicalScreen {
                    version: Version::V89a,
                    width,
                    height,
                    background_index: 0,
                    global_palette: Some(vec![0, 0, 0, 255, 0, 0, 0, 255, 0, 0, 0, 255]),
                },
                compositor,
                timeline: AnimationTimeline::new(),
                control: GraphicsControl::default(),
            }
        }

        fn frame(&mut self, rect: FrameRect, indices: &[u8]) {
            let data = weezl::encode::Encoder::new(weezl::BitOrder::Lsb, 2)
                .encode(indices)
                .unwrap();
            let desc = ImageDescriptor {
                rect,
                interlaced: false,
                local_palette: None,
                min_code_size: 2,
                data: vec![&data[..]],
            };
            self.compositor
                .composite_frame(&self.screen, &desc, &mut self.control, &mut self.timeline)
                .unwrap();
        }

        fn canvas(&self) -> &Canvas {
            self.compositor.canvas().unwrap()
        }
    }

    fn rect(left: u16, top: u16, width: u16, height: u16) -> FrameRect {
        FrameRect {
            left,
            top,
            width,
            height,
        }
    }

    #[test]
    fn restore_background_clears_rect_before_next_frame() {
        let mut scene = Scene::new(4, 4);
        scene.control = GraphicsControl {
            disposal: DisposalMethod::RestoreBackground,
            delay: 20,
            transparent: None,
        };
        scene.frame(FrameRect::full(4, 4), &[1; 16]);
        assert_eq!(scene.control, GraphicsControl::default());
        scene.frame(rect(1, 1, 2, 2), &[2; 4]);

        let (first, t0) = &scene.timeline.entries()[0];
        let (second, t1) = &scene.timeline.entries()[1];
        assert_eq!((*t0, *t1), (0, 200));
        assert_eq!(first.pixel(0, 0), Some(RED));
        for y in 0..4 {
            for x in 0..4 {
                let inside = (1..3).contains(&x) && (1..3).contains(&y);
                let expected = if inside { GREEN } else { BACKGROUND };
                assert_eq!(second.pixel(x, y), Some(expected), "pixel {x},{y}");
            }
        }
    }

    #[test]
    fn restore_previous_returns_to_snapshot() {
        let mut scene = Scene::new(2, 1);
        scene.frame(FrameRect::full(2, 1), &[1, 1]);
        scene.control.disposal = DisposalMethod::RestorePrevious;
        scene.frame(FrameRect::full(2, 1), &[2, 3]);
        assert_eq!(scene.canvas().pixel(0, 0), Some(RED));
        assert_eq!(scene.canvas().pixel(1, 0), Some(RED));

        scene.frame(rect(1, 0, 1, 1), &[3]);
        let (third, _) = &scene.timeline.entries()[2];
        assert_eq!(third.pixel(0, 0), Some(RED));
        assert_eq!(third.pixel(1, 0), Some(BLUE));
        assert_eq!(scene.timeline.entries()[1].0.pixel(1, 0), Some(BLUE));
    }

    #[test]
    fn transparent_pixels_keep_canvas() {
        let mut scene = Scene::new(2, 1);
        scene.frame(FrameRect::full(2, 1), &[1, 1]);
        scene.control.transparent = Some(0);
        scene.frame(FrameRect::full(2, 1), &[0, 2]);
        let (second, _) = &scene.timeline.entries()[1];
        assert_eq!(second.pixel(0, 0), Some(RED));
        assert_eq!(second.pixel(1, 0), Some(GREEN));
    }

    #[test]
    fn short_delays_are_raised() {
        let mut scene = Scene::new(1, 1);
        for delay in [0, 10, 11] {
            scene.control.delay = delay;
            scene.frame(FrameRect::full(1, 1), &[1]);
        }
        let stamps: Vec<u32> = scene.timeline.entries().iter().map(|(_, t)| *t).collect();
        assert_eq!(stamps, [0, 100, 200]);
        assert_eq!(scene.compositor.timestamp(), 310);
    }

    #[test]
    fn degenerate_screen_uses_first_frame() {
        let mut scene = Scene::new(0, 0);
        scene.frame(rect(5, 5, 3, 2), &[1; 6]);
        assert_eq!((scene.canvas().width(), scene.canvas().height()), (3, 2));
        assert_eq!(scene.canvas().pixel(0, 0), Some(RED));
    }

    #[test]
    fn zero_sized_rect_covers_canvas() {
        let mut scene = Scene::new(2, 2);
        scene.frame(FrameRect::default(), &[3; 4]);
        assert_eq!(scene.canvas().pixel(1, 1), Some(BLUE));
    }

    #[test]
    fn frames_are_clipped_to_canvas() {
        let tracker = AllocationTracker::new();
        let mut scene = Scene::with_compositor(2, 2, Compositor::with_tracker(&tracker));
        scene.frame(rect(1, 1, 2, 2), &[1, 2, 3, 1]);
        assert_eq!(scene.canvas().pixel(1, 1), Some(RED));
        assert_eq!(scene.canvas().pixel(0, 0), Some(BACKGROUND));
        // Two canvases, one source row, then one visible index and its pixel.
        assert_eq!(tracker.peak(), 2 * 16 + 2 + 1 + 4);
    }

    #[test]
    fn buffers_are_released_with_compositor() {
        let tracker = AllocationTracker::new();
        {
            let mut scene = Scene::with_compositor(3, 3, Compositor::with_tracker(&tracker));
            scene.frame(FrameRect::full(3, 3), &[1; 9]);
            assert_eq!(tracker.outstanding(), 2 * 36);
        }
        assert_eq!(tracker.outstanding(), 0);
        assert_eq!(tracker.peak(), 3 * 36 + 3 + 9);
    }

    #[test]
    fn failed_stream_leaves_timeline_empty() {
        let mut gif = b"GIF89a\x02\x00\x01\x00\x80\x00\x00".to_vec();
        gif.extend_from_slice(&[0, 0, 0, 255, 0, 0]);
        // A complete red frame, then one whose data ends after the first pixel.
        gif.extend_from_slice(&[0x2C, 0, 0, 0, 0, 2, 0, 1, 0, 0, 2, 2, 0x4C, 0x0A, 0]);
        gif.extend_from_slice(&[0x2C, 0, 0, 0, 0, 2, 0, 1, 0, 0, 2, 2, 0x4C, 0x01, 0]);
        gif.push(0x3B);

        let mut timeline = AnimationTimeline::new();
        let reader = RecordReader::new(&gif).unwrap();
        let err = composite_records(reader, &mut timeline, None).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::DecodeFailed);
        assert!(timeline.is_empty());

        let complete = [&gif[..gif.len() - 16], &[0x3B][..]].concat();
        let reader = RecordReader::new(&complete).unwrap();
        let summary = composite_records(reader, &mut timeline, None).unwrap();
        assert_eq!(summary.frame_count, 1);
        assert_eq!(timeline.len(), 1);
    }
}
