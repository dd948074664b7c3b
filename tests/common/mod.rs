#![allow(dead_code)]

use std::io::Cursor;

use weezl::{encode::Encoder as LzwEncoder, BitOrder};

pub const BLACK: [u8; 3] = [0, 0, 0];
pub const RED: [u8; 3] = [255, 0, 0];
pub const GREEN: [u8; 3] = [0, 255, 0];
pub const BLUE: [u8; 3] = [0, 0, 255];

/// Disposal values as stored in the graphics control block.
pub const KEEP: u8 = 1;
pub const RESTORE_BACKGROUND: u8 = 2;
pub const RESTORE_PREVIOUS: u8 = 3;

/// Assembles GIF89a files block by block.
pub struct GifBuilder {
    out: Vec<u8>,
}

impl GifBuilder {
    pub fn new(width: u16, height: u16, palette: &[[u8; 3]]) -> Self {
        Self::with_background(width, height, palette, 0)
    }

    pub fn with_background(width: u16, height: u16, palette: &[[u8; 3]], background: u8) -> Self {
        let mut out = b"GIF89a".to_vec();
        out.extend_from_slice(&width.to_le_bytes());
        out.extend_from_slice(&height.to_le_bytes());
        if palette.is_empty() {
            out.extend_from_slice(&[0, background, 0]);
        } else {
            let bits = table_bits(palette.len());
            out.extend_from_slice(&[0x80 | 0x70 | bits, background, 0]);
            write_table(&mut out, palette, bits);
        }
        Self { out }
    }

    pub fn loop_count(mut self, count: u16) -> Self {
        self.out.extend_from_slice(&[0x21, 0xFF, 11]);
        self.out.extend_from_slice(b"NETSCAPE2.0");
        self.out.extend_from_slice(&[3, 1]);
        self.out.extend_from_slice(&count.to_le_bytes());
        self.out.push(0);
        self
    }

    pub fn comment(mut self, text: &[u8]) -> Self {
        self.out.extend_from_slice(&[0x21, 0xFE, text.len() as u8]);
        self.out.extend_from_slice(text);
        self.out.push(0);
        self
    }

    pub fn control(mut self, disposal: u8, delay: u16, transparent: Option<u8>) -> Self {
        let flags = (disposal << 2) | u8::from(transparent.is_some());
        self.out.extend_from_slice(&[0x21, 0xF9, 4, flags]);
        self.out.extend_from_slice(&delay.to_le_bytes());
        self.out.extend_from_slice(&[transparent.unwrap_or(0), 0]);
        self
    }

    pub fn image(self, left: u16, top: u16, width: u16, height: u16, indices: &[u8]) -> Self {
        self.image_block(left, top, width, height, indices, None, false)
    }

    pub fn image_with_palette(
        self,
        left: u16,
        top: u16,
        width: u16,
        height: u16,
        indices: &[u8],
        palette: &[[u8; 3]],
    ) -> Self {
        self.image_block(left, top, width, height, indices, Some(palette), false)
    }

    /// `rows` are given in display order and stored in interlaced order.
    pub fn interlaced_image(self, width: u16, rows: &[Vec<u8>]) -> Self {
        let height = rows.len();
        let mut stored = Vec::new();
        for (start, step) in [(0, 8), (4, 8), (2, 4), (1, 2)] {
            for y in (start..height).step_by(step) {
                stored.extend_from_slice(&rows[y]);
            }
        }
        self.image_block(0, 0, width, height as u16, &stored, None, true)
    }

    #[allow(clippy::too_many_arguments)]
    fn image_block(
        mut self,
        left: u16,
        top: u16,
        width: u16,
        height: u16,
        indices: &[u8],
        palette: Option<&[[u8; 3]]>,
        interlaced: bool,
    ) -> Self {
        self.out.push(0x2C);
        for v in [left, top, width, height] {
            self.out.extend_from_slice(&v.to_le_bytes());
        }
        let flags = if interlaced { 0x40 } else { 0 };
        match palette {
            Some(palette) => {
                let bits = table_bits(palette.len());
                self.out.push(flags | 0x80 | bits);
                write_table(&mut self.out, palette, bits);
            }
            None => self.out.push(flags),
        }
        let max = indices.iter().copied().max().unwrap_or(0);
        let min_code_size = (u32::from(max) + 1).max(4).next_power_of_two().trailing_zeros() as u8;
        self.out.push(min_code_size);
        let data = LzwEncoder::new(BitOrder::Lsb, min_code_size)
            .encode(indices)
            .unwrap();
        for chunk in data.chunks(255) {
            self.out.push(chunk.len() as u8);
            self.out.extend_from_slice(chunk);
        }
        self.out.push(0);
        self
    }

    pub fn raw(mut self, bytes: &[u8]) -> Self {
        self.out.extend_from_slice(bytes);
        self
    }

    pub fn finish(mut self) -> Vec<u8> {
        self.out.push(0x3B);
        self.out
    }

    /// The stream without its trailer.
    pub fn unterminated(self) -> Vec<u8> {
        self.out
    }
}

fn table_bits(len: usize) -> u8 {
    (len.clamp(2, 256).next_power_of_two().trailing_zeros() - 1) as u8
}

fn write_table(out: &mut Vec<u8>, palette: &[[u8; 3]], bits: u8) {
    for color in palette {
        out.extend_from_slice(color);
    }
    for _ in palette.len()..(2usize << bits) {
        out.extend_from_slice(&BLACK);
    }
}

/// An animated WebP file as seen by an independent decoder.
pub struct DecodedAnimation {
    pub width: u32,
    pub height: u32,
    /// 0 for infinite looping.
    pub loop_count: u16,
    /// Fully composited RGBA frames and their display times in milliseconds.
    pub frames: Vec<(Vec<u8>, u32)>,
}

impl DecodedAnimation {
    pub fn pixel(&self, frame: usize, x: u32, y: u32) -> [u8; 4] {
        let i = ((y * self.width + x) * 4) as usize;
        let px = &self.frames[frame].0[i..i + 4];
        [px[0], px[1], px[2], px[3]]
    }
}

pub fn decode_webp(data: &[u8]) -> DecodedAnimation {
    let mut decoder = image_webp::WebPDecoder::new(Cursor::new(data)).unwrap();
    assert!(decoder.is_animated());
    let (width, height) = decoder.dimensions();
    let loop_count = match decoder.loop_count() {
        image_webp::LoopCount::Forever => 0,
        image_webp::LoopCount::Times(n) => n.get(),
    };
    let len = decoder.output_buffer_size().unwrap();
    let mut frames = Vec::new();
    for _ in 0..decoder.num_frames() {
        let mut buf = vec![0; len];
        let duration = decoder.read_frame(&mut buf).unwrap();
        let rgba = if buf.len() == (width * height * 3) as usize {
            buf.chunks_exact(3)
                .flat_map(|px| [px[0], px[1], px[2], 255])
                .collect()
        } else {
            buf
        };
        frames.push((rgba, duration));
    }
    DecodedAnimation {
        width,
        height,
        loop_count,
        frames,
    }
}

pub fn opaque(rgb: [u8; 3]) -> [u8; 4] {
    [rgb[0], rgb[1], rgb[2], 255]
}
