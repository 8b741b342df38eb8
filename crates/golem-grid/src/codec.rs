//! Compact binary wire format for voxel chunks, deltas, and whole models.
//!
//! A chunk payload is: `u16 sx, sy, sz`, `u8 bits_per_index`,
//! `u16 palette_len`, palette entries (`r g b kind`), then cell indices
//! packed LSB-first at `bits_per_index` bits each. Delta and model
//! payloads wrap chunk payloads with their own headers. Every payload
//! must round-trip exactly.

use crate::{
    AoSettings, Delta, DisplaySettings, MAX_FRAMES, Model, Palette, PaletteColor, VoxelGrid,
    bits_for_index,
};
use thiserror::Error;

/// Per-axis size cap on any wire-encoded grid.
pub const MAX_AXIS: usize = 256;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("payload truncated")]
    UnexpectedEof,
    #[error("bad bits-per-index {0} (expected 1..=16)")]
    BadBitWidth(u8),
    #[error("grid axis {0} exceeds {MAX_AXIS}")]
    AxisTooLarge(u16),
    #[error("palette of {palette} entries cannot hold index {index}")]
    IndexOutOfRange { index: u16, palette: u16 },
    #[error("frame index {0} exceeds {MAX_FRAMES}")]
    BadFrame(u8),
    #[error("frame count {0} exceeds {MAX_FRAMES}")]
    BadFrameCount(u8),
    #[error("{0} trailing bytes after payload")]
    TrailingBytes(usize),
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        if self.pos + n > self.buf.len() {
            return Err(CodecError::UnexpectedEof);
        }
        let s = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(s)
    }

    fn u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, CodecError> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn i32(&mut self) -> Result<i32, CodecError> {
        let b = self.take(4)?;
        Ok(i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self) -> Result<u64, CodecError> {
        let b = self.take(8)?;
        Ok(u64::from_le_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    fn f32(&mut self) -> Result<f32, CodecError> {
        let b = self.take(4)?;
        Ok(f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn finish(self) -> Result<(), CodecError> {
        let rest = self.buf.len() - self.pos;
        if rest != 0 {
            return Err(CodecError::TrailingBytes(rest));
        }
        Ok(())
    }
}

fn write_chunk(out: &mut Vec<u8>, grid: &VoxelGrid) {
    let [sx, sy, sz] = grid.size();
    out.extend_from_slice(&(sx as u16).to_le_bytes());
    out.extend_from_slice(&(sy as u16).to_le_bytes());
    out.extend_from_slice(&(sz as u16).to_le_bytes());
    out.push(grid.bits_per_index() as u8);
    let pal = grid.palette();
    out.extend_from_slice(&(pal.len() as u16).to_le_bytes());
    for c in pal.entries() {
        out.extend_from_slice(&[c.r, c.g, c.b, c.kind]);
    }
    let bits = grid.bits_per_index() as usize;
    let mut acc: u64 = 0;
    let mut nbits = 0usize;
    for cell in 0..grid.cell_count() {
        acc |= u64::from(grid.get_cell(cell)) << nbits;
        nbits += bits;
        while nbits >= 8 {
            out.push(acc as u8);
            acc >>= 8;
            nbits -= 8;
        }
    }
    if nbits > 0 {
        out.push(acc as u8);
    }
}

fn read_axis(r: &mut Reader) -> Result<usize, CodecError> {
    let v = r.u16()?;
    if v as usize > MAX_AXIS {
        return Err(CodecError::AxisTooLarge(v));
    }
    Ok(v as usize)
}

fn read_chunk(r: &mut Reader) -> Result<VoxelGrid, CodecError> {
    let sx = read_axis(r)?;
    let sy = read_axis(r)?;
    let sz = read_axis(r)?;
    let bits = r.u8()?;
    if bits == 0 || bits > 16 {
        return Err(CodecError::BadBitWidth(bits));
    }
    let pal_len = r.u16()?;
    // Entries are appended verbatim: a degenerate palette that repeats
    // a color must keep every announced slot, or the cell indices shift.
    let mut palette = Palette::new();
    for _ in 0..pal_len {
        let e = r.take(4)?;
        palette.push(PaletteColor {
            r: e[0],
            g: e[1],
            b: e[2],
            kind: e[3],
        });
    }
    let mut grid = VoxelGrid::with_palette_bits(sx, sy, sz, palette, u32::from(bits));
    let cells = sx * sy * sz;
    let nbytes = (cells * bits as usize).div_ceil(8);
    let packed = r.take(nbytes)?;
    let mask = (1u32 << bits) - 1;
    let mut acc: u64 = 0;
    let mut nbits = 0usize;
    let mut byte_i = 0usize;
    for cell in 0..cells {
        while nbits < bits as usize {
            acc |= u64::from(packed[byte_i]) << nbits;
            byte_i += 1;
            nbits += 8;
        }
        let v = (acc as u32 & mask) as u16;
        acc >>= bits as usize;
        nbits -= bits as usize;
        if v > pal_len {
            return Err(CodecError::IndexOutOfRange {
                index: v,
                palette: pal_len,
            });
        }
        if v != 0 {
            grid.set_cell(cell, v);
        }
    }
    Ok(grid)
}

/// Encodes one voxel chunk payload.
pub fn encode_chunk(grid: &VoxelGrid) -> Vec<u8> {
    let mut out = Vec::new();
    write_chunk(&mut out, grid);
    out
}

/// Decodes one voxel chunk payload, rejecting trailing bytes.
pub fn decode_chunk(bytes: &[u8]) -> Result<VoxelGrid, CodecError> {
    let mut r = Reader::new(bytes);
    let grid = read_chunk(&mut r)?;
    r.finish()?;
    Ok(grid)
}

/// Encodes a delta: `u8 frame`, `i32 offset[3]`, `u64 revision`, chunk.
pub fn encode_delta(delta: &Delta) -> Vec<u8> {
    debug_assert!(delta.frame < MAX_FRAMES);
    let mut out = Vec::new();
    out.push(delta.frame as u8);
    for o in delta.offset {
        out.extend_from_slice(&o.to_le_bytes());
    }
    out.extend_from_slice(&delta.revision.to_le_bytes());
    write_chunk(&mut out, &delta.patch);
    out
}

pub fn decode_delta(bytes: &[u8]) -> Result<Delta, CodecError> {
    let mut r = Reader::new(bytes);
    let frame = r.u8()?;
    if frame as usize >= MAX_FRAMES {
        return Err(CodecError::BadFrame(frame));
    }
    let offset = [r.i32()?, r.i32()?, r.i32()?];
    let revision = r.u64()?;
    let patch = read_chunk(&mut r)?;
    r.finish()?;
    Ok(Delta {
        frame: frame as usize,
        patch,
        offset,
        revision,
    })
}

/// Encodes a whole model for storage writeback: size, revision, display
/// defaults, then every frame as a chunk payload.
pub fn encode_model(model: &Model) -> Vec<u8> {
    let [sx, sy, sz] = model.size();
    let mut out = Vec::new();
    out.extend_from_slice(&(sx as u16).to_le_bytes());
    out.extend_from_slice(&(sy as u16).to_le_bytes());
    out.extend_from_slice(&(sz as u16).to_le_bytes());
    out.push(model.frame_count() as u8);
    out.extend_from_slice(&model.revision.to_le_bytes());
    out.extend_from_slice(&model.display.scale.to_le_bytes());
    for o in model.display.origin {
        out.extend_from_slice(&o.to_le_bytes());
    }
    out.extend_from_slice(&model.display.ao.intensity.to_le_bytes());
    out.extend_from_slice(&model.display.ao.falloff.to_le_bytes());
    for i in 0..model.frame_count() {
        if let Some(frame) = model.frame(i) {
            write_chunk(&mut out, frame);
        }
    }
    out
}

pub fn decode_model(bytes: &[u8]) -> Result<Model, CodecError> {
    let mut r = Reader::new(bytes);
    let sx = read_axis(&mut r)?;
    let sy = read_axis(&mut r)?;
    let sz = read_axis(&mut r)?;
    let frame_count = r.u8()?;
    if frame_count as usize > MAX_FRAMES {
        return Err(CodecError::BadFrameCount(frame_count));
    }
    let revision = r.u64()?;
    let display = DisplaySettings {
        scale: r.f32()?,
        origin: [r.f32()?, r.f32()?, r.f32()?],
        ao: AoSettings {
            intensity: r.f32()?,
            falloff: r.f32()?,
        },
    };
    let mut frames = Vec::with_capacity(frame_count as usize);
    for _ in 0..frame_count {
        frames.push(read_chunk(&mut r)?);
    }
    if frames.is_empty() {
        frames.push(VoxelGrid::new(sx, sy, sz));
    }
    r.finish()?;
    Ok(Model::from_parts([sx, sy, sz], frames, revision, display))
}
