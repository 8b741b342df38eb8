//! Palette-indexed voxel grids, multi-frame models, and edit deltas.
#![forbid(unsafe_code)]

pub mod codec;

pub use codec::CodecError;

/// Upper bound on animation frames per model.
pub const MAX_FRAMES: usize = 32;

/// Stable identifier for one vox model shared across peers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VoxId(pub u64);

impl std::fmt::Display for VoxId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "vox:{:016x}", self.0)
    }
}

/// One palette entry: RGB plus a small material-kind tag.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PaletteColor {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub kind: u8,
}

impl PaletteColor {
    #[inline]
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, kind: 0 }
    }
}

/// Ordered color list referenced by 1-based cell indices. Index 0 always
/// means "empty" and never names an entry.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Palette {
    colors: Vec<PaletteColor>,
}

impl Palette {
    pub fn new() -> Self {
        Self { colors: Vec::new() }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.colors.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.colors.is_empty()
    }

    /// Looks up the color for a 1-based cell index.
    #[inline]
    pub fn get(&self, index: u16) -> Option<PaletteColor> {
        if index == 0 {
            return None;
        }
        self.colors.get(index as usize - 1).copied()
    }

    /// Returns the 1-based index for `color`, appending it if new.
    pub fn intern(&mut self, color: PaletteColor) -> u16 {
        if let Some(i) = self.colors.iter().position(|c| *c == color) {
            return (i + 1) as u16;
        }
        self.colors.push(color);
        self.colors.len() as u16
    }

    /// Appends an entry verbatim, duplicates included. Wire palettes
    /// must keep their announced slots so cell indices stay aligned;
    /// `intern` would collapse a repeated color and shift them.
    pub(crate) fn push(&mut self, color: PaletteColor) {
        self.colors.push(color);
    }

    #[inline]
    pub fn entries(&self) -> &[PaletteColor] {
        &self.colors
    }
}

/// Minimum bit width able to represent `max_index`.
#[inline]
pub fn bits_for_index(max_index: u16) -> u32 {
    (16 - max_index.leading_zeros()).max(1)
}

/// A 3D lattice of palette indices, bit-packed at the minimum width the
/// palette currently needs. Coordinates are centered: lattice index `i`
/// on an axis of size `n` maps to the signed coordinate `i - n/2`.
#[derive(Clone, Debug, PartialEq)]
pub struct VoxelGrid {
    sx: usize,
    sy: usize,
    sz: usize,
    bits: u32,
    words: Vec<u64>,
    palette: Palette,
}

impl VoxelGrid {
    pub fn new(sx: usize, sy: usize, sz: usize) -> Self {
        let bits = 1;
        let nwords = Self::words_for(sx * sy * sz, bits);
        Self {
            sx,
            sy,
            sz,
            bits,
            words: vec![0; nwords],
            palette: Palette::new(),
        }
    }

    /// Empty grid that shares another grid's palette and packing width,
    /// so indices can be copied across without re-interning.
    pub fn with_palette_of(sx: usize, sy: usize, sz: usize, like: &VoxelGrid) -> Self {
        Self::with_palette_bits(sx, sy, sz, like.palette.clone(), like.bits)
    }

    pub(crate) fn with_palette_bits(
        sx: usize,
        sy: usize,
        sz: usize,
        palette: Palette,
        bits: u32,
    ) -> Self {
        let nwords = Self::words_for(sx * sy * sz, bits);
        Self {
            sx,
            sy,
            sz,
            bits,
            words: vec![0; nwords],
            palette,
        }
    }

    #[inline]
    fn words_for(cells: usize, bits: u32) -> usize {
        (cells * bits as usize).div_ceil(64)
    }

    #[inline]
    pub fn size(&self) -> [usize; 3] {
        [self.sx, self.sy, self.sz]
    }

    /// Per-axis shift from lattice index to centered coordinate.
    #[inline]
    pub fn shift(&self) -> [i32; 3] {
        [
            (self.sx / 2) as i32,
            (self.sy / 2) as i32,
            (self.sz / 2) as i32,
        ]
    }

    #[inline]
    pub fn cell_count(&self) -> usize {
        self.sx * self.sy * self.sz
    }

    #[inline]
    pub fn bits_per_index(&self) -> u32 {
        self.bits
    }

    #[inline]
    pub fn palette(&self) -> &Palette {
        &self.palette
    }

    #[inline]
    fn cell_index(&self, x: usize, y: usize, z: usize) -> usize {
        debug_assert!(x < self.sx && y < self.sy && z < self.sz);
        (y * self.sz + z) * self.sx + x
    }

    #[inline]
    pub(crate) fn get_cell(&self, cell: usize) -> u16 {
        let bits = self.bits as usize;
        let bitpos = cell * bits;
        let w = bitpos >> 6;
        let o = bitpos & 63;
        let mask = (1u64 << bits) - 1;
        let mut v = self.words[w] >> o;
        if o + bits > 64 {
            v |= self.words[w + 1] << (64 - o);
        }
        (v & mask) as u16
    }

    #[inline]
    pub(crate) fn set_cell(&mut self, cell: usize, value: u16) {
        debug_assert!(u32::from(value) < (1u32 << self.bits));
        let bits = self.bits as usize;
        let bitpos = cell * bits;
        let w = bitpos >> 6;
        let o = bitpos & 63;
        let mask = (1u64 << bits) - 1;
        self.words[w] = (self.words[w] & !(mask << o)) | (u64::from(value) << o);
        if o + bits > 64 {
            let hi_bits = o + bits - 64;
            let hi_mask = (1u64 << hi_bits) - 1;
            self.words[w + 1] = (self.words[w + 1] & !hi_mask) | (u64::from(value) >> (64 - o));
        }
    }

    /// Raw palette index at a lattice cell.
    #[inline]
    pub fn get(&self, x: usize, y: usize, z: usize) -> u16 {
        self.get_cell(self.cell_index(x, y, z))
    }

    /// Raw palette index at a signed lattice cell; out of bounds reads as empty.
    #[inline]
    pub fn get_signed(&self, x: i32, y: i32, z: i32) -> u16 {
        if x < 0 || y < 0 || z < 0 {
            return 0;
        }
        let (x, y, z) = (x as usize, y as usize, z as usize);
        if x >= self.sx || y >= self.sy || z >= self.sz {
            return 0;
        }
        self.get(x, y, z)
    }

    /// True if the cell holds a palette entry.
    #[inline]
    pub fn filled(&self, x: i32, y: i32, z: i32) -> bool {
        self.get_signed(x, y, z) != 0
    }

    /// Color at a lattice cell. An index past the palette is a
    /// data-integrity violation; debug builds assert, release builds
    /// read it as empty so the render loop survives.
    #[inline]
    pub fn color_at(&self, x: usize, y: usize, z: usize) -> Option<PaletteColor> {
        let idx = self.get(x, y, z);
        if idx == 0 {
            return None;
        }
        let c = self.palette.get(idx);
        debug_assert!(c.is_some(), "palette index {} out of range", idx);
        c
    }

    /// Writes a raw palette index, widening the packing if needed.
    pub fn set_index(&mut self, x: usize, y: usize, z: usize, index: u16) {
        debug_assert!(index as usize <= self.palette.len());
        self.ensure_bits(bits_for_index(index));
        let cell = self.cell_index(x, y, z);
        self.set_cell(cell, index);
    }

    /// Interns `color` and writes its index at the cell.
    pub fn paint(&mut self, x: usize, y: usize, z: usize, color: PaletteColor) -> u16 {
        let idx = self.palette.intern(color);
        self.ensure_bits(bits_for_index(idx));
        let cell = self.cell_index(x, y, z);
        self.set_cell(cell, idx);
        idx
    }

    #[inline]
    pub fn erase(&mut self, x: usize, y: usize, z: usize) {
        let cell = self.cell_index(x, y, z);
        self.set_cell(cell, 0);
    }

    /// Interns a color without touching any cell.
    pub fn intern_color(&mut self, color: PaletteColor) -> u16 {
        let idx = self.palette.intern(color);
        self.ensure_bits(bits_for_index(idx));
        idx
    }

    fn ensure_bits(&mut self, need: u32) {
        if need <= self.bits {
            return;
        }
        let old = self.clone();
        self.bits = need;
        self.words = vec![0; Self::words_for(self.cell_count(), need)];
        for cell in 0..self.cell_count() {
            let v = old.get_cell(cell);
            if v != 0 {
                self.set_cell(cell, v);
            }
        }
    }

    pub fn filled_count(&self) -> usize {
        (0..self.cell_count())
            .filter(|&c| self.get_cell(c) != 0)
            .count()
    }

    #[inline]
    pub fn is_all_empty(&self) -> bool {
        self.words.iter().all(|w| *w == 0)
    }

    /// Overlays `patch` onto this grid at an integer offset, clipped to
    /// bounds. The whole patch rectangle is written: zero cells erase.
    /// Patch colors are re-interned into this grid's palette.
    pub fn overlay(&mut self, patch: &VoxelGrid, offset: [i32; 3]) {
        let [px, py, pz] = patch.size();
        for ly in 0..py {
            let ty = offset[1] + ly as i32;
            if ty < 0 || ty >= self.sy as i32 {
                continue;
            }
            for lz in 0..pz {
                let tz = offset[2] + lz as i32;
                if tz < 0 || tz >= self.sz as i32 {
                    continue;
                }
                for lx in 0..px {
                    let tx = offset[0] + lx as i32;
                    if tx < 0 || tx >= self.sx as i32 {
                        continue;
                    }
                    let (tx, ty, tz) = (tx as usize, ty as usize, tz as usize);
                    match patch.color_at(lx, ly, lz) {
                        Some(c) => {
                            self.paint(tx, ty, tz, c);
                        }
                        None => self.erase(tx, ty, tz),
                    }
                }
            }
        }
    }
}

/// Ambient-occlusion display settings carried by a model.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AoSettings {
    /// Darkening strength in 0..1; 0 disables AO.
    pub intensity: f32,
    /// Exponent shaping how fast occlusion ramps with occluder count.
    pub falloff: f32,
}

impl Default for AoSettings {
    fn default() -> Self {
        Self {
            intensity: 0.35,
            falloff: 1.0,
        }
    }
}

/// Display/transform defaults stored alongside the frames.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DisplaySettings {
    pub scale: f32,
    pub origin: [f32; 3],
    pub ao: AoSettings,
}

impl Default for DisplaySettings {
    fn default() -> Self {
        Self {
            scale: 1.0,
            origin: [0.0; 3],
            ao: AoSettings::default(),
        }
    }
}

/// Authoritative content for one vox id: an ordered sequence of frame
/// grids plus a monotonically increasing revision.
#[derive(Clone, Debug)]
pub struct Model {
    size: [usize; 3],
    frames: Vec<VoxelGrid>,
    pub revision: u64,
    pub display: DisplaySettings,
}

impl Model {
    pub fn new(sx: usize, sy: usize, sz: usize) -> Self {
        Self {
            size: [sx, sy, sz],
            frames: vec![VoxelGrid::new(sx, sy, sz)],
            revision: 0,
            display: DisplaySettings::default(),
        }
    }

    pub(crate) fn from_parts(
        size: [usize; 3],
        frames: Vec<VoxelGrid>,
        revision: u64,
        display: DisplaySettings,
    ) -> Self {
        Self {
            size,
            frames,
            revision,
            display,
        }
    }

    #[inline]
    pub fn size(&self) -> [usize; 3] {
        self.size
    }

    #[inline]
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    #[inline]
    pub fn frame(&self, i: usize) -> Option<&VoxelGrid> {
        self.frames.get(i)
    }

    /// Frame grid at `i`, allocating empty frames up through it. Frames
    /// are added lazily and never removed. Returns `None` past the cap.
    pub fn ensure_frame(&mut self, i: usize) -> Option<&mut VoxelGrid> {
        if i >= MAX_FRAMES {
            return None;
        }
        while self.frames.len() <= i {
            self.frames
                .push(VoxelGrid::new(self.size[0], self.size[1], self.size[2]));
        }
        Some(&mut self.frames[i])
    }

    /// Playback frame selection. Placeholder: animation timing policy is
    /// undecided, so the displayed frame is always 0.
    #[inline]
    pub fn current_frame(&self) -> usize {
        0
    }

    /// Bumps and returns the revision for a new local edit.
    pub fn next_revision(&mut self) -> u64 {
        self.revision += 1;
        self.revision
    }
}

/// One edit: a small patch grid, where it lands, and the revision of the
/// edit that produced it. Immutable once created.
#[derive(Clone, Debug, PartialEq)]
pub struct Delta {
    pub frame: usize,
    pub patch: VoxelGrid,
    pub offset: [i32; 3],
    pub revision: u64,
}
