//! Greedy quad meshing over palette-indexed voxel grids.
//!
//! Two variants share one sweep: the color-aware mesher keeps palette
//! indices in the boundary mask (quads never merge across colors) and
//! feeds rendering; the color-agnostic mesher collapses everything
//! filled to one value and feeds collision and physics-hull input.
#![forbid(unsafe_code)]

mod lod;

pub use lod::downsample;

use std::cell::RefCell;
use std::time::Instant;

use golem_grid::VoxelGrid;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Axis {
    X = 0,
    Y = 1,
    Z = 2,
}

impl Axis {
    pub const ALL: [Axis; 3] = [Axis::X, Axis::Y, Axis::Z];

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    /// The two tangent axes in cyclic order, so `(u, v, self)` is
    /// right-handed and `e_u x e_v` points along `+self`.
    #[inline]
    pub fn tangents(self) -> (usize, usize) {
        let d = self.index();
        ((d + 1) % 3, (d + 2) % 3)
    }
}

/// One merged face rectangle in fine lattice units.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Quad {
    pub axis: Axis,
    /// Face normal points toward +axis when true.
    pub positive: bool,
    /// Lattice coordinate of the face plane along `axis`.
    pub plane: i32,
    pub u0: i32,
    pub v0: i32,
    pub w: i32,
    pub h: i32,
    /// Palette index of the filled cell behind the face (1 for the
    /// color-agnostic variant).
    pub value: u16,
}

impl Quad {
    /// Corner lattice coordinates in emission order: counter-clockwise
    /// seen from the side the normal points to, so a fixed two-triangle
    /// split keeps every face outward-facing.
    pub fn corners(&self) -> [[i32; 3]; 4] {
        let d = self.axis.index();
        let (u, v) = self.axis.tangents();
        let at = |uc: i32, vc: i32| {
            let mut p = [0i32; 3];
            p[d] = self.plane;
            p[u] = uc;
            p[v] = vc;
            p
        };
        let c00 = at(self.u0, self.v0);
        let c10 = at(self.u0 + self.w, self.v0);
        let c11 = at(self.u0 + self.w, self.v0 + self.h);
        let c01 = at(self.u0, self.v0 + self.h);
        if self.positive {
            [c00, c10, c11, c01]
        } else {
            [c00, c01, c11, c10]
        }
    }

    /// Lattice cell on the filled side of the face.
    #[inline]
    pub fn filled_cell(&self) -> [i32; 3] {
        let d = self.axis.index();
        let (u, v) = self.axis.tangents();
        let mut p = [0i32; 3];
        p[d] = if self.positive {
            self.plane - 1
        } else {
            self.plane
        };
        p[u] = self.u0;
        p[v] = self.v0;
        p
    }
}

/// Output quad list, meant to be held by the caller and reused across
/// rebuilds so high-frequency remeshing does not allocate.
#[derive(Default, Clone, Debug)]
pub struct QuadList {
    pub quads: Vec<Quad>,
}

impl QuadList {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn clear(&mut self) {
        self.quads.clear();
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.quads.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.quads.is_empty()
    }
}

/// Downsampling factor for level-of-detail remeshing.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum LodFactor {
    Full,
    Half,
    Quarter,
}

impl LodFactor {
    #[inline]
    pub fn step(self) -> usize {
        match self {
            LodFactor::Full => 1,
            LodFactor::Half => 2,
            LodFactor::Quarter => 4,
        }
    }

    /// Maps an instance-manager quad size (1/2/4) to a factor; anything
    /// coarser clamps to quarter resolution.
    #[inline]
    pub fn from_quad_size(quad_size: u8) -> LodFactor {
        match quad_size {
            0 | 1 => LodFactor::Full,
            2 | 3 => LodFactor::Half,
            _ => LodFactor::Quarter,
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct MeshParams {
    /// Quantization cap on merged quad extent, in (coarse) cells.
    pub max_quad: i32,
    pub lod: LodFactor,
}

impl Default for MeshParams {
    fn default() -> Self {
        Self {
            max_quad: 32,
            lod: LodFactor::Full,
        }
    }
}

// Reusable 2D boundary mask, sized to the largest (u,v) slice of the
// current grid. One per thread, as rebuilds run both on the main thread
// (targeting previews) and on mesher workers.
thread_local! {
    static MASK_SCRATCH: RefCell<Vec<i32>> = const { RefCell::new(Vec::new()) };
}

/// Color-aware greedy mesh: quads merge only across equal palette indices.
pub fn mesh_colored_into(grid: &VoxelGrid, params: &MeshParams, out: &mut QuadList) {
    mesh_into(grid, params, true, out);
}

/// Color-agnostic greedy mesh: quads merge across color boundaries,
/// producing far fewer faces for collision and hull input.
pub fn mesh_solid_into(grid: &VoxelGrid, params: &MeshParams, out: &mut QuadList) {
    mesh_into(grid, params, false, out);
}

pub fn mesh_colored(grid: &VoxelGrid, params: &MeshParams) -> QuadList {
    let mut out = QuadList::new();
    mesh_colored_into(grid, params, &mut out);
    out
}

pub fn mesh_solid(grid: &VoxelGrid, params: &MeshParams) -> QuadList {
    let mut out = QuadList::new();
    mesh_solid_into(grid, params, &mut out);
    out
}

fn mesh_into(grid: &VoxelGrid, params: &MeshParams, colored: bool, out: &mut QuadList) {
    let t0 = Instant::now();
    out.clear();
    let step = params.lod.step();
    if step == 1 {
        sweep_all(grid, params.max_quad, colored, 1, out);
    } else {
        let coarse = lod::downsample(grid, params.lod);
        sweep_all(&coarse, params.max_quad, colored, step as i32, out);
    }
    let ms = t0.elapsed().as_millis().min(u128::from(u32::MAX)) as u32;
    let [sx, sy, sz] = grid.size();
    log::debug!(
        target: "perf",
        "ms={} mesher_greedy colored={} step={} dims=({}, {}, {}) quads={}",
        ms, colored, step, sx, sy, sz, out.len()
    );
}

fn sweep_all(grid: &VoxelGrid, cap: i32, colored: bool, scale: i32, out: &mut QuadList) {
    MASK_SCRATCH.with(|cell| {
        let mut mask = cell.borrow_mut();
        for axis in Axis::ALL {
            sweep_axis(grid, axis, cap, colored, scale, &mut mask, out);
        }
    });
}

// Per-axis sweep: slices s = -1 .. n-2 compare the voxel at s with the
// voxel at s+1; the virtual slice at -1 is all empty, and the boundary
// at lattice coordinate n is outside the swept range.
fn sweep_axis(
    grid: &VoxelGrid,
    axis: Axis,
    cap: i32,
    colored: bool,
    scale: i32,
    mask: &mut Vec<i32>,
    out: &mut QuadList,
) {
    let size = grid.size();
    let d = axis.index();
    let (u, v) = axis.tangents();
    let n = size[d] as i32;
    let nu = size[u] as i32;
    let nv = size[v] as i32;
    if n == 0 || nu == 0 || nv == 0 {
        return;
    }
    mask.clear();
    mask.resize((nu * nv) as usize, 0);

    let cell_value = |coord: [i32; 3]| -> i32 {
        let idx = grid.get_signed(coord[0], coord[1], coord[2]);
        if idx == 0 {
            0
        } else if colored {
            i32::from(idx)
        } else {
            1
        }
    };

    for s in -1..n - 1 {
        // Fill the boundary mask for the plane between slices s and s+1.
        let mut any = false;
        for iv in 0..nv {
            for iu in 0..nu {
                let mut a = [0i32; 3];
                a[d] = s;
                a[u] = iu;
                a[v] = iv;
                let mut b = a;
                b[d] = s + 1;
                let av = cell_value(a);
                let bv = cell_value(b);
                // Sign encodes which side is filled: positive faces +d.
                let m = if av != 0 && bv == 0 {
                    av
                } else if av == 0 && bv != 0 {
                    -bv
                } else {
                    0
                };
                mask[(iv * nu + iu) as usize] = m;
                any |= m != 0;
            }
        }
        if !any {
            continue;
        }

        // Lexicographic greedy rectangle merge over the mask.
        for iv in 0..nv {
            let mut iu = 0;
            while iu < nu {
                let m = mask[(iv * nu + iu) as usize];
                if m == 0 {
                    iu += 1;
                    continue;
                }
                let mut w = 1;
                while iu + w < nu && w < cap && mask[(iv * nu + iu + w) as usize] == m {
                    w += 1;
                }
                let mut h = 1;
                'grow: while iv + h < nv && h < cap {
                    for k in 0..w {
                        if mask[((iv + h) * nu + iu + k) as usize] != m {
                            break 'grow;
                        }
                    }
                    h += 1;
                }
                for row in 0..h {
                    for k in 0..w {
                        mask[((iv + row) * nu + iu + k) as usize] = 0;
                    }
                }
                out.quads.push(Quad {
                    axis,
                    positive: m > 0,
                    plane: (s + 1) * scale,
                    u0: iu * scale,
                    v0: iv * scale,
                    w: w * scale,
                    h: h * scale,
                    value: m.unsigned_abs() as u16,
                });
                iu += w;
            }
        }
    }
}
