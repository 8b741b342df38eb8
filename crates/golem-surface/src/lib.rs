//! Turns greedy-mesh quad lists into renderable vertex/index buffers.
#![forbid(unsafe_code)]

mod pool;

pub use pool::BufferPool;

use golem_geom::{Aabb, Vec3};
use golem_grid::{AoSettings, PaletteColor, VoxelGrid};
use golem_mesh::QuadList;

/// Extra cells added around the grid footprint by the editor ground quad.
pub const GROUND_MARGIN: i32 = 2;

const GROUND_COLOR: [u8; 4] = [128, 128, 128, 255];

/// Triangle indices, 16-bit unless the vertex count needs more.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IndexData {
    U16(Vec<u16>),
    U32(Vec<u32>),
}

impl IndexData {
    #[inline]
    pub fn len(&self) -> usize {
        match self {
            IndexData::U16(v) => v.len(),
            IndexData::U32(v) => v.len(),
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, i: usize) -> usize {
        match self {
            IndexData::U16(v) => v[i] as usize,
            IndexData::U32(v) => v[i] as usize,
        }
    }
}

/// Built surface geometry for one frame of one model.
#[derive(Clone, Debug)]
pub struct SurfaceData {
    /// xyz triples, centered on the model pivot.
    pub pos: Vec<f32>,
    /// xyz triples, one unit normal per vertex.
    pub norm: Vec<f32>,
    /// rgba per vertex.
    pub col: Vec<u8>,
    /// uv pairs in cell units across each quad.
    pub uv: Vec<f32>,
    pub idx: IndexData,
    pub bbox: Aabb,
    /// Max distance from the bbox center to any vertex.
    pub radius: f32,
}

impl SurfaceData {
    #[inline]
    pub fn vertex_count(&self) -> usize {
        self.pos.len() / 3
    }

    #[inline]
    pub fn triangle_count(&self) -> usize {
        self.idx.len() / 3
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SurfaceOptions {
    pub ao: AoSettings,
    /// Append a synthetic editor-floor quad under the model.
    pub ground_quad: bool,
}

/// Builds surface buffers from a quad list. All typed buffers come from
/// `pool` and should go back via [`recycle_surface`] when the surface is
/// replaced or dropped.
pub fn build_surface(
    grid: &VoxelGrid,
    quads: &QuadList,
    opts: &SurfaceOptions,
    pool: &mut BufferPool,
) -> SurfaceData {
    let nquads = quads.len() + usize::from(opts.ground_quad);
    let nverts = nquads * 4;
    let mut pos = pool.acquire_f32(nverts * 3);
    let mut norm = pool.acquire_f32(nverts * 3);
    let mut col = pool.acquire_u8(nverts * 4);
    let mut uv = pool.acquire_f32(nverts * 2);
    let wide = nverts > u16::MAX as usize;
    let mut idx16 = if wide {
        Vec::new()
    } else {
        pool.acquire_u16(nquads * 6)
    };
    let mut idx32 = if wide {
        pool.acquire_u32(nquads * 6)
    } else {
        Vec::new()
    };

    let shift = grid.shift();
    let mut bbox = Aabb::EMPTY;

    let mut push_vertex = |pos: &mut Vec<f32>,
                           norm: &mut Vec<f32>,
                           col: &mut Vec<u8>,
                           uv: &mut Vec<f32>,
                           bbox: &mut Aabb,
                           p: Vec3,
                           n: Vec3,
                           rgba: [u8; 4],
                           tex: (f32, f32)| {
        pos.extend_from_slice(&[p.x, p.y, p.z]);
        norm.extend_from_slice(&[n.x, n.y, n.z]);
        col.extend_from_slice(&rgba);
        uv.extend_from_slice(&[tex.0, tex.1]);
        bbox.expand(p);
    };

    for q in &quads.quads {
        let base = (pos.len() / 3) as u32;
        let rgba = quad_color(grid, q.value);
        let d = q.axis.index();
        let (ua, va) = q.axis.tangents();
        let mut nvec = [0f32; 3];
        nvec[d] = if q.positive { 1.0 } else { -1.0 };
        let n = Vec3::new(nvec[0], nvec[1], nvec[2]);
        for c in q.corners() {
            let p = Vec3::new(
                (c[0] - shift[0]) as f32,
                (c[1] - shift[1]) as f32,
                (c[2] - shift[2]) as f32,
            );
            let tex = ((c[ua] - q.u0) as f32, (c[va] - q.v0) as f32);
            let rgba = shade_corner(grid, q, c, rgba, &opts.ao);
            push_vertex(
                &mut pos, &mut norm, &mut col, &mut uv, &mut bbox, p, n, rgba, tex,
            );
        }
        push_quad_indices(&mut idx16, &mut idx32, wide, base);
    }

    if opts.ground_quad {
        let base = (pos.len() / 3) as u32;
        let [sx, _, sz] = grid.size();
        let x0 = (-shift[0] - GROUND_MARGIN) as f32;
        let x1 = (sx as i32 - shift[0] + GROUND_MARGIN) as f32;
        let z0 = (-shift[2] - GROUND_MARGIN) as f32;
        let z1 = (sz as i32 - shift[2] + GROUND_MARGIN) as f32;
        let y = -shift[1] as f32;
        let n = Vec3::new(0.0, 1.0, 0.0);
        // Same winding as a +Y quad: u axis is Z, v axis is X.
        let corners = [(z0, x0), (z1, x0), (z1, x1), (z0, x1)];
        for (cz, cx) in corners {
            push_vertex(
                &mut pos,
                &mut norm,
                &mut col,
                &mut uv,
                &mut bbox,
                Vec3::new(cx, y, cz),
                n,
                GROUND_COLOR,
                (cz - z0, cx - x0),
            );
        }
        push_quad_indices(&mut idx16, &mut idx32, wide, base);
    }

    let radius = if bbox.is_empty() {
        0.0
    } else {
        let c = bbox.center();
        let mut r2 = 0.0f32;
        for v in pos.chunks_exact(3) {
            let d = Vec3::new(v[0], v[1], v[2]) - c;
            r2 = r2.max(d.dot(d));
        }
        r2.sqrt()
    };

    SurfaceData {
        pos,
        norm,
        col,
        uv,
        idx: if wide {
            IndexData::U32(idx32)
        } else {
            IndexData::U16(idx16)
        },
        bbox,
        radius,
    }
}

/// Returns a surface's buffers to the pool.
pub fn recycle_surface(pool: &mut BufferPool, surface: SurfaceData) {
    pool.release_f32(surface.pos);
    pool.release_f32(surface.norm);
    pool.release_u8(surface.col);
    pool.release_f32(surface.uv);
    match surface.idx {
        IndexData::U16(v) => pool.release_u16(v),
        IndexData::U32(v) => pool.release_u32(v),
    }
}

#[inline]
fn push_quad_indices(idx16: &mut Vec<u16>, idx32: &mut Vec<u32>, wide: bool, base: u32) {
    if wide {
        idx32.extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
    } else {
        let b = base as u16;
        idx16.extend_from_slice(&[b, b + 1, b + 2, b, b + 2, b + 3]);
    }
}

fn quad_color(grid: &VoxelGrid, value: u16) -> [u8; 4] {
    match grid.palette().get(value) {
        Some(c) => [c.r, c.g, c.b, 255],
        None => {
            debug_assert!(value == 0, "palette index {} out of range", value);
            GROUND_COLOR
        }
    }
}

// Corner darkening from the cells that share the vertex on the empty
// side of the face.
fn shade_corner(
    grid: &VoxelGrid,
    q: &golem_mesh::Quad,
    corner: [i32; 3],
    rgba: [u8; 4],
    ao: &AoSettings,
) -> [u8; 4] {
    if ao.intensity <= 0.0 {
        return rgba;
    }
    let d = q.axis.index();
    let (ua, va) = q.axis.tangents();
    let layer = if q.positive { q.plane } else { q.plane - 1 };
    let mut occluders = 0;
    for dv in -1..=0 {
        for du in -1..=0 {
            let mut cell = [0i32; 3];
            cell[d] = layer;
            cell[ua] = corner[ua] + du;
            cell[va] = corner[va] + dv;
            if grid.filled(cell[0], cell[1], cell[2]) {
                occluders += 1;
            }
        }
    }
    let occluders = occluders.min(3);
    if occluders == 0 {
        return rgba;
    }
    let t = (occluders as f32 / 3.0).powf(ao.falloff.max(0.01));
    let k = 1.0 - ao.intensity.clamp(0.0, 1.0) * t;
    [
        (rgba[0] as f32 * k) as u8,
        (rgba[1] as f32 * k) as u8,
        (rgba[2] as f32 * k) as u8,
        rgba[3],
    ]
}
