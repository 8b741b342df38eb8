//! Level-of-detail downsampling for remeshing at reduced resolution.

use std::sync::OnceLock;

use golem_grid::VoxelGrid;

use crate::LodFactor;

// Offsets inside one coarse cell, sorted by distance from the cell
// center. The representative fine voxel is the nearest non-empty one,
// which keeps the silhouette through resolution drops.
fn sorted_offsets(f: usize) -> Vec<[usize; 3]> {
    let mut offs = Vec::with_capacity(f * f * f);
    for z in 0..f {
        for y in 0..f {
            for x in 0..f {
                offs.push([x, y, z]);
            }
        }
    }
    let c = (f as f32 - 1.0) * 0.5;
    let d2 = |o: &[usize; 3]| {
        let dx = o[0] as f32 - c;
        let dy = o[1] as f32 - c;
        let dz = o[2] as f32 - c;
        dx * dx + dy * dy + dz * dz
    };
    offs.sort_by(|a, b| d2(a).total_cmp(&d2(b)));
    offs
}

fn offsets_for(f: usize) -> &'static [[usize; 3]] {
    static HALF: OnceLock<Vec<[usize; 3]>> = OnceLock::new();
    static QUARTER: OnceLock<Vec<[usize; 3]>> = OnceLock::new();
    match f {
        2 => HALF.get_or_init(|| sorted_offsets(2)),
        _ => QUARTER.get_or_init(|| sorted_offsets(4)),
    }
}

/// Downsamples a grid by the factor, sharing the source palette so cell
/// indices carry over unchanged.
pub fn downsample(grid: &VoxelGrid, factor: LodFactor) -> VoxelGrid {
    let f = factor.step();
    if f == 1 {
        return grid.clone();
    }
    let [sx, sy, sz] = grid.size();
    let (cx, cy, cz) = (sx.div_ceil(f), sy.div_ceil(f), sz.div_ceil(f));
    let mut coarse = VoxelGrid::with_palette_of(cx, cy, cz, grid);
    let offsets = offsets_for(f);
    for z in 0..cz {
        for y in 0..cy {
            for x in 0..cx {
                for off in offsets {
                    let fx = x * f + off[0];
                    let fy = y * f + off[1];
                    let fz = z * f + off[2];
                    if fx >= sx || fy >= sy || fz >= sz {
                        continue;
                    }
                    let idx = grid.get(fx, fy, fz);
                    if idx != 0 {
                        coarse.set_index(x, y, z, idx);
                        break;
                    }
                }
            }
        }
    }
    coarse
}
