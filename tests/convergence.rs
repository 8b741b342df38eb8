//! Wire-level convergence: peers that receive the same multiset of
//! encoded deltas in different orders end up with identical models.

use golem::{Config, Delta, PaletteColor, VoxId, VoxManager, VoxelGrid, codec};
use proptest::prelude::*;

fn cell_patch(color: PaletteColor) -> VoxelGrid {
    let mut g = VoxelGrid::new(2, 2, 2);
    g.paint(0, 0, 0, color);
    g
}

fn encoded(frame: usize, offset: [i32; 3], revision: u64, color: PaletteColor) -> Vec<u8> {
    codec::encode_delta(&Delta {
        frame,
        patch: cell_patch(color),
        offset,
        revision,
    })
}

fn grids_equal(a: &VoxManager, b: &VoxManager, vox: VoxId) -> bool {
    let (ma, mb) = match (a.model(vox), b.model(vox)) {
        (Some(ma), Some(mb)) => (ma, mb),
        (None, None) => return true,
        _ => return false,
    };
    if ma.frame_count() != mb.frame_count() {
        return false;
    }
    for f in 0..ma.frame_count() {
        let (ga, gb) = (ma.frame(f).unwrap(), mb.frame(f).unwrap());
        let [sx, sy, sz] = ga.size();
        for z in 0..sz {
            for y in 0..sy {
                for x in 0..sx {
                    if ga.color_at(x, y, z) != gb.color_at(x, y, z) {
                        return false;
                    }
                }
            }
        }
    }
    true
}

#[test]
fn reversed_delivery_converges() {
    let vox = VoxId(1);
    let colors = [
        PaletteColor::rgb(200, 0, 0),
        PaletteColor::rgb(0, 200, 0),
        PaletteColor::rgb(0, 0, 200),
    ];
    let deltas: Vec<Vec<u8>> = (0..3)
        .map(|i| encoded(0, [i as i32, 0, 0], (i % 2 + 1) as u64, colors[i]))
        .collect();

    let mut a = VoxManager::with_workers(Config::default(), 1);
    let mut b = VoxManager::with_workers(Config::default(), 1);
    for d in &deltas {
        a.on_wire_delta(vox, d);
    }
    for d in deltas.iter().rev() {
        b.on_wire_delta(vox, d);
    }
    assert!(grids_equal(&a, &b, vox));
}

#[test]
fn duplicated_delivery_is_idempotent() {
    let vox = VoxId(2);
    let red = encoded(0, [1, 1, 1], 1, PaletteColor::rgb(210, 0, 0));
    let blue = encoded(0, [1, 1, 1], 2, PaletteColor::rgb(0, 0, 210));

    let mut a = VoxManager::with_workers(Config::default(), 1);
    let mut b = VoxManager::with_workers(Config::default(), 1);
    a.on_wire_delta(vox, &red);
    a.on_wire_delta(vox, &blue);
    b.on_wire_delta(vox, &blue);
    b.on_wire_delta(vox, &red);
    b.on_wire_delta(vox, &blue);
    b.on_wire_delta(vox, &red);
    assert!(grids_equal(&a, &b, vox));
    assert_eq!(
        a.model(vox).unwrap().frame(0).unwrap().color_at(1, 1, 1),
        Some(PaletteColor::rgb(0, 0, 210)),
        "newest revision wins"
    );
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]
    #[test]
    fn shuffled_delivery_converges(
        edits in proptest::collection::vec(
            ((0usize..2, 0i32..4, 0i32..4), 1u64..4, 0u8..3), 1..8),
        swaps in proptest::collection::vec((0usize..8, 0usize..8), 0..12),
    ) {
        let colors = [
            PaletteColor::rgb(220, 0, 0),
            PaletteColor::rgb(0, 220, 0),
            PaletteColor::rgb(0, 0, 220),
        ];
        let vox = VoxId(3);
        let deltas: Vec<Vec<u8>> = edits
            .iter()
            .map(|((frame, ox, oy), rev, ci)| {
                encoded(*frame, [*ox, *oy, 0], *rev, colors[*ci as usize])
            })
            .collect();

        let mut order: Vec<usize> = (0..deltas.len()).collect();
        for (i, j) in swaps {
            let n = order.len();
            order.swap(i % n, j % n);
        }

        let mut a = VoxManager::with_workers(Config::default(), 1);
        let mut b = VoxManager::with_workers(Config::default(), 1);
        for i in 0..deltas.len() {
            a.on_wire_delta(vox, &deltas[i]);
        }
        for &i in &order {
            b.on_wire_delta(vox, &deltas[i]);
        }
        prop_assert!(grids_equal(&a, &b, vox));
    }
}
