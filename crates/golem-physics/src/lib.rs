//! Collision-shape bridge between vox models and the physics engine.
//!
//! Frame 0 of a model is meshed color-agnostically at a cell-count
//! driven level of detail, turned into a triangle soup, and handed to
//! the [`PhysicsHost`] as either a convex hull or an "environmental"
//! shape. Shape swaps are asynchronous per body: the new shape is
//! assigned only once every affected body has reported ready, and the
//! previous shape is destroyed only after the assignment, so a body is
//! never momentarily shapeless.
#![forbid(unsafe_code)]

use golem_geom::Vec3;
use golem_grid::{VoxId, VoxelGrid};
use golem_mesh::{LodFactor, MeshParams, QuadList, mesh_solid_into};
use hashbrown::{HashMap, HashSet};

/// Engine-side shape handle, opaque to this crate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShapeId(pub u64);

/// Engine-side rigid-body handle for one placed source.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BodyId(pub u64);

/// How the engine should realize the collision mesh.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShapeKind {
    /// Convex hull, for ordinary small/movable objects.
    Hull,
    /// Decomposed shape for large mostly-static structures; excluded
    /// from colliding with other environmental shapes and the static
    /// environment to bound simulation cost.
    Environmental,
}

/// Non-empty cell counts above which the collision mesh drops to a
/// coarser resolution.
pub const COLLISION_CELLS_QUARTER: usize = 12_500;
pub const COLLISION_CELLS_HALF: usize = 3_500;

/// Collision LOD from frame 0's non-empty cell count.
#[inline]
pub fn collision_lod(filled: usize) -> LodFactor {
    if filled > COLLISION_CELLS_QUARTER {
        LodFactor::Quarter
    } else if filled > COLLISION_CELLS_HALF {
        LodFactor::Half
    } else {
        LodFactor::Full
    }
}

/// A quad size under the threshold means the entry renders at fine
/// detail because it is scaled large, which marks it environmental.
#[inline]
pub fn classify(quad_size: u8, env_quad_threshold: u8) -> ShapeKind {
    if quad_size < env_quad_threshold {
        ShapeKind::Environmental
    } else {
        ShapeKind::Hull
    }
}

/// Triangle soup handed to the physics engine. Positions are centered
/// on the model pivot like the render geometry.
#[derive(Debug, Default, Clone)]
pub struct CollisionMesh {
    pub positions: Vec<Vec3>,
    pub indices: Vec<u32>,
}

impl CollisionMesh {
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}

/// Builds the simplified collision mesh for a grid: color-agnostic
/// greedy quads at [`collision_lod`], expanded to two triangles each.
pub fn build_collision_mesh(grid: &VoxelGrid) -> CollisionMesh {
    let lod = collision_lod(grid.filled_count());
    let params = MeshParams {
        lod,
        ..MeshParams::default()
    };
    let mut quads = QuadList::new();
    mesh_solid_into(grid, &params, &mut quads);

    let shift = grid.shift();
    let mut mesh = CollisionMesh {
        positions: Vec::with_capacity(quads.len() * 4),
        indices: Vec::with_capacity(quads.len() * 6),
    };
    for q in &quads.quads {
        let base = mesh.positions.len() as u32;
        for c in q.corners() {
            mesh.positions.push(Vec3 {
                x: (c[0] - shift[0]) as f32,
                y: (c[1] - shift[1]) as f32,
                z: (c[2] - shift[2]) as f32,
            });
        }
        mesh.indices
            .extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
    }
    log::debug!(
        "collision mesh: {} filled cells -> lod {:?}, {} quads",
        grid.filled_count(),
        lod,
        quads.len()
    );
    mesh
}

/// Engine-side operations the bridge drives. The host owns the real
/// shape/body resources.
pub trait PhysicsHost {
    fn create_shape(&mut self, mesh: &CollisionMesh, kind: ShapeKind, offset: Vec3) -> ShapeId;
    fn set_shapes(&mut self, bodies: &[BodyId], shape: ShapeId);
    fn destroy_shape(&mut self, shape: ShapeId);
}

#[derive(Debug)]
struct PendingSwap {
    shape: ShapeId,
    bodies: Vec<BodyId>,
    waiting: HashSet<BodyId>,
}

#[derive(Debug, Default)]
struct ShapeState {
    current: Option<ShapeId>,
    pending: Option<PendingSwap>,
}

/// Tracks the live and in-flight shape per vox entry, gating each swap
/// on body readiness.
#[derive(Debug, Default)]
pub struct ShapeBridge {
    states: HashMap<VoxId, ShapeState>,
    ready: HashSet<BodyId>,
}

impl ShapeBridge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds and requests a replacement shape for `id`. A still-pending
    /// earlier swap is superseded and its shape destroyed. The new
    /// shape is assigned once every body in `bodies` is ready; bodies
    /// already ready count immediately.
    pub fn request_swap(
        &mut self,
        host: &mut dyn PhysicsHost,
        id: VoxId,
        grid: &VoxelGrid,
        kind: ShapeKind,
        offset: Vec3,
        bodies: &[BodyId],
    ) {
        let mesh = build_collision_mesh(grid);
        if mesh.is_empty() {
            log::debug!("{id}: empty grid, skipping shape swap");
            return;
        }
        let shape = host.create_shape(&mesh, kind, offset);

        let state = self.states.entry(id).or_default();
        if let Some(old) = state.pending.take() {
            log::debug!("{id}: superseding pending shape {:?}", old.shape);
            host.destroy_shape(old.shape);
        }
        let waiting: HashSet<BodyId> = bodies
            .iter()
            .copied()
            .filter(|b| !self.ready.contains(b))
            .collect();
        state.pending = Some(PendingSwap {
            shape,
            bodies: bodies.to_vec(),
            waiting,
        });
        Self::try_complete(host, id, state);
    }

    /// Readiness callback for one body. Completes any swap that was
    /// only waiting on it.
    pub fn body_ready(&mut self, host: &mut dyn PhysicsHost, body: BodyId) {
        self.ready.insert(body);
        for (id, state) in self.states.iter_mut() {
            if let Some(pending) = state.pending.as_mut() {
                pending.waiting.remove(&body);
            }
            Self::try_complete(host, *id, state);
        }
    }

    /// Drops a destroyed body from readiness tracking; pending swaps
    /// stop waiting on it.
    pub fn body_gone(&mut self, host: &mut dyn PhysicsHost, body: BodyId) {
        self.ready.remove(&body);
        for (id, state) in self.states.iter_mut() {
            if let Some(pending) = state.pending.as_mut() {
                pending.waiting.remove(&body);
                pending.bodies.retain(|b| *b != body);
            }
            Self::try_complete(host, *id, state);
        }
    }

    /// Destroys every shape owned for `id`; called when its entry dies.
    pub fn release(&mut self, host: &mut dyn PhysicsHost, id: VoxId) {
        let Some(state) = self.states.remove(&id) else {
            return;
        };
        if let Some(pending) = state.pending {
            host.destroy_shape(pending.shape);
        }
        if let Some(current) = state.current {
            host.destroy_shape(current);
        }
    }

    #[inline]
    pub fn current_shape(&self, id: VoxId) -> Option<ShapeId> {
        self.states.get(&id).and_then(|s| s.current)
    }

    #[inline]
    pub fn swap_pending(&self, id: VoxId) -> bool {
        self.states.get(&id).is_some_and(|s| s.pending.is_some())
    }

    // Assign-then-destroy, in that order, so the bodies always hold a
    // valid shape.
    fn try_complete(host: &mut dyn PhysicsHost, id: VoxId, state: &mut ShapeState) {
        let Some(pending) = state.pending.take_if(|p| p.waiting.is_empty()) else {
            return;
        };
        host.set_shapes(&pending.bodies, pending.shape);
        if let Some(old) = state.current.replace(pending.shape) {
            host.destroy_shape(old);
        }
        log::debug!(
            "{id}: shape {:?} live on {} bodies",
            pending.shape,
            pending.bodies.len()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use golem_grid::PaletteColor;

    #[derive(Debug, PartialEq)]
    enum Op {
        Create(ShapeId, ShapeKind),
        Set(Vec<BodyId>, ShapeId),
        Destroy(ShapeId),
    }

    #[derive(Default)]
    struct MockPhysics {
        next: u64,
        ops: Vec<Op>,
    }

    impl PhysicsHost for MockPhysics {
        fn create_shape(
            &mut self,
            _mesh: &CollisionMesh,
            kind: ShapeKind,
            _offset: Vec3,
        ) -> ShapeId {
            self.next += 1;
            let id = ShapeId(self.next);
            self.ops.push(Op::Create(id, kind));
            id
        }

        fn set_shapes(&mut self, bodies: &[BodyId], shape: ShapeId) {
            self.ops.push(Op::Set(bodies.to_vec(), shape));
        }

        fn destroy_shape(&mut self, shape: ShapeId) {
            self.ops.push(Op::Destroy(shape));
        }
    }

    fn one_voxel_grid() -> VoxelGrid {
        let mut g = VoxelGrid::new(4, 4, 4);
        g.paint(1, 1, 1, PaletteColor::rgb(200, 10, 10));
        g
    }

    #[test]
    fn lod_thresholds() {
        assert_eq!(collision_lod(0), LodFactor::Full);
        assert_eq!(collision_lod(3_500), LodFactor::Full);
        assert_eq!(collision_lod(3_501), LodFactor::Half);
        assert_eq!(collision_lod(12_500), LodFactor::Half);
        assert_eq!(collision_lod(12_501), LodFactor::Quarter);
    }

    #[test]
    fn fine_quads_classify_environmental() {
        assert_eq!(classify(1, 2), ShapeKind::Environmental);
        assert_eq!(classify(2, 2), ShapeKind::Hull);
        assert_eq!(classify(4, 2), ShapeKind::Hull);
    }

    #[test]
    fn single_voxel_mesh_is_a_centered_cube() {
        let mesh = build_collision_mesh(&one_voxel_grid());
        assert_eq!(mesh.positions.len(), 24);
        assert_eq!(mesh.indices.len(), 36);
        // Cell (1,1,1) in a 4-wide grid (shift 2) spans -1..0 per axis.
        for p in &mesh.positions {
            for c in [p.x, p.y, p.z] {
                assert!(c == -1.0 || c == 0.0, "unexpected corner {c}");
            }
        }
    }

    #[test]
    fn swap_waits_for_every_body() {
        let mut host = MockPhysics::default();
        let mut bridge = ShapeBridge::new();
        let id = VoxId(1);
        let bodies = [BodyId(10), BodyId(11)];

        bridge.request_swap(
            &mut host,
            id,
            &one_voxel_grid(),
            ShapeKind::Hull,
            Vec3::ZERO,
            &bodies,
        );
        assert!(bridge.swap_pending(id));
        assert_eq!(bridge.current_shape(id), None);

        bridge.body_ready(&mut host, BodyId(10));
        assert!(bridge.swap_pending(id), "one body still pending");

        bridge.body_ready(&mut host, BodyId(11));
        assert!(!bridge.swap_pending(id));
        assert_eq!(bridge.current_shape(id), Some(ShapeId(1)));
        assert_eq!(
            host.ops.last().unwrap(),
            &Op::Set(bodies.to_vec(), ShapeId(1))
        );
    }

    #[test]
    fn replacement_destroys_old_shape_after_assignment() {
        let mut host = MockPhysics::default();
        let mut bridge = ShapeBridge::new();
        let id = VoxId(2);
        let body = [BodyId(5)];
        bridge.body_ready(&mut host, BodyId(5));

        let grid = one_voxel_grid();
        bridge.request_swap(&mut host, id, &grid, ShapeKind::Hull, Vec3::ZERO, &body);
        bridge.request_swap(&mut host, id, &grid, ShapeKind::Hull, Vec3::ZERO, &body);

        assert_eq!(bridge.current_shape(id), Some(ShapeId(2)));
        // Second swap: create 2, assign 2, then destroy 1.
        let tail = &host.ops[2..];
        assert_eq!(
            tail,
            &[
                Op::Create(ShapeId(2), ShapeKind::Hull),
                Op::Set(body.to_vec(), ShapeId(2)),
                Op::Destroy(ShapeId(1)),
            ]
        );
    }

    #[test]
    fn superseded_pending_shape_is_destroyed() {
        let mut host = MockPhysics::default();
        let mut bridge = ShapeBridge::new();
        let id = VoxId(3);
        let body = [BodyId(7)];
        let grid = one_voxel_grid();

        bridge.request_swap(&mut host, id, &grid, ShapeKind::Hull, Vec3::ZERO, &body);
        bridge.request_swap(&mut host, id, &grid, ShapeKind::Hull, Vec3::ZERO, &body);
        assert!(host.ops.contains(&Op::Destroy(ShapeId(1))));

        bridge.body_ready(&mut host, BodyId(7));
        assert_eq!(bridge.current_shape(id), Some(ShapeId(2)));
    }

    #[test]
    fn release_frees_current_and_pending() {
        let mut host = MockPhysics::default();
        let mut bridge = ShapeBridge::new();
        let id = VoxId(4);
        let grid = one_voxel_grid();

        bridge.request_swap(&mut host, id, &grid, ShapeKind::Hull, Vec3::ZERO, &[]);
        assert_eq!(bridge.current_shape(id), Some(ShapeId(1)));
        bridge.request_swap(
            &mut host,
            id,
            &grid,
            ShapeKind::Hull,
            Vec3::ZERO,
            &[BodyId(9)],
        );
        assert!(bridge.swap_pending(id));

        bridge.release(&mut host, id);
        assert!(host.ops.contains(&Op::Destroy(ShapeId(1))));
        assert!(host.ops.contains(&Op::Destroy(ShapeId(2))));
        assert_eq!(bridge.current_shape(id), None);
    }

    #[test]
    fn body_gone_unblocks_waiting_swap() {
        let mut host = MockPhysics::default();
        let mut bridge = ShapeBridge::new();
        let id = VoxId(5);
        let grid = one_voxel_grid();
        bridge.body_ready(&mut host, BodyId(1));

        bridge.request_swap(
            &mut host,
            id,
            &grid,
            ShapeKind::Environmental,
            Vec3::ZERO,
            &[BodyId(1), BodyId(2)],
        );
        assert!(bridge.swap_pending(id));

        bridge.body_gone(&mut host, BodyId(2));
        assert!(!bridge.swap_pending(id));
        assert_eq!(
            host.ops.last().unwrap(),
            &Op::Set(vec![BodyId(1)], ShapeId(1))
        );
    }
}
