//! Voxel-object subsystem: palette-indexed voxel models, greedy-meshed
//! surfaces, instanced placement with scale-driven LOD, convergent
//! delta replication, and asynchronous collision-shape swaps.
//!
//! The member crates each own one concern; this crate re-exports the
//! public surface and hosts the cross-crate integration tests.
#![forbid(unsafe_code)]

pub use golem_geom::{Aabb, Mat4, Vec3};
pub use golem_grid::{
    AoSettings, CodecError, Delta, DisplaySettings, MAX_FRAMES, Model, Palette, PaletteColor,
    VoxId, VoxelGrid, codec,
};
pub use golem_instances::{
    Config, Event, Hosts, MAX_INSTANCES, MeshHandle, Presence, PresenceEvent, RegisterError,
    RenderHost, SourceId, StorageHost, Transport, VoxManager,
};
pub use golem_mesh::{
    Axis, LodFactor, MeshParams, Quad, QuadList, downsample, mesh_colored, mesh_colored_into,
    mesh_solid, mesh_solid_into,
};
pub use golem_physics::{
    BodyId, CollisionMesh, PhysicsHost, ShapeBridge, ShapeId, ShapeKind, build_collision_mesh,
    classify, collision_lod,
};
pub use golem_runtime::{MeshJob, MeshJobOut, Runtime};
pub use golem_surface::{
    BufferPool, IndexData, SurfaceData, SurfaceOptions, build_surface, recycle_surface,
};
pub use golem_sync as sync;
pub use golem_sync::{DeltaRing, RING_CAPACITY, WritebackQueue};
