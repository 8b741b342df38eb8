//! Boundaries to the systems this subsystem drives but does not own:
//! the scene-graph/render host, the broadcast transport, and durable
//! storage. The physics engine boundary lives in `golem-physics`.

use golem_geom::Mat4;
use golem_grid::VoxId;
use golem_surface::SurfaceData;

/// Host-side geometry handle, opaque to this crate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MeshHandle(pub u64);

pub trait RenderHost {
    /// Creates the shared instanced mesh for one frame of a model.
    fn create_mesh(&mut self, vox: VoxId, frame: usize, surface: &SurfaceData) -> MeshHandle;
    /// Replaces the geometry behind an existing handle.
    fn update_mesh(&mut self, handle: MeshHandle, surface: &SurfaceData);
    fn destroy_mesh(&mut self, handle: MeshHandle);
    /// Uploads the per-instance transform buffer for a frame mesh.
    fn set_instances(&mut self, handle: MeshHandle, transforms: &[Mat4]);
    /// Creates the standalone, non-instanced preview mesh for a frozen
    /// source. Destroyed with [`destroy_mesh`](Self::destroy_mesh).
    fn create_targeting_mesh(
        &mut self,
        vox: VoxId,
        surface: &SurfaceData,
        transform: Mat4,
    ) -> MeshHandle;
}

/// Best-effort broadcast; no ordering or exactly-once guarantee.
pub trait Transport {
    fn broadcast(&mut self, vox: VoxId, delta: &[u8]);
}

pub trait StorageHost {
    /// Stored model bytes, `None` while content is still in flight.
    fn get_or_fetch_model(&mut self, vox: VoxId) -> Option<Vec<u8>>;
    fn write_model(&mut self, vox: VoxId, bytes: &[u8]);
}
