//! Entry lifecycle against mock hosts: registration readiness, edit
//! scheduling, targeting-mesh freeze/unfreeze, shape swaps, teardown.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use golem_geom::{Mat4, Vec3};
use golem_grid::{Model, PaletteColor, VoxId, VoxelGrid, codec};
use golem_instances::{
    Config, Event, Hosts, MeshHandle, Presence, RegisterError, RenderHost, SourceId, StorageHost,
    Transport, VoxManager,
};
use golem_physics::{BodyId, CollisionMesh, PhysicsHost, ShapeId, ShapeKind};
use golem_surface::SurfaceData;

const RED: PaletteColor = PaletteColor::rgb(200, 16, 16);

#[derive(Default)]
struct MockRender {
    next: u64,
    live: HashSet<MeshHandle>,
    targeting_live: HashSet<MeshHandle>,
    instance_uploads: Vec<(MeshHandle, usize)>,
}

impl RenderHost for MockRender {
    fn create_mesh(&mut self, _vox: VoxId, _frame: usize, surface: &SurfaceData) -> MeshHandle {
        assert!(surface.vertex_count() > 0);
        self.next += 1;
        let h = MeshHandle(self.next);
        self.live.insert(h);
        h
    }

    fn update_mesh(&mut self, handle: MeshHandle, _surface: &SurfaceData) {
        assert!(self.live.contains(&handle) || self.targeting_live.contains(&handle));
    }

    fn destroy_mesh(&mut self, handle: MeshHandle) {
        assert!(self.live.remove(&handle) || self.targeting_live.remove(&handle));
    }

    fn set_instances(&mut self, handle: MeshHandle, transforms: &[Mat4]) {
        self.instance_uploads.push((handle, transforms.len()));
    }

    fn create_targeting_mesh(
        &mut self,
        _vox: VoxId,
        _surface: &SurfaceData,
        _transform: Mat4,
    ) -> MeshHandle {
        self.next += 1;
        let h = MeshHandle(self.next);
        self.targeting_live.insert(h);
        h
    }
}

#[derive(Default)]
struct MockPhysics {
    next: u64,
    live: HashSet<ShapeId>,
    assigned: Vec<(Vec<BodyId>, ShapeId)>,
    kinds: Vec<ShapeKind>,
}

impl PhysicsHost for MockPhysics {
    fn create_shape(&mut self, _mesh: &CollisionMesh, kind: ShapeKind, _offset: Vec3) -> ShapeId {
        self.next += 1;
        let id = ShapeId(self.next);
        self.live.insert(id);
        self.kinds.push(kind);
        id
    }

    fn set_shapes(&mut self, bodies: &[BodyId], shape: ShapeId) {
        self.assigned.push((bodies.to_vec(), shape));
    }

    fn destroy_shape(&mut self, shape: ShapeId) {
        assert!(self.live.remove(&shape));
    }
}

#[derive(Default)]
struct MockTransport {
    sent: Vec<(VoxId, Vec<u8>)>,
}

impl Transport for MockTransport {
    fn broadcast(&mut self, vox: VoxId, delta: &[u8]) {
        self.sent.push((vox, delta.to_vec()));
    }
}

#[derive(Default)]
struct MockStorage {
    stored: HashMap<VoxId, Vec<u8>>,
    writes: Vec<VoxId>,
}

impl StorageHost for MockStorage {
    fn get_or_fetch_model(&mut self, vox: VoxId) -> Option<Vec<u8>> {
        self.stored.get(&vox).cloned()
    }

    fn write_model(&mut self, vox: VoxId, bytes: &[u8]) {
        self.writes.push(vox);
        self.stored.insert(vox, bytes.to_vec());
    }
}

struct Rig {
    mgr: VoxManager,
    render: MockRender,
    physics: MockPhysics,
    transport: MockTransport,
    storage: MockStorage,
    events: Vec<Event>,
}

impl Rig {
    fn new(cfg: Config) -> Self {
        let _ = env_logger::builder().is_test(true).try_init();
        Self {
            mgr: VoxManager::with_workers(cfg, 1),
            render: MockRender::default(),
            physics: MockPhysics::default(),
            transport: MockTransport::default(),
            storage: MockStorage::default(),
            events: Vec::new(),
        }
    }

    fn with_stored_model(cfg: Config, vox: VoxId) -> Self {
        let mut rig = Self::new(cfg);
        let mut model = Model::new(8, 8, 8);
        if let Some(f0) = model.ensure_frame(0) {
            f0.paint(1, 1, 1, RED);
        }
        rig.storage.stored.insert(vox, codec::encode_model(&model));
        rig
    }

    fn fast_cfg() -> Config {
        Config {
            shape_debounce_ticks: 1,
            ..Config::default()
        }
    }

    fn tick(&mut self) {
        let mut hosts = Hosts {
            render: &mut self.render,
            physics: &mut self.physics,
            transport: &mut self.transport,
            storage: &mut self.storage,
        };
        self.mgr.tick(&mut hosts);
        self.events.extend(self.mgr.drain_events());
    }

    /// Ticks until `pred` holds over everything observed so far;
    /// worker results arrive asynchronously.
    fn tick_until(&mut self, pred: impl Fn(&Rig) -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            self.tick();
            if pred(self) {
                return;
            }
            assert!(Instant::now() < deadline, "condition never reached");
            std::thread::sleep(Duration::from_millis(2));
        }
    }

    fn register(&mut self, vox: VoxId, source: SourceId, body: Option<BodyId>) -> u8 {
        self.try_register(vox, source, Mat4::IDENTITY, body)
            .expect("register")
    }

    fn try_register(
        &mut self,
        vox: VoxId,
        source: SourceId,
        transform: Mat4,
        body: Option<BodyId>,
    ) -> Result<u8, RegisterError> {
        let mut hosts = Hosts {
            render: &mut self.render,
            physics: &mut self.physics,
            transport: &mut self.transport,
            storage: &mut self.storage,
        };
        self.mgr.register(&mut hosts, vox, source, transform, body)
    }

    fn unregister(&mut self, vox: VoxId, source: SourceId) {
        let mut hosts = Hosts {
            render: &mut self.render,
            physics: &mut self.physics,
            transport: &mut self.transport,
            storage: &mut self.storage,
        };
        self.mgr.unregister(&mut hosts, vox, source);
        self.events.extend(self.mgr.drain_events());
    }

    fn edit(&mut self, vox: VoxId, frame: usize, cell: (usize, usize, usize)) -> Option<u64> {
        let mut patch = VoxelGrid::new(1, 1, 1);
        patch.paint(0, 0, 0, RED);
        let mut hosts = Hosts {
            render: &mut self.render,
            physics: &mut self.physics,
            transport: &mut self.transport,
            storage: &mut self.storage,
        };
        self.mgr.apply_local_edit(
            &mut hosts,
            vox,
            frame,
            patch,
            [cell.0 as i32, cell.1 as i32, cell.2 as i32],
        )
    }

    fn saw(&self, want: &Event) -> bool {
        self.events.iter().any(|e| e == want)
    }
}

#[test]
fn registration_waits_for_the_first_mesh_build() {
    let vox = VoxId(1);
    let src = SourceId(10);
    let mut rig = Rig::with_stored_model(Rig::fast_cfg(), vox);

    let slot = rig.register(vox, src, None);
    assert_eq!(slot, 0);
    assert_eq!(rig.mgr.source_presence(vox, src), Some(Presence::Pending));
    assert!(
        !rig.saw(&Event::SourceRegistered {
            vox,
            source: src,
            slot: 0
        })
    );

    rig.mgr.note_visible(vox, src);
    rig.tick_until(|r| {
        r.saw(&Event::SourceRegistered {
            vox,
            source: src,
            slot: 0,
        })
    });
    assert_eq!(rig.mgr.source_presence(vox, src), Some(Presence::Active));
    assert_eq!(rig.render.live.len(), 1, "frame 0 mesh created");
}

#[test]
fn registration_without_content_completes_immediately() {
    let vox = VoxId(2);
    let src = SourceId(20);
    let mut rig = Rig::new(Rig::fast_cfg());

    rig.register(vox, src, None);
    rig.events.extend(rig.mgr.drain_events());
    assert!(rig.saw(&Event::SourceRegistered {
        vox,
        source: src,
        slot: 0
    }));
    assert_eq!(rig.mgr.source_presence(vox, src), Some(Presence::Active));
    rig.tick();
    assert!(rig.render.live.is_empty(), "nothing to mesh without content");
}

#[test]
fn second_registration_activates_without_waiting() {
    let vox = VoxId(3);
    let mut rig = Rig::with_stored_model(Rig::fast_cfg(), vox);
    rig.register(vox, SourceId(1), None);
    rig.tick_until(|r| {
        r.saw(&Event::SourceRegistered {
            vox,
            source: SourceId(1),
            slot: 0,
        })
    });

    rig.register(vox, SourceId(2), None);
    rig.events.extend(rig.mgr.drain_events());
    assert!(rig.saw(&Event::SourceRegistered {
        vox,
        source: SourceId(2),
        slot: 1
    }));
}

#[test]
fn duplicate_registration_is_rejected() {
    let vox = VoxId(4);
    let mut rig = Rig::new(Rig::fast_cfg());
    rig.register(vox, SourceId(1), None);
    assert_eq!(
        rig.try_register(vox, SourceId(1), Mat4::IDENTITY, None),
        Err(RegisterError::DuplicateSource)
    );
}

#[test]
fn local_edit_broadcasts_and_remeshes() {
    let vox = VoxId(5);
    let src = SourceId(50);
    let mut rig = Rig::new(Rig::fast_cfg());
    rig.register(vox, src, None);

    let rev = rig.edit(vox, 0, (2, 2, 2)).expect("edit applies");
    assert_eq!(rev, 1);
    assert_eq!(rig.transport.sent.len(), 1, "delta broadcast once");
    assert_eq!(
        rig.mgr
            .model(vox)
            .and_then(|m| m.frame(0))
            .and_then(|g| g.color_at(2, 2, 2)),
        Some(RED)
    );

    rig.tick_until(|r| r.saw(&Event::FrameMeshReady { vox, frame: 0 }));
    assert_eq!(rig.render.live.len(), 1);
}

#[test]
fn frame_zero_edit_regenerates_the_shape_after_the_debounce() {
    let vox = VoxId(6);
    let src = SourceId(60);
    let body = BodyId(600);
    let mut rig = Rig::new(Rig::fast_cfg());
    rig.register(vox, src, Some(body));
    rig.mgr.body_ready(&mut rig.physics, body);

    rig.edit(vox, 0, (1, 1, 1));
    rig.tick_until(|r| r.mgr.current_shape(vox).is_some());
    assert_eq!(rig.physics.assigned.last().unwrap().0, vec![body]);
    assert_eq!(rig.physics.kinds.last(), Some(&ShapeKind::Hull));
}

#[test]
fn scale_change_steps_the_quad_size_and_redirties() {
    let vox = VoxId(7);
    let src = SourceId(70);
    let mut rig = Rig::new(Rig::fast_cfg());
    rig.register(vox, src, None);
    rig.edit(vox, 0, (1, 1, 1));
    rig.tick();
    assert_eq!(rig.mgr.quad_size(vox), Some(2), "identity scale is mid-step");

    rig.mgr
        .set_source_transform(vox, src, Mat4::from_trs(Vec3::ZERO, 0.0, Vec3::new(4.0, 4.0, 4.0)));
    rig.tick_until(|r| r.saw(&Event::QuadSizeChanged { vox, quad_size: 1 }));
    assert_eq!(rig.mgr.quad_size(vox), Some(1));
}

#[test]
fn malformed_wire_delta_is_dropped() {
    let vox = VoxId(8);
    let mut rig = Rig::new(Rig::fast_cfg());
    rig.mgr.on_wire_delta(vox, &[0xff, 0x01]);
    assert!(!rig.mgr.has_entry(vox));
    assert!(rig.mgr.model(vox).is_none());
}

#[test]
fn wire_delta_creates_model_before_any_instance() {
    let vox = VoxId(9);
    let mut rig = Rig::new(Rig::fast_cfg());

    let mut patch = VoxelGrid::new(1, 1, 1);
    patch.paint(0, 0, 0, RED);
    let bytes = codec::encode_delta(&golem_grid::Delta {
        frame: 0,
        patch,
        offset: [3, 3, 3],
        revision: 1,
    });
    rig.mgr.on_wire_delta(vox, &bytes);

    assert!(rig.mgr.has_entry(vox));
    assert_eq!(
        rig.mgr
            .model(vox)
            .and_then(|m| m.frame(0))
            .and_then(|g| g.color_at(3, 3, 3)),
        Some(RED)
    );
}

#[test]
fn registration_against_an_all_empty_model_completes() {
    let vox = VoxId(14);
    let src = SourceId(140);
    let mut rig = Rig::new(Rig::fast_cfg());

    // An erase-only delta creates the model with nothing to mesh.
    let bytes = codec::encode_delta(&golem_grid::Delta {
        frame: 0,
        patch: VoxelGrid::new(2, 2, 2),
        offset: [0, 0, 0],
        revision: 1,
    });
    rig.mgr.on_wire_delta(vox, &bytes);
    assert!(
        rig.mgr
            .model(vox)
            .and_then(|m| m.frame(0))
            .is_some_and(|g| g.is_all_empty())
    );

    rig.register(vox, src, None);
    assert_eq!(rig.mgr.source_presence(vox, src), Some(Presence::Pending));

    rig.tick();
    assert!(
        rig.saw(&Event::SourceRegistered {
            vox,
            source: src,
            slot: 0
        }),
        "empty model resolves the readiness wait"
    );
    assert_eq!(rig.mgr.source_presence(vox, src), Some(Presence::Active));
    assert!(rig.render.live.is_empty(), "nothing was meshed");

    // Content arriving afterwards meshes and uploads normally.
    rig.mgr.note_visible(vox, src);
    rig.edit(vox, 0, (1, 1, 1));
    rig.tick_until(|r| !r.render.live.is_empty());
}

#[test]
fn freeze_preview_revert_leaves_the_model_untouched() {
    let vox = VoxId(10);
    let src = SourceId(100);
    let mut rig = Rig::with_stored_model(Rig::fast_cfg(), vox);
    rig.register(vox, src, None);
    rig.tick_until(|r| r.mgr.source_presence(vox, src) == Some(Presence::Active));

    assert!(rig.mgr.freeze(vox, src));
    assert_eq!(rig.mgr.source_presence(vox, src), Some(Presence::Frozen));

    let mut patch = VoxelGrid::new(1, 1, 1);
    patch.paint(0, 0, 0, RED);
    let mut hosts = Hosts {
        render: &mut rig.render,
        physics: &mut rig.physics,
        transport: &mut rig.transport,
        storage: &mut rig.storage,
    };
    rig.mgr.preview(&mut hosts, vox, patch, [5, 5, 5]);
    assert_eq!(rig.render.targeting_live.len(), 1);

    let mut hosts = Hosts {
        render: &mut rig.render,
        physics: &mut rig.physics,
        transport: &mut rig.transport,
        storage: &mut rig.storage,
    };
    rig.mgr.unfreeze_revert(&mut hosts, vox);
    assert!(rig.render.targeting_live.is_empty());
    assert_eq!(rig.mgr.source_presence(vox, src), Some(Presence::Active));
    assert_eq!(
        rig.mgr
            .model(vox)
            .and_then(|m| m.frame(0))
            .and_then(|g| g.color_at(5, 5, 5)),
        None,
        "revert discards the overlay"
    );
}

#[test]
fn unfreeze_apply_commits_the_overlay_as_a_delta() {
    let vox = VoxId(11);
    let src = SourceId(110);
    let mut rig = Rig::with_stored_model(Rig::fast_cfg(), vox);
    rig.register(vox, src, None);
    rig.tick_until(|r| r.mgr.source_presence(vox, src) == Some(Presence::Active));
    assert!(rig.mgr.freeze(vox, src));

    let mut patch = VoxelGrid::new(1, 1, 1);
    patch.paint(0, 0, 0, RED);
    let mut hosts = Hosts {
        render: &mut rig.render,
        physics: &mut rig.physics,
        transport: &mut rig.transport,
        storage: &mut rig.storage,
    };
    rig.mgr.preview(&mut hosts, vox, patch, [6, 6, 6]);
    let mut hosts = Hosts {
        render: &mut rig.render,
        physics: &mut rig.physics,
        transport: &mut rig.transport,
        storage: &mut rig.storage,
    };
    rig.mgr.unfreeze_apply(&mut hosts, vox);

    assert_eq!(
        rig.mgr
            .model(vox)
            .and_then(|m| m.frame(0))
            .and_then(|g| g.color_at(6, 6, 6)),
        Some(RED)
    );
    assert_eq!(rig.transport.sent.len(), 1, "committed edit broadcast");
    assert!(rig.render.targeting_live.is_empty());
}

#[test]
fn unregistering_the_last_source_releases_everything() {
    let vox = VoxId(12);
    let src = SourceId(120);
    let body = BodyId(1200);
    let mut rig = Rig::with_stored_model(Rig::fast_cfg(), vox);
    rig.register(vox, src, Some(body));
    rig.mgr.body_ready(&mut rig.physics, body);
    rig.edit(vox, 0, (0, 0, 0));
    rig.tick_until(|r| r.mgr.current_shape(vox).is_some() && !r.render.live.is_empty());

    rig.unregister(vox, src);
    assert!(rig.saw(&Event::EntryDestroyed { vox }));
    assert!(!rig.mgr.has_entry(vox));
    assert!(rig.mgr.model(vox).is_none());
    assert!(rig.render.live.is_empty(), "no leaked geometry handles");
    assert!(rig.physics.live.is_empty(), "no leaked shape ids");
}

#[test]
fn instance_upload_is_gated_on_visibility() {
    let vox = VoxId(13);
    let src = SourceId(130);
    let mut rig = Rig::with_stored_model(Rig::fast_cfg(), vox);
    rig.register(vox, src, None);
    rig.tick_until(|r| !r.render.live.is_empty());

    // Run past the 30-tick visibility window; registration stamped
    // tick 0, so the instance now counts as off-screen.
    for _ in 0..40 {
        rig.tick();
    }
    let before = rig.render.instance_uploads.len();
    rig.mgr.set_source_transform(vox, src, Mat4::IDENTITY);
    rig.tick();
    assert_eq!(
        rig.render.instance_uploads.len(),
        before,
        "off-screen entries skip transform uploads"
    );

    rig.mgr.note_visible(vox, src);
    rig.tick();
    assert!(rig.render.instance_uploads.len() > before);
    assert_eq!(rig.render.instance_uploads.last().unwrap().1, 1);
}
