//! Instance manager: the owner of every vox model and its runtime
//! entry.
//!
//! Placed sources register against a vox id and get a stable instance
//! slot; edits (local or from the wire) flow through the conflict
//! resolver into the model, mark frames dirty, and the per-tick pass
//! rebuilds dirty frame meshes off-thread, uploads instance transforms,
//! and drives debounced collision-shape regeneration. Everything here
//! runs on the main thread; the only concurrency is the mesh worker
//! pool behind `golem_runtime`.
#![forbid(unsafe_code)]

mod config;
mod event;
mod hosts;
mod presence;
mod slots;

pub use config::Config;
pub use event::{Event, EventEnvelope, EventQueue};
pub use hosts::{MeshHandle, RenderHost, StorageHost, Transport};
pub use presence::{Presence, PresenceEvent, step as presence_step};
pub use slots::{MAX_INSTANCES, SlotMap, SourceId};

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use golem_geom::{Mat4, Vec3};
use golem_grid::{Model, VoxId, VoxelGrid, codec};
use golem_mesh::{LodFactor, MeshParams, QuadList, mesh_colored_into};
use golem_physics::{BodyId, PhysicsHost, ShapeBridge, classify};
use golem_runtime::{MeshJob, Runtime};
use golem_surface::{BufferPool, SurfaceOptions, build_surface, recycle_surface};
use golem_sync::{DeltaRing, WritebackQueue};
use hashbrown::HashMap;

/// All-zero transform; collapses an instance so holes and frozen slots
/// in the shared buffer render nothing.
const HIDDEN: Mat4 = Mat4 { m: [0.0; 16] };

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterError {
    /// All 255 instance slots for this vox id are taken.
    SlotsFull,
    /// The source is already registered against this vox id.
    DuplicateSource,
}

impl fmt::Display for RegisterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegisterError::SlotsFull => write!(f, "instance slots exhausted"),
            RegisterError::DuplicateSource => write!(f, "source already registered"),
        }
    }
}

impl std::error::Error for RegisterError {}

/// Mutable borrows of every external collaborator, bundled so tick and
/// the edit paths take one argument.
pub struct Hosts<'a> {
    pub render: &'a mut dyn RenderHost,
    pub physics: &'a mut dyn PhysicsHost,
    pub transport: &'a mut dyn Transport,
    pub storage: &'a mut dyn StorageHost,
}

struct SourceRec {
    slot: u8,
    presence: Presence,
    transform: Mat4,
    body: Option<BodyId>,
    /// Tick the culling pass last reported this instance on-screen.
    last_seen: u64,
}

#[derive(Default)]
struct FrameSlot {
    dirty: bool,
    /// Job id of the newest submitted build; older results are stale.
    building: Option<u64>,
    handle: Option<MeshHandle>,
}

struct Targeting {
    source: SourceId,
    frame: usize,
    overlay: Option<(VoxelGrid, [i32; 3])>,
    handle: Option<MeshHandle>,
}

/// Runtime state for one vox id. Owned by the manager; dies when the
/// last source unregisters.
struct VoxEntry {
    slots: SlotMap,
    sources: HashMap<SourceId, SourceRec>,
    frames: Vec<FrameSlot>,
    quad_size: u8,
    ring: DeltaRing,
    targeting: Option<Targeting>,
    /// Bumped on every shape-regen trigger; a due timer with an older
    /// sequence was rescheduled and is ignored.
    shape_seq: u64,
    transforms_dirty: bool,
    ever_built: bool,
}

impl VoxEntry {
    fn new() -> Self {
        Self {
            slots: SlotMap::new(),
            sources: HashMap::new(),
            frames: Vec::new(),
            quad_size: 4,
            ring: DeltaRing::new(),
            targeting: None,
            shape_seq: 0,
            transforms_dirty: false,
            ever_built: false,
        }
    }

    fn sync_frame_count(&mut self, n: usize) {
        while self.frames.len() < n {
            self.frames.push(FrameSlot::default());
        }
    }

    fn mark_all_dirty(&mut self) {
        for f in self.frames.iter_mut() {
            f.dirty = true;
        }
    }
}

pub struct VoxManager {
    cfg: Config,
    models: HashMap<VoxId, Model>,
    entries: HashMap<VoxId, VoxEntry>,
    runtime: Runtime,
    bridge: ShapeBridge,
    writeback: WritebackQueue,
    queue: EventQueue,
    out: Vec<Event>,
    // Main-thread scratch for targeting previews.
    quads: QuadList,
    pool: BufferPool,
}

impl VoxManager {
    pub fn new(cfg: Config) -> Self {
        Self::with_runtime(cfg, Runtime::new())
    }

    pub fn with_workers(cfg: Config, workers: usize) -> Self {
        Self::with_runtime(cfg, Runtime::with_workers(workers))
    }

    fn with_runtime(cfg: Config, runtime: Runtime) -> Self {
        Self {
            cfg,
            models: HashMap::new(),
            entries: HashMap::new(),
            runtime,
            bridge: ShapeBridge::new(),
            writeback: WritebackQueue::new(Duration::from_secs(cfg.writeback_interval_secs)),
            queue: EventQueue::new(),
            out: Vec::new(),
            quads: QuadList::new(),
            pool: BufferPool::new(),
        }
    }

    /// Registers a placed source and assigns its instance slot. Missing
    /// model content is not an error: the entry starts empty and meshes
    /// once content arrives. `SourceRegistered` is emitted once the
    /// entry's first mesh build lands (immediately when there is
    /// nothing to build or it already landed).
    pub fn register(
        &mut self,
        hosts: &mut Hosts<'_>,
        vox: VoxId,
        source: SourceId,
        transform: Mat4,
        body: Option<BodyId>,
    ) -> Result<u8, RegisterError> {
        if !self.models.contains_key(&vox) {
            match hosts.storage.get_or_fetch_model(vox) {
                Some(bytes) => match codec::decode_model(&bytes) {
                    Ok(m) => {
                        self.models.insert(vox, m);
                    }
                    Err(e) => log::warn!("{vox}: stored model undecodable, starting empty: {e}"),
                },
                None => log::debug!("{vox}: content not yet available, meshing deferred"),
            }
        }
        let has_model = self.models.contains_key(&vox);

        let entry = self.entries.entry(vox).or_insert_with(VoxEntry::new);
        if entry.sources.contains_key(&source) {
            return Err(RegisterError::DuplicateSource);
        }
        let Some(slot) = entry.slots.alloc(source) else {
            log::warn!("{vox}: rejecting {source:?}, instance slots exhausted");
            return Err(RegisterError::SlotsFull);
        };
        // Nothing to wait for without content or after the first build.
        let presence = if entry.ever_built || !has_model {
            Presence::Active
        } else {
            Presence::Pending
        };
        entry.sources.insert(
            source,
            SourceRec {
                slot,
                presence,
                transform,
                body,
                last_seen: self.queue.now,
            },
        );
        entry.transforms_dirty = true;
        if let Some(model) = self.models.get(&vox) {
            entry.sync_frame_count(model.frame_count());
            if !entry.ever_built {
                entry.mark_all_dirty();
            }
        }
        if presence == Presence::Active {
            self.out.push(Event::SourceRegistered { vox, source, slot });
        }
        log::debug!("{vox}: registered {source:?} in slot {slot}");
        Ok(slot)
    }

    /// Frees the source's slot; destroys the entry and every render and
    /// physics resource it owns once no sources remain.
    pub fn unregister(&mut self, hosts: &mut Hosts<'_>, vox: VoxId, source: SourceId) {
        let Some(entry) = self.entries.get_mut(&vox) else {
            return;
        };
        let Some(rec) = entry.sources.remove(&source) else {
            log::warn!("{vox}: unregister of unknown {source:?}");
            return;
        };
        entry.slots.free(rec.slot);
        entry.transforms_dirty = true;
        if entry.targeting.as_ref().is_some_and(|t| t.source == source) {
            if let Some(t) = entry.targeting.take() {
                if let Some(h) = t.handle {
                    hosts.render.destroy_mesh(h);
                }
            }
        }
        if let Some(body) = rec.body {
            self.bridge.body_gone(hosts.physics, body);
        }
        if self.entries.get(&vox).is_some_and(|e| e.sources.is_empty()) {
            self.destroy_entry(hosts, vox);
        }
    }

    fn destroy_entry(&mut self, hosts: &mut Hosts<'_>, vox: VoxId) {
        let Some(entry) = self.entries.remove(&vox) else {
            return;
        };
        for slot in entry.frames {
            if let Some(h) = slot.handle {
                hosts.render.destroy_mesh(h);
            }
        }
        if let Some(t) = entry.targeting {
            if let Some(h) = t.handle {
                hosts.render.destroy_mesh(h);
            }
        }
        self.bridge.release(hosts.physics, vox);
        self.writeback.forget(vox);
        self.models.remove(&vox);
        self.out.push(Event::EntryDestroyed { vox });
        log::info!("{vox}: entry destroyed");
    }

    pub fn set_source_transform(&mut self, vox: VoxId, source: SourceId, transform: Mat4) {
        if let Some(entry) = self.entries.get_mut(&vox) {
            if let Some(rec) = entry.sources.get_mut(&source) {
                rec.transform = transform;
                entry.transforms_dirty = true;
            }
        }
    }

    /// Culling-pass feedback: the instance was on-screen this tick.
    pub fn note_visible(&mut self, vox: VoxId, source: SourceId) {
        let now = self.queue.now;
        if let Some(entry) = self.entries.get_mut(&vox) {
            if let Some(rec) = entry.sources.get_mut(&source) {
                rec.last_seen = now;
            }
        }
    }

    /// Applies a local edit: bumps the revision, broadcasts the delta,
    /// runs it through the resolver (so it lands in the ring), and
    /// schedules remesh/shape/writeback work. Returns the revision, or
    /// `None` when the frame index is past the cap.
    pub fn apply_local_edit(
        &mut self,
        hosts: &mut Hosts<'_>,
        vox: VoxId,
        frame: usize,
        patch: VoxelGrid,
        offset: [i32; 3],
    ) -> Option<u64> {
        let n = self.cfg.default_model_size;
        let model = self.models.entry(vox).or_insert_with(|| Model::new(n, n, n));
        let entry = self.entries.entry(vox).or_insert_with(VoxEntry::new);

        let delta = golem_sync::local_edit(model, frame, patch, offset);
        hosts.transport.broadcast(vox, &codec::encode_delta(&delta));
        let rev = delta.revision;
        let touched = golem_sync::apply(model, &mut entry.ring, delta)?;

        entry.sync_frame_count(model.frame_count());
        if let Some(slot) = entry.frames.get_mut(touched) {
            slot.dirty = true;
        }
        if touched == 0 {
            entry.shape_seq += 1;
            self.queue.emit_after(
                self.cfg.shape_debounce_ticks,
                Event::ShapeRegenDue {
                    vox,
                    seq: entry.shape_seq,
                },
            );
        }
        self.writeback.mark_dirty(vox);
        Some(rev)
    }

    /// Handles a delta received from the wire. Malformed payloads are
    /// logged and dropped; a delta for an unknown vox id creates its
    /// model and entry, since content can arrive before any instance.
    pub fn on_wire_delta(&mut self, vox: VoxId, bytes: &[u8]) {
        let delta = match codec::decode_delta(bytes) {
            Ok(d) => d,
            Err(e) => {
                log::warn!("{vox}: dropping malformed delta: {e}");
                return;
            }
        };
        let n = self.cfg.default_model_size;
        let model = self.models.entry(vox).or_insert_with(|| Model::new(n, n, n));
        let entry = self.entries.entry(vox).or_insert_with(VoxEntry::new);
        let Some(touched) = golem_sync::apply(model, &mut entry.ring, delta) else {
            return;
        };
        entry.sync_frame_count(model.frame_count());
        if let Some(slot) = entry.frames.get_mut(touched) {
            slot.dirty = true;
        }
        if touched == 0 {
            entry.shape_seq += 1;
            self.queue.emit_after(
                self.cfg.shape_debounce_ticks,
                Event::ShapeRegenDue {
                    vox,
                    seq: entry.shape_seq,
                },
            );
        }
    }

    /// Detaches one active source onto a standalone targeting mesh for
    /// live edit preview. One frozen source per entry at a time.
    pub fn freeze(&mut self, vox: VoxId, source: SourceId) -> bool {
        let Some(entry) = self.entries.get_mut(&vox) else {
            return false;
        };
        if entry.targeting.is_some() {
            log::warn!("{vox}: a targeting mesh is already active");
            return false;
        }
        let Some(rec) = entry.sources.get_mut(&source) else {
            return false;
        };
        if rec.presence != Presence::Active {
            return false;
        }
        rec.presence = presence::step(rec.presence, PresenceEvent::Freeze);
        let frame = self.models.get(&vox).map_or(0, |m| m.current_frame());
        entry.targeting = Some(Targeting {
            source,
            frame,
            overlay: None,
            handle: None,
        });
        entry.transforms_dirty = true;
        true
    }

    /// Rebuilds the targeting mesh with `patch` overlaid on the frozen
    /// frame. Runs on the main thread with the manager's scratch, so a
    /// brush preview can update every tick without allocating.
    pub fn preview(
        &mut self,
        hosts: &mut Hosts<'_>,
        vox: VoxId,
        patch: VoxelGrid,
        offset: [i32; 3],
    ) {
        let Some(entry) = self.entries.get_mut(&vox) else {
            return;
        };
        let Some(model) = self.models.get(&vox) else {
            return;
        };
        let Some(t) = entry.targeting.as_mut() else {
            log::warn!("{vox}: preview without a frozen source");
            return;
        };
        let Some(base) = model.frame(t.frame) else {
            return;
        };
        let mut grid = base.clone();
        grid.overlay(&patch, offset);
        let params = MeshParams {
            max_quad: self.cfg.max_quad,
            lod: LodFactor::from_quad_size(entry.quad_size),
        };
        mesh_colored_into(&grid, &params, &mut self.quads);
        let opts = SurfaceOptions {
            ao: model.display.ao,
            ground_quad: true,
        };
        let surface = build_surface(&grid, &self.quads, &opts, &mut self.pool);
        let transform = entry
            .sources
            .get(&t.source)
            .map_or(Mat4::IDENTITY, |r| r.transform);
        match t.handle {
            Some(h) => hosts.render.update_mesh(h, &surface),
            None => t.handle = Some(hosts.render.create_targeting_mesh(vox, &surface, transform)),
        }
        recycle_surface(&mut self.pool, surface);
        t.overlay = Some((patch, offset));
    }

    /// Commits the preview overlay as a real delta and returns the
    /// source to the shared mesh.
    pub fn unfreeze_apply(&mut self, hosts: &mut Hosts<'_>, vox: VoxId) {
        let Some(entry) = self.entries.get_mut(&vox) else {
            return;
        };
        let Some(t) = entry.targeting.take() else {
            return;
        };
        if let Some(h) = t.handle {
            hosts.render.destroy_mesh(h);
        }
        if let Some(rec) = entry.sources.get_mut(&t.source) {
            rec.presence = presence::step(rec.presence, PresenceEvent::UnfreezeApply);
        }
        entry.transforms_dirty = true;
        if let Some((patch, offset)) = t.overlay {
            self.apply_local_edit(hosts, vox, t.frame, patch, offset);
        }
    }

    /// Discards the preview overlay and returns the source to the
    /// shared mesh untouched.
    pub fn unfreeze_revert(&mut self, hosts: &mut Hosts<'_>, vox: VoxId) {
        let Some(entry) = self.entries.get_mut(&vox) else {
            return;
        };
        let Some(t) = entry.targeting.take() else {
            return;
        };
        if let Some(h) = t.handle {
            hosts.render.destroy_mesh(h);
        }
        if let Some(rec) = entry.sources.get_mut(&t.source) {
            rec.presence = presence::step(rec.presence, PresenceEvent::UnfreezeRevert);
        }
        entry.transforms_dirty = true;
    }

    /// Physics-engine readiness callback for one body.
    pub fn body_ready(&mut self, physics: &mut dyn PhysicsHost, body: BodyId) {
        self.bridge.body_ready(physics, body);
    }

    /// One main-loop step: ingest finished mesh builds, fire due
    /// timers, schedule builds for dirty frames, upload transforms for
    /// visible entries, and flush due writebacks.
    pub fn tick(&mut self, hosts: &mut Hosts<'_>) {
        self.apply_worker_results(hosts);
        self.process_scheduled(hosts);
        self.schedule_builds_and_uploads(hosts);
        self.flush_writebacks(Instant::now(), hosts.storage);
        self.queue.advance_tick();
    }

    fn apply_worker_results(&mut self, hosts: &mut Hosts<'_>) {
        for r in self.runtime.drain_results() {
            let Some(entry) = self.entries.get_mut(&r.vox_id) else {
                recycle_surface(&mut self.pool, r.surface);
                continue;
            };
            let Some(slot) = entry.frames.get_mut(r.frame) else {
                recycle_surface(&mut self.pool, r.surface);
                continue;
            };
            if slot.building != Some(r.job_id) {
                log::debug!(
                    "{}: discarding stale mesh job {} for frame {}",
                    r.vox_id,
                    r.job_id,
                    r.frame
                );
                recycle_surface(&mut self.pool, r.surface);
                continue;
            }
            slot.building = None;
            match slot.handle {
                Some(h) => hosts.render.update_mesh(h, &r.surface),
                None => slot.handle = Some(hosts.render.create_mesh(r.vox_id, r.frame, &r.surface)),
            }
            recycle_surface(&mut self.pool, r.surface);
            entry.transforms_dirty = true;
            self.out.push(Event::FrameMeshReady {
                vox: r.vox_id,
                frame: r.frame,
            });
            if !entry.ever_built {
                entry.ever_built = true;
                for (src, rec) in entry.sources.iter_mut() {
                    if rec.presence == Presence::Pending {
                        rec.presence = presence::step(rec.presence, PresenceEvent::MeshReady);
                        self.out.push(Event::SourceRegistered {
                            vox: r.vox_id,
                            source: *src,
                            slot: rec.slot,
                        });
                    }
                }
            }
        }
    }

    fn process_scheduled(&mut self, hosts: &mut Hosts<'_>) {
        while let Some(env) = self.queue.pop_ready() {
            match env.kind {
                Event::ShapeRegenDue { vox, seq } => {
                    let Some(entry) = self.entries.get(&vox) else {
                        continue;
                    };
                    if entry.shape_seq != seq {
                        continue;
                    }
                    let Some(grid) = self.models.get(&vox).and_then(|m| m.frame(0)) else {
                        continue;
                    };
                    let kind = classify(entry.quad_size, self.cfg.env_quad_threshold);
                    let bodies: Vec<BodyId> =
                        entry.sources.values().filter_map(|r| r.body).collect();
                    self.bridge
                        .request_swap(hosts.physics, vox, grid, kind, Vec3::ZERO, &bodies);
                }
                other => self.out.push(other),
            }
        }
    }

    fn schedule_builds_and_uploads(&mut self, hosts: &mut Hosts<'_>) {
        let ids: Vec<VoxId> = self.entries.keys().copied().collect();
        for vox in ids {
            let Some(entry) = self.entries.get_mut(&vox) else {
                continue;
            };
            let Some(model) = self.models.get(&vox) else {
                continue;
            };
            entry.sync_frame_count(model.frame_count());

            // Desired quad size from the largest instance scale.
            let mut max_scale = f32::NEG_INFINITY;
            for rec in entry.sources.values() {
                let s = rec.transform.scale();
                max_scale = max_scale.max(s.x.max(s.y).max(s.z));
            }
            if max_scale.is_finite() {
                let desired = self.cfg.quad_size_for_scale(max_scale);
                if desired != entry.quad_size {
                    entry.quad_size = desired;
                    entry.mark_all_dirty();
                    entry.shape_seq += 1;
                    self.queue.emit_after(
                        self.cfg.shape_debounce_ticks,
                        Event::ShapeRegenDue {
                            vox,
                            seq: entry.shape_seq,
                        },
                    );
                    self.out.push(Event::QuadSizeChanged {
                        vox,
                        quad_size: desired,
                    });
                }
            }

            // Kick builds for dirty frames.
            for (f, slot) in entry.frames.iter_mut().enumerate() {
                if !slot.dirty {
                    continue;
                }
                let Some(grid) = model.frame(f) else {
                    continue;
                };
                // Nothing worth building for a frame that is empty and
                // has never had a mesh.
                if slot.handle.is_none() && grid.is_all_empty() {
                    slot.dirty = false;
                    continue;
                }
                let job_id = self.runtime.next_job_id();
                slot.dirty = false;
                slot.building = Some(job_id);
                self.runtime.submit(MeshJob {
                    vox_id: vox,
                    frame: f,
                    rev: model.revision,
                    job_id,
                    grid: Arc::new(grid.clone()),
                    params: MeshParams {
                        max_quad: self.cfg.max_quad,
                        lod: LodFactor::from_quad_size(entry.quad_size),
                    },
                    opts: SurfaceOptions {
                        ao: model.display.ao,
                        ground_quad: false,
                    },
                });
            }

            // An all-empty model leaves nothing to build, so the
            // readiness wait resolves here instead of on a worker
            // result. `ever_built` stays set; content arriving later
            // dirties frames and meshes as usual.
            if !entry.ever_built
                && entry
                    .frames
                    .iter()
                    .all(|s| !s.dirty && s.building.is_none())
            {
                entry.ever_built = true;
                for (src, rec) in entry.sources.iter_mut() {
                    if rec.presence == Presence::Pending {
                        rec.presence = presence::step(rec.presence, PresenceEvent::MeshReady);
                        self.out.push(Event::SourceRegistered {
                            vox,
                            source: *src,
                            slot: rec.slot,
                        });
                    }
                }
            }

            // Transform upload, gated on something having been seen by
            // the culling pass recently.
            let now = self.queue.now;
            let visible = entry
                .sources
                .values()
                .any(|r| now.saturating_sub(r.last_seen) <= self.cfg.visibility_ticks);
            if entry.transforms_dirty && visible {
                let frame = model.current_frame();
                if let Some(handle) = entry.frames.get(frame).and_then(|s| s.handle) {
                    let mut mats = vec![HIDDEN; entry.slots.upload_len()];
                    for rec in entry.sources.values() {
                        if rec.presence == Presence::Active {
                            mats[rec.slot as usize] = rec.transform;
                        }
                    }
                    hosts.render.set_instances(handle, &mats);
                    entry.transforms_dirty = false;
                }
            }
        }
    }

    /// Serializes and hands off every model whose writeback is due.
    pub fn flush_writebacks(&mut self, now: Instant, storage: &mut dyn StorageHost) {
        for vox in self.writeback.due(now) {
            if let Some(model) = self.models.get(&vox) {
                let bytes = codec::encode_model(model);
                storage.write_model(vox, &bytes);
                log::info!("{vox}: wrote back rev {}", model.revision);
            }
        }
    }

    /// Outward notifications accumulated since the last drain.
    pub fn drain_events(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.out)
    }

    #[inline]
    pub fn model(&self, vox: VoxId) -> Option<&Model> {
        self.models.get(&vox)
    }

    #[inline]
    pub fn has_entry(&self, vox: VoxId) -> bool {
        self.entries.contains_key(&vox)
    }

    #[inline]
    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    pub fn quad_size(&self, vox: VoxId) -> Option<u8> {
        self.entries.get(&vox).map(|e| e.quad_size)
    }

    pub fn source_presence(&self, vox: VoxId, source: SourceId) -> Option<Presence> {
        self.entries
            .get(&vox)
            .and_then(|e| e.sources.get(&source))
            .map(|r| r.presence)
    }

    pub fn current_shape(&self, vox: VoxId) -> Option<golem_physics::ShapeId> {
        self.bridge.current_shape(vox)
    }

    #[inline]
    pub fn tick_now(&self) -> u64 {
        self.queue.now
    }
}
