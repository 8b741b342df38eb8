//! Worker pool for CPU-heavy color-aware meshing off the main thread.
//!
//! Jobs carry a monotonically increasing `job_id`; the main thread keeps
//! the id of the newest job it submitted per (vox, frame) and discards
//! any result that comes back with an older one, since a newer edit may
//! start a new build for the same frame before the old one returns.
#![forbid(unsafe_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Instant;

use crossbeam_channel::{Receiver, Sender, unbounded};
use golem_grid::{VoxId, VoxelGrid};
use golem_mesh::{MeshParams, QuadList, mesh_colored_into};
use golem_surface::{BufferPool, SurfaceData, SurfaceOptions, build_surface};
use rayon::{ThreadPool, ThreadPoolBuilder};

#[derive(Clone)]
pub struct MeshJob {
    pub vox_id: VoxId,
    pub frame: usize,
    pub rev: u64,
    pub job_id: u64,
    /// Snapshot of the frame grid (possibly with a preview overlaid).
    pub grid: Arc<VoxelGrid>,
    pub params: MeshParams,
    pub opts: SurfaceOptions,
}

pub struct MeshJobOut {
    pub vox_id: VoxId,
    pub frame: usize,
    pub rev: u64,
    pub job_id: u64,
    pub surface: SurfaceData,
    pub t_mesh_ms: u32,
}

pub struct Runtime {
    job_tx: Sender<MeshJob>,
    res_rx: Receiver<MeshJobOut>,
    _pool: Arc<ThreadPool>,
    queued: Arc<AtomicUsize>,
    inflight: Arc<AtomicUsize>,
    next_job_id: AtomicU64,
    pub workers: usize,
}

impl Runtime {
    pub fn new() -> Self {
        let workers = std::thread::available_parallelism()
            .map(|n| (n.get() / 2).max(1))
            .unwrap_or(1);
        Self::with_workers(workers)
    }

    pub fn with_workers(workers: usize) -> Self {
        let workers = workers.max(1);
        let (job_tx, job_rx) = unbounded::<MeshJob>();
        let (res_tx, res_rx) = unbounded::<MeshJobOut>();
        let queued = Arc::new(AtomicUsize::new(0));
        let inflight = Arc::new(AtomicUsize::new(0));

        let pool = Arc::new(
            ThreadPoolBuilder::new()
                .num_threads(workers)
                .thread_name(|i| format!("golem-mesh-{i}"))
                .build()
                .expect("mesh worker pool"),
        );
        for _ in 0..workers {
            let rx = job_rx.clone();
            let tx = res_tx.clone();
            let queued = queued.clone();
            let inflight = inflight.clone();
            pool.spawn(move || {
                // Per-worker scratch: the quad list and buffer pool live
                // for the thread's lifetime, so steady-state rebuilds do
                // not allocate.
                let mut quads = QuadList::new();
                let mut pool = BufferPool::new();
                while let Ok(job) = rx.recv() {
                    queued.fetch_sub(1, Ordering::Relaxed);
                    inflight.fetch_add(1, Ordering::Relaxed);
                    process_mesh_job(job, &mut quads, &mut pool, &tx);
                    inflight.fetch_sub(1, Ordering::Relaxed);
                }
            });
        }

        Self {
            job_tx,
            res_rx,
            _pool: pool,
            queued,
            inflight,
            next_job_id: AtomicU64::new(1),
            workers,
        }
    }

    /// Allocates the next job id; strictly increasing per runtime.
    pub fn next_job_id(&self) -> u64 {
        self.next_job_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn submit(&self, job: MeshJob) {
        self.queued.fetch_add(1, Ordering::Relaxed);
        if self.job_tx.send(job).is_err() {
            self.queued.fetch_sub(1, Ordering::Relaxed);
        }
    }

    /// Drains every finished result without blocking.
    pub fn drain_results(&self) -> Vec<MeshJobOut> {
        self.res_rx.try_iter().collect()
    }

    pub fn queue_debug_counts(&self) -> (usize, usize) {
        (
            self.queued.load(Ordering::Relaxed),
            self.inflight.load(Ordering::Relaxed),
        )
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

fn process_mesh_job(
    job: MeshJob,
    quads: &mut QuadList,
    pool: &mut BufferPool,
    tx: &Sender<MeshJobOut>,
) {
    let t0 = Instant::now();
    mesh_colored_into(&job.grid, &job.params, quads);
    let surface = build_surface(&job.grid, quads, &job.opts, pool);
    let t_mesh_ms = t0.elapsed().as_millis().min(u128::from(u32::MAX)) as u32;
    log::debug!(
        target: "perf",
        "ms={} mesh_job vox={} frame={} rev={} quads={}",
        t_mesh_ms, job.vox_id, job.frame, job.rev, quads.len()
    );
    let _ = tx.send(MeshJobOut {
        vox_id: job.vox_id,
        frame: job.frame,
        rev: job.rev,
        job_id: job.job_id,
        surface,
        t_mesh_ms,
    });
}
