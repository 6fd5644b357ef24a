//! Process lifecycle: wires every subsystem together — global arena,
//! I/O rings, scheduler threads, GC state, in that order — spawns the
//! program's `start` task as task 0, then blocks until every worker has
//! drained. Exit is process exit after worker join.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use crate::alloc::Arena;
use crate::config::RuntimeConfig;
use crate::gc::{Collector, GcState, Roots};
use crate::io_disk::DiskRing;
use crate::io_net::poller::Poller;
use crate::io_net::ops::NetIo;
use crate::scheduler::Scheduler;

/// Everything a running process needs, reachable from any ABI call
/// site via [`global`]. Assembled once by [`init`].
pub struct Runtime {
    pub global_arena: Arc<Arena>,
    pub worker_arenas: Vec<Arc<Arena>>,
    pub scheduler: Arc<Scheduler>,
    pub gc: Arc<GcState>,
    pub roots: Arc<Roots>,
    pub net_io: Arc<NetIo>,
    pub disk_rings: Vec<Arc<DiskRing>>,
    pub config: RuntimeConfig,
}

static RUNTIME: OnceLock<Runtime> = OnceLock::new();
static SIGPIPE_MASKED: AtomicBool = AtomicBool::new(false);

/// The process-wide runtime. Panics if called before [`init`] — every
/// ABI entry point runs only after the process bootstrap has completed.
pub fn global() -> &'static Runtime {
    RUNTIME.get().expect("picasso-rt: runtime accessed before init()")
}

/// Mask `SIGPIPE` process-wide. There is no stable per-thread
/// signal-mask ergonomic equivalent, so this runs once for the whole
/// process instead of per worker thread.
fn mask_sigpipe() {
    if SIGPIPE_MASKED.swap(true, Ordering::SeqCst) {
        return;
    }
    unsafe {
        libc::signal(libc::SIGPIPE, libc::SIG_IGN);
    }
}

/// Bring up every subsystem in dependency order and install it as the
/// global [`Runtime`]. Idempotent-unsafe: calling this twice panics,
/// matching a process having exactly one runtime.
pub fn init(config: RuntimeConfig) {
    mask_sigpipe();
    crate::signal::install_handler();
    log::debug!("picasso-rt: initializing with {config:?}");

    let global_arena = Arc::new(Arena::create());
    let worker_arenas: Vec<Arc<Arena>> = (0..config.worker_count).map(|_| Arc::new(Arena::create())).collect();

    let gc = GcState::new(config.worker_count);
    let roots = Arc::new(Roots::new());
    roots.register_arena(Arc::clone(&global_arena));
    for arena in &worker_arenas {
        roots.register_arena(Arc::clone(arena));
    }

    let scheduler = Scheduler::new(config.worker_count, Arc::clone(&gc));
    for worker in &scheduler.workers {
        roots.register_worker(Arc::clone(worker));
    }

    let poller = Poller::create().unwrap_or_else(|e| crate::error::runtime_error(e));
    let net_io = Arc::new(NetIo::new(Arc::new(poller)));

    let disk_rings: Vec<Arc<DiskRing>> = (0..config.worker_count)
        .map(|_| Arc::new(DiskRing::create(config.disk_queue_depth).unwrap_or_else(|e| crate::error::runtime_error(e))))
        .collect();

    Collector::spawn(Arc::clone(&gc), Arc::clone(&roots), config.gc_period);

    for (id, ring) in disk_rings.iter().enumerate() {
        let ring = Arc::clone(ring);
        let sched = Arc::clone(&scheduler);
        std::thread::Builder::new()
            .name(format!("picasso-diskio-{id}"))
            .spawn(move || ring.run_completion_loop(sched, id))
            .expect("failed to spawn disk completion thread");
    }

    {
        let net_io = Arc::clone(&net_io);
        let sched = Arc::clone(&scheduler);
        std::thread::Builder::new()
            .name("picasso-netio".into())
            .spawn(move || loop {
                net_io.run_once(&sched, -1);
            })
            .expect("failed to spawn netio thread");
    }

    RUNTIME
        .set(Runtime { global_arena, worker_arenas, scheduler, gc, roots, net_io, disk_rings, config })
        .unwrap_or_else(|_| panic!("picasso-rt: init() called more than once"));
}

/// Spawn `start` as task 0 on the scheduler, then block the calling
/// thread (normally the process's real `main`) until every task has
/// finished. Returns once the scheduler's worker pool has fully
/// drained; callers exit the process immediately after.
pub fn run_to_completion(start: impl FnOnce(*const u8) + Send + 'static, arg: *const u8) {
    let rt = global();
    rt.scheduler.spawn(rt.config.task_stack_size, start, arg);
    let handles = rt.scheduler.spawn_worker_threads();
    for h in handles {
        let _ = h.join();
    }
}

/// `fd` of the worker arena assigned to whichever worker this call
/// happens to run on, used by `abi::mem` so program allocations land in
/// a per-worker arena rather than contending on the global one. Falls
/// back to the global arena outside of any worker thread.
pub fn current_worker_arena() -> Arc<Arena> {
    let rt = global();
    match Scheduler::current_worker_id() {
        Some(id) if id < rt.worker_arenas.len() => Arc::clone(&rt.worker_arenas[id]),
        _ => Arc::clone(&rt.global_arena),
    }
}

pub fn disk_ring_for_current_worker() -> Arc<DiskRing> {
    let rt = global();
    match Scheduler::current_worker_id() {
        Some(id) if id < rt.disk_rings.len() => Arc::clone(&rt.disk_rings[id]),
        _ => Arc::clone(&rt.disk_rings[0]),
    }
}

