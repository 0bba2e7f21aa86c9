//! Collective substrate for SPMD worker groups.
//!
//! Every worker runs the same program on its own partition and meets its
//! peers only at collectives: [`Communicator::barrier`],
//! [`Communicator::all_gather`] and [`Communicator::share`]. All workers must
//! issue the same sequence of collective calls; a worker that skips one
//! leaves its peers waiting forever.
//!
//! Two backends are provided: [`NoComm`] for a single serial worker and
//! [`ThreadComm`] for `N` in-process workers started by [`WorkerGroup::run`].

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::{Condvar, Mutex};

use crate::grid_error::GridError;

type SharedObject = Arc<dyn Any + Send + Sync>;

/// Collective communication interface.
pub trait Communicator: Send + Sync {
    /// Index of this worker in `0..size()`.
    fn rank(&self) -> usize;
    /// Number of workers in the group.
    fn size(&self) -> usize;
    /// Block until every worker has reached the same barrier.
    fn barrier(&self) -> Result<(), GridError>;
    /// Exchange one byte buffer per worker; the result is in rank order.
    fn all_gather(&self, buf: &[u8]) -> Result<Vec<Bytes>, GridError>;
    /// Collectively create one object shared by all workers.
    ///
    /// Only one worker's `make` runs; every worker gets a handle to the same
    /// allocation. Returns once all workers hold it.
    fn share<T, F>(&self, make: F) -> Result<Arc<T>, GridError>
    where
        T: Send + Sync + 'static,
        F: FnOnce() -> T;

    fn is_root(&self) -> bool {
        self.rank() == 0
    }
}

/// Serial communicator: a group of exactly one worker.
#[derive(Clone, Debug, Default)]
pub struct NoComm;

impl Communicator for NoComm {
    fn rank(&self) -> usize {
        0
    }
    fn size(&self) -> usize {
        1
    }
    fn barrier(&self) -> Result<(), GridError> {
        Ok(())
    }
    fn all_gather(&self, buf: &[u8]) -> Result<Vec<Bytes>, GridError> {
        Ok(vec![Bytes::copy_from_slice(buf)])
    }
    fn share<T, F>(&self, make: F) -> Result<Arc<T>, GridError>
    where
        T: Send + Sync + 'static,
        F: FnOnce() -> T,
    {
        Ok(Arc::new(make()))
    }
}

#[derive(Debug, Default)]
struct BarrierState {
    arrived: usize,
    generation: u64,
    poisoned: bool,
}

/// Reusable barrier that can be poisoned when a worker dies.
struct GroupBarrier {
    size: usize,
    state: Mutex<BarrierState>,
    cvar: Condvar,
}

impl GroupBarrier {
    fn new(size: usize) -> Self {
        Self {
            size,
            state: Mutex::new(BarrierState::default()),
            cvar: Condvar::new(),
        }
    }

    fn wait(&self) -> Result<(), GridError> {
        let mut st = self.state.lock();
        if st.poisoned {
            return Err(Self::poisoned_error());
        }
        let generation = st.generation;
        st.arrived += 1;
        if st.arrived == self.size {
            st.arrived = 0;
            st.generation = generation.wrapping_add(1);
            self.cvar.notify_all();
            return Ok(());
        }
        while st.generation == generation && !st.poisoned {
            self.cvar.wait(&mut st);
        }
        if st.generation == generation {
            Err(Self::poisoned_error())
        } else {
            Ok(())
        }
    }

    fn poison(&self) {
        let mut st = self.state.lock();
        st.poisoned = true;
        self.cvar.notify_all();
    }

    fn poisoned_error() -> GridError {
        GridError::WorkerPool("a peer worker left the group before this collective".into())
    }
}

struct GroupShared {
    barrier: GroupBarrier,
    gather: Mutex<Vec<Bytes>>,
    objects: DashMap<u64, SharedObject>,
}

impl GroupShared {
    fn new(size: usize) -> Self {
        Self {
            barrier: GroupBarrier::new(size),
            gather: Mutex::new(vec![Bytes::new(); size]),
            objects: DashMap::new(),
        }
    }
}

/// One worker's handle on an in-process worker group.
pub struct ThreadComm {
    rank: usize,
    shared: Arc<GroupShared>,
    next_object: AtomicU64,
}

impl fmt::Debug for ThreadComm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadComm")
            .field("rank", &self.rank)
            .field("size", &self.shared.barrier.size)
            .finish()
    }
}

impl Communicator for ThreadComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.shared.barrier.size
    }

    fn barrier(&self) -> Result<(), GridError> {
        self.shared.barrier.wait()
    }

    fn all_gather(&self, buf: &[u8]) -> Result<Vec<Bytes>, GridError> {
        self.shared.gather.lock()[self.rank] = Bytes::copy_from_slice(buf);
        self.shared.barrier.wait()?;
        let out = self.shared.gather.lock().clone();
        // slots may be overwritten by the next gather only after everyone read
        self.shared.barrier.wait()?;
        Ok(out)
    }

    fn share<T, F>(&self, make: F) -> Result<Arc<T>, GridError>
    where
        T: Send + Sync + 'static,
        F: FnOnce() -> T,
    {
        let key = self.next_object.fetch_add(1, Ordering::Relaxed);
        let object = self
            .shared
            .objects
            .entry(key)
            .or_insert_with(|| Arc::new(make()) as SharedObject)
            .value()
            .clone();
        self.shared.barrier.wait()?;
        if self.is_root() {
            self.shared.objects.remove(&key);
        }
        object.downcast::<T>().map_err(|_| {
            GridError::CollectiveMismatch(format!(
                "shared object #{key} was created with a different type on another worker"
            ))
        })
    }
}

/// Launcher for a fixed-size group of in-process SPMD workers.
#[derive(Debug, Clone, Copy, Default)]
pub struct WorkerGroup;

impl WorkerGroup {
    /// Run `f` once on each of `size` workers, each on its own thread, and
    /// return the results in rank order.
    ///
    /// A worker that leaves `f`, by returning or by panicking, poisons the
    /// group barrier: peers still inside a collective, or entering one
    /// later, get an error instead of waiting for it. The first panic is
    /// resumed on the calling thread.
    pub fn run<R, F>(size: usize, f: F) -> Result<Vec<R>, GridError>
    where
        R: Send,
        F: Fn(&ThreadComm) -> R + Sync,
    {
        if size == 0 {
            return Err(GridError::WorkerPool(
                "a worker group needs at least one worker".into(),
            ));
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(size)
            .thread_name(|i| format!("basin-worker-{i}"))
            .build()
            .map_err(|e| GridError::WorkerPool(e.to_string()))?;
        let shared = Arc::new(GroupShared::new(size));

        let outcomes = pool.broadcast(|ctx| {
            let comm = ThreadComm {
                rank: ctx.index(),
                shared: Arc::clone(&shared),
                next_object: AtomicU64::new(0),
            };
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| f(&comm)));
            // a departed worker can never complete another barrier
            shared.barrier.poison();
            outcome
        });

        let mut results = Vec::with_capacity(size);
        for outcome in outcomes {
            match outcome {
                Ok(r) => results.push(r),
                Err(payload) => panic::resume_unwind(payload),
            }
        }
        Ok(results)
    }
}
