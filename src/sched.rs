//! Dependency-driven task scheduling.
//!
//! Algorithms submit their tile kernels to a [`Region`], each submission declaring the tiles it
//! reads and writes. Two submissions whose footprints share a tile, at least one of them writing
//! it, run in submission order (read after write, write after read and write after write).
//! Everything else may run concurrently.
//!
//! Submission never blocks. The region is drained when the closure passed to
//! [`Context::region`](crate::Context::region) returns, which is the only point where the
//! submitting thread waits for the tasks.

use crate::{
    desc::TileKey,
    error::Result,
    sequence::{Request, Sequence},
};
use core::cell::{Cell, RefCell};
use core::sync::atomic::{AtomicUsize, Ordering};
use parking_lot::Mutex;
use std::{collections::HashMap, sync::Arc};

/// How a task accesses a tile.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AccessMode {
    Read,
    Write,
    ReadWrite,
}

impl AccessMode {
    #[inline]
    fn writes(self) -> bool {
        !matches!(self, AccessMode::Read)
    }
}

/// One entry of a task footprint.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Access {
    pub key: TileKey,
    pub mode: AccessMode,
}

impl Access {
    #[inline]
    pub fn read(key: TileKey) -> Self {
        Self {
            key,
            mode: AccessMode::Read,
        }
    }

    #[inline]
    pub fn write(key: TileKey) -> Self {
        Self {
            key,
            mode: AccessMode::Write,
        }
    }

    #[inline]
    pub fn read_write(key: TileKey) -> Self {
        Self {
            key,
            mode: AccessMode::ReadWrite,
        }
    }
}

type Task<'scope> = Box<dyn FnOnce() + Send + 'scope>;

struct NodeState<'scope> {
    done: bool,
    successors: Vec<Arc<Node<'scope>>>,
}

struct Node<'scope> {
    name: &'static str,
    // unfinished predecessors, plus one held by the submitter until the node is wired
    pending: AtomicUsize,
    state: Mutex<NodeState<'scope>>,
    task: Mutex<Option<Task<'scope>>>,
}

struct Slot<'scope> {
    last_writer: Option<Arc<Node<'scope>>>,
    readers: Vec<Arc<Node<'scope>>>,
}

impl Default for Slot<'_> {
    fn default() -> Self {
        Self {
            last_writer: None,
            readers: Vec::new(),
        }
    }
}

fn execute<'scope>(scope: &rayon::Scope<'scope>, node: Arc<Node<'scope>>) {
    log::trace!("run {}", node.name);
    let task = node.task.lock().take();
    if let Some(task) = task {
        task();
    }
    let successors = {
        let mut state = node.state.lock();
        state.done = true;
        core::mem::take(&mut state.successors)
    };
    for succ in successors {
        if succ.pending.fetch_sub(1, Ordering::AcqRel) == 1 {
            scope.spawn(move |scope| execute(scope, succ));
        }
    }
}

/// Scheduling region.
///
/// Tasks submitted to a region may borrow anything that outlives `'scope`, in particular the
/// [`Sequence`] and [`Request`] they report to.
pub struct Region<'r, 'scope> {
    scope: Option<&'r rayon::Scope<'scope>>,
    graph: RefCell<HashMap<TileKey, Slot<'scope>>>,
    submitted: Cell<usize>,
}

impl<'r, 'scope> Region<'r, 'scope> {
    pub(crate) fn new(scope: Option<&'r rayon::Scope<'scope>>) -> Self {
        Self {
            scope,
            graph: RefCell::new(HashMap::new()),
            submitted: Cell::new(0),
        }
    }

    /// Returns `true` if tasks are executed inline, in submission order.
    #[inline]
    pub fn is_sequential(&self) -> bool {
        self.scope.is_none()
    }

    /// Number of tasks submitted to the region so far.
    #[inline]
    pub fn submitted(&self) -> usize {
        self.submitted.get()
    }

    /// Submits `body` as a task touching the tiles of `footprint`.
    ///
    /// If `sequence` is already poisoned, nothing is submitted and `request` is marked as
    /// aborted. Otherwise the task runs once every earlier conflicting task has completed. If
    /// the sequence was poisoned in the meantime the body is skipped, and if the body fails the
    /// error is recorded in `sequence` and `request`.
    pub fn submit(
        &self,
        name: &'static str,
        footprint: &[Access],
        sequence: &'scope Sequence,
        request: &'scope Request,
        body: impl FnOnce() -> Result<()> + Send + 'scope,
    ) {
        if sequence.check(request).is_err() {
            log::trace!("refused {name}: sequence aborted");
            return;
        }
        sequence.admit();
        self.submitted.set(self.submitted.get() + 1);
        log::trace!("submit {name} {footprint:?}");

        let task = move || {
            if !sequence.is_ok() {
                return;
            }
            if let Err(err) = body() {
                log::trace!("{name} failed: {err}");
                sequence.fail(request, err);
            }
        };

        let scope = match self.scope {
            Some(scope) => scope,
            None => {
                task();
                return;
            }
        };

        let node = Arc::new(Node {
            name,
            pending: AtomicUsize::new(1),
            state: Mutex::new(NodeState {
                done: false,
                successors: Vec::new(),
            }),
            task: Mutex::new(Some(Box::new(task))),
        });

        let mut deps = Vec::new();
        {
            let mut graph = self.graph.borrow_mut();
            for access in merge_footprint(footprint) {
                let slot = graph.entry(access.key).or_default();
                if access.mode.writes() {
                    deps.append(&mut slot.readers);
                    if let Some(writer) = slot.last_writer.replace(node.clone()) {
                        deps.push(writer);
                    }
                } else {
                    if let Some(writer) = &slot.last_writer {
                        deps.push(writer.clone());
                    }
                    slot.readers.push(node.clone());
                }
            }
        }

        for dep in deps {
            let mut state = dep.state.lock();
            if !state.done {
                node.pending.fetch_add(1, Ordering::AcqRel);
                state.successors.push(node.clone());
            }
        }

        if node.pending.fetch_sub(1, Ordering::AcqRel) == 1 {
            scope.spawn(move |scope| execute(scope, node));
        }
    }
}

// a tile listed several times is accessed with the union of its modes
fn merge_footprint(footprint: &[Access]) -> Vec<Access> {
    let mut merged: Vec<Access> = Vec::with_capacity(footprint.len());
    for access in footprint {
        match merged.iter_mut().find(|a| a.key == access.key) {
            Some(prev) => {
                if prev.mode != access.mode {
                    prev.mode = AccessMode::ReadWrite;
                }
            }
            None => merged.push(*access),
        }
    }
    merged
}
