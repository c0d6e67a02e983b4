//! # Semaphore Wait-Table Snapshot
//!
//! The wait table is a fixed array of treap roots. Each treap node is a waiter
//! record whose `prev`/`next` fields are the left/right children (ordered by
//! wait address) and whose `waitlink` chains further waiters on the same
//! address.
//!
//! The sandbox forbids recursion, so the in-order walk keeps its pending nodes
//! on an explicit [`TreapStack`] with a fixed capacity. Every event of one walk
//! carries the same version number; the final event is a terminator with the
//! flag set. A walk that runs out of stack or visit budget emits no
//! terminator, and the reader drops the partial version.

use core::ops::ControlFlow;
use core::sync::atomic::{AtomicU64, Ordering};

use crate::bounded::BoundedLoop;
use crate::channel::{Emitter, EventSink};
use crate::error::ProbeError;
use crate::event::{SemaWaiter, SemaWaiterEvent, EVENT_SEMA_WAITER};
use crate::memory::MemoryReader;
use crate::target::Target;

/// Roots in the table (`semTabSize`)
pub const SEMTABLE_SIZE: u32 = 251;

/// Capacity of the auxiliary stack, i.e. the deepest left spine the walk follows
pub const SEMA_TREAP_MAX_HEIGHT: usize = 20;

/// Nodes visited per root
pub const SEMA_TREAP_MAX_NODES: u32 = 64;

/// Waiters followed along one wait-link chain
pub const SEMA_WAITLINK_MAX_LEN: u32 = 16;

/// Explicit stack for the iterative in-order walk
///
/// Lives in a per-context map slot inside the sandbox (it is too large for
/// the probe's stack frame).
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TreapStack {
    pub nodes: [u64; SEMA_TREAP_MAX_HEIGHT],
    pub len: u64,
}

impl Default for TreapStack {
    fn default() -> Self {
        Self::zeroed()
    }
}

impl TreapStack {
    #[must_use]
    pub const fn zeroed() -> Self {
        Self { nodes: [0; SEMA_TREAP_MAX_HEIGHT], len: 0 }
    }

    pub fn clear(&mut self) {
        self.len = 0;
    }

    /// # Errors
    /// [`ProbeError::BoundExceeded`] when the stack is full.
    pub fn push(&mut self, node: u64) -> Result<(), ProbeError> {
        let slot = self.nodes.get_mut(self.len as usize).ok_or(ProbeError::BoundExceeded)?;
        *slot = node;
        self.len += 1;
        Ok(())
    }

    pub fn pop(&mut self) -> Option<u64> {
        let top = self.len.checked_sub(1)?;
        let node = *self.nodes.get(top as usize)?;
        self.len = top;
        Some(node)
    }
}

/// Stamp a new snapshot version
///
/// Versions start at 1; the counter is only ever incremented.
pub fn next_snapshot_version(counter: &AtomicU64) -> u64 {
    counter.fetch_add(1, Ordering::AcqRel) + 1
}

/// In-order walk of the treap rooted at `root`, calling `visit` on each node
///
/// Returns the number of nodes visited.
///
/// # Errors
/// [`ProbeError::BoundExceeded`] when the left spine is deeper than the stack
/// or the treap holds more than [`SEMA_TREAP_MAX_NODES`] nodes (a torn cycle
/// looks the same).
pub fn walk_treap<R: MemoryReader, L: BoundedLoop, F: FnMut(u64)>(
    target: &Target<'_, R>,
    loops: &L,
    root: u64,
    stack: &mut TreapStack,
    mut visit: F,
) -> Result<u32, ProbeError> {
    let off = target.offsets;
    stack.clear();
    let mut node = root;
    let mut visited = 0;
    let mut result = Err(ProbeError::BoundExceeded);

    loops.run(SEMA_TREAP_MAX_NODES + 1, |_| {
        for _ in 0..=SEMA_TREAP_MAX_HEIGHT {
            if node == 0 {
                break;
            }
            if let Err(err) = stack.push(node) {
                result = Err(err);
                return ControlFlow::Break(());
            }
            node = target.reader.read_ptr(node + off.waiter_left);
        }

        let Some(top) = stack.pop() else {
            result = Ok(visited);
            return ControlFlow::Break(());
        };
        if visited == SEMA_TREAP_MAX_NODES {
            return ControlFlow::Break(());
        }
        visit(top);
        visited += 1;
        node = target.reader.read_ptr(top + off.waiter_right);
        ControlFlow::Continue(())
    });

    result
}

/// Emit `node` and the waiters chained behind it on the same address
fn emit_wait_chain<R: MemoryReader, S: EventSink>(
    target: &Target<'_, R>,
    node: u64,
    version: u64,
    out: &mut Emitter<'_, S>,
) {
    let off = target.offsets;
    let mut waiter = node;
    for _ in 0..SEMA_WAITLINK_MAX_LEN {
        if waiter == 0 {
            break;
        }
        let task = target.reader.read_ptr(waiter + off.waiter_task);
        out.emit(&SemaWaiterEvent {
            etype: EVENT_SEMA_WAITER,
            version,
            waiter: SemaWaiter {
                task_id: target.task_id(task),
                addr: target.reader.read_u64(waiter + off.waiter_addr).unwrap_or(0),
            },
            is_terminator: 0,
        });
        waiter = target.reader.read_ptr(waiter + off.waiter_wait_link);
    }
}

/// Walk every root of the wait table under a fresh version
///
/// Returns the version used.
///
/// # Errors
/// [`ProbeError::BoundExceeded`] from [`walk_treap`]; the terminator is then
/// never emitted.
pub fn snapshot_semtable<R: MemoryReader, L: BoundedLoop, S: EventSink>(
    target: &Target<'_, R>,
    loops: &L,
    version_counter: &AtomicU64,
    stack: &mut TreapStack,
    out: &mut Emitter<'_, S>,
) -> Result<u64, ProbeError> {
    let off = target.offsets;
    let version = next_snapshot_version(version_counter);
    let mut result = Ok(());

    loops.run(SEMTABLE_SIZE, |root_idx| {
        let slot = off.semtable_addr + u64::from(root_idx) * off.sema_root_stride;
        let root = target.reader.read_ptr(slot + off.sema_root_treap);
        if root == 0 {
            return ControlFlow::Continue(());
        }
        match walk_treap(target, loops, root, stack, |node| {
            emit_wait_chain(target, node, version, out);
        }) {
            Ok(_) => ControlFlow::Continue(()),
            Err(err) => {
                result = Err(err);
                ControlFlow::Break(())
            }
        }
    });
    result?;

    out.emit(&SemaWaiterEvent {
        etype: EVENT_SEMA_WAITER,
        version,
        waiter: SemaWaiter::default(),
        is_terminator: 1,
    });
    Ok(version)
}
