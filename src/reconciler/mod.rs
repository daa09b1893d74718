//! The reconciler - public entry points and per-session state.
//!
//! One `Reconciler` owns the fiber arena, every root record, the host
//! adapter, and a single reconciliation session. The session holds the
//! stacks and the next-unit pointer for the pass currently in flight;
//! abandoning a pass resets the session and never touches committed
//! fibers. Roots are isolated: they share the arena and the FIFO schedule,
//! nothing else.

mod begin;
mod child;
mod commit;
mod complete;

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use slotmap::SlotMap;
use thiserror::Error;

use crate::context::ContextStack;
use crate::element::{Element, RenderError};
use crate::fiber::{FiberArena, FiberId, FiberRoot, RootId};
use crate::host::{HostConfig, HostContextStack, HostNode};
use crate::queue::{CallbackError, StateUpdate, UpdateCallback, UpdateQueue};
use crate::types::{PropMap, Priority};

// =============================================================================
// Errors
// =============================================================================

/// Why a pass (or its commit) failed.
///
/// A render failure aborts the in-progress pass before commit; the
/// committed tree stays visible. A callback failure happens after the
/// commit already landed and is surfaced once the whole batch has run.
#[derive(Debug, Clone, Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Render(#[from] RenderError),
    #[error(transparent)]
    Callback(#[from] CallbackError),
}

// =============================================================================
// Effects
// =============================================================================

/// One host-level instruction produced by the complete phase, applied in
/// order at commit. Children always precede their parents.
pub(crate) enum Effect<H: HostConfig> {
    /// A new host node finished mounting and may need attaching under an
    /// existing parent.
    Placement(FiberId),
    /// A mounted host instance needs a prop diff applied.
    Update {
        fiber: FiberId,
        old_props: PropMap,
        children: Vec<HostNode<H>>,
    },
    /// A mounted text instance changed content.
    TextUpdate { fiber: FiberId, old_text: String },
    /// A fiber left the tree; its host output must be detached.
    Deletion(FiberId),
    /// A container's (root or portal) child list changed.
    ContainerFlush {
        fiber: FiberId,
        children: Vec<HostNode<H>>,
    },
}

// =============================================================================
// Session
// =============================================================================

/// Mutable state of the pass currently in flight.
pub(crate) struct Session<H: HostConfig> {
    /// The fiber the loop will work on next. `None` between passes.
    pub next_unit_of_work: Option<FiberId>,
    /// The root this pass belongs to.
    pub wip_root: Option<RootId>,
    /// The work-in-progress root fiber, promoted to current at commit.
    pub wip_root_fiber: Option<FiberId>,
    /// Tier this pass runs at.
    pub pass_priority: Priority,
    /// Unmasked context / did-perform-work stacks.
    pub context: ContextStack,
    /// Host container / host context stacks.
    pub host_context: HostContextStack<H>,
    /// Effect instructions, in completion (bottom-up) order.
    pub effects: Vec<Effect<H>>,
    /// Queues merged this pass: cleared, and their callbacks fired, at
    /// commit.
    pub processed_queues: Vec<(FiberId, Rc<RefCell<UpdateQueue>>)>,
    /// Most urgent priority among subtrees skipped this pass, if any.
    /// Re-scheduled on the root after commit.
    pub deprioritized: Option<Priority>,
    /// Fibers allocated by this pass. Released when the pass is
    /// abandoned; a committed pass keeps them.
    pub created: Vec<FiberId>,
}

impl<H: HostConfig> Session<H> {
    pub fn new() -> Self {
        Self {
            next_unit_of_work: None,
            wip_root: None,
            wip_root_fiber: None,
            pass_priority: Priority::Normal,
            context: ContextStack::new(),
            host_context: HostContextStack::new(),
            effects: Vec::new(),
            processed_queues: Vec::new(),
            deprioritized: None,
            created: Vec::new(),
        }
    }

    /// Drop everything belonging to the in-flight pass.
    pub fn reset(&mut self) {
        self.next_unit_of_work = None;
        self.wip_root = None;
        self.wip_root_fiber = None;
        self.pass_priority = Priority::Normal;
        self.context.reset();
        self.host_context.reset();
        self.effects.clear();
        self.processed_queues.clear();
        self.deprioritized = None;
        self.created.clear();
    }
}

// =============================================================================
// Reconciler
// =============================================================================

/// The reconciliation runtime for one host adapter.
pub struct Reconciler<H: HostConfig> {
    pub(crate) host: H,
    pub(crate) arena: FiberArena<H>,
    pub(crate) roots: SlotMap<RootId, FiberRoot<H>>,
    /// Roots with outstanding scheduling callbacks, FIFO.
    pub(crate) schedule: VecDeque<RootId>,
    pub(crate) session: Session<H>,
}

impl<H: HostConfig> Reconciler<H> {
    pub fn new(host: H) -> Self {
        Self {
            host,
            arena: FiberArena::new(),
            roots: SlotMap::with_key(),
            schedule: VecDeque::new(),
            session: Session::new(),
        }
    }

    /// Borrow the host adapter (e.g. to inspect a recording).
    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    /// Register a host container for rendering. Returns the root handle
    /// used by every subsequent update.
    pub fn create_container(&mut self, container: H::Container) -> RootId {
        let root_fiber = self.arena.create_root_fiber(container.clone());
        self.roots.insert(FiberRoot::new(container, root_fiber))
    }

    /// The committed root fiber of `root`.
    pub fn root_fiber(&self, root: RootId) -> FiberId {
        self.roots[root].current
    }

    /// Enqueue a new element tree for `root`, at the tier the adapter
    /// reports for the event being handled (normal when idle).
    pub fn update_container(
        &mut self,
        element: Element<H>,
        root: RootId,
        callback: Option<UpdateCallback>,
    ) -> Result<(), ReconcileError> {
        let priority = self.host.get_current_event_priority();
        self.update_container_at(priority, element, root, callback)
    }

    /// Enqueue a new element tree for `root` at `priority`.
    ///
    /// Sync work is flushed before this returns. A more urgent update than
    /// the in-progress pass abandons that pass at the unit boundary (we
    /// are between units here by construction) and restarts it.
    pub fn update_container_at(
        &mut self,
        priority: Priority,
        element: Element<H>,
        root: RootId,
        callback: Option<UpdateCallback>,
    ) -> Result<(), ReconcileError> {
        {
            let record = &mut self.roots[root];
            record.pending_element = Some(element);
            record.pending_priority =
                Priority::most_urgent(record.pending_priority, Some(priority));
        }
        if let Some(callback) = callback {
            let queue = self
                .arena
                .get(self.roots[root].current)
                .update_queue
                .clone()
                .expect("root fiber always carries a queue");
            queue.borrow_mut().push_callback(callback);
        }

        if self.session.wip_root == Some(root)
            && priority.is_more_urgent_than(self.session.pass_priority)
        {
            self.abandon_pass(true);
        }

        if priority == Priority::Sync {
            self.flush_sync(root)
        } else {
            self.ensure_scheduled(root);
            Ok(())
        }
    }

    /// Enqueue a state transition on a class fiber (the component layer's
    /// `set_state`). `fiber` must belong to `root`'s committed tree.
    pub fn schedule_state_update(
        &mut self,
        root: RootId,
        fiber: FiberId,
        update: StateUpdate,
        is_replace: bool,
        callback: Option<UpdateCallback>,
        priority: Priority,
    ) -> Result<(), ReconcileError> {
        {
            let queue = self
                .arena
                .get(fiber)
                .update_queue
                .clone()
                .expect("state update on a fiber without a queue");
            let mut queue = queue.borrow_mut();
            if is_replace {
                queue.push_replace(update);
            } else {
                queue.push_state(update);
            }
            if let Some(callback) = callback {
                queue.push_callback(callback);
            }
        }
        self.arena.mark_pending_priority(fiber, priority);

        let record = &mut self.roots[root];
        record.pending_priority = Priority::most_urgent(record.pending_priority, Some(priority));

        if self.session.wip_root == Some(root)
            && priority.is_more_urgent_than(self.session.pass_priority)
        {
            self.abandon_pass(true);
        }

        if priority == Priority::Sync {
            self.flush_sync(root)
        } else {
            self.ensure_scheduled(root);
            Ok(())
        }
    }

    /// Find a fiber in `root`'s committed tree by display name.
    /// Depth-first, first match wins.
    pub fn find_by_name(&self, root: RootId, name: &str) -> Option<FiberId> {
        let mut stack = vec![self.roots[root].current];
        while let Some(id) = stack.pop() {
            let fiber = self.arena.get(id);
            if fiber.name() == name {
                return Some(id);
            }
            if let Some(sibling) = fiber.sibling {
                stack.push(sibling);
            }
            if let Some(child) = fiber.child {
                stack.push(child);
            }
        }
        None
    }

    /// Next sibling of `fiber` in its buffer.
    pub fn fiber_sibling(&self, fiber: FiberId) -> Option<FiberId> {
        self.arena.get(fiber).sibling
    }

    /// The unmasked context in effect at `fiber`, read outside a pass.
    /// Component layers use this when running code between renders.
    pub fn unmasked_context_at(&self, fiber: FiberId) -> Rc<PropMap> {
        crate::context::find_current_unmasked_context(&self.arena, fiber)
    }

    /// Tear down `root`: render empty synchronously, then drop the record
    /// and both fiber buffers.
    pub fn unmount(&mut self, root: RootId) -> Result<(), ReconcileError> {
        self.update_container_at(Priority::Sync, Element::fragment(vec![]), root, None)?;
        if let Some(record) = self.roots.remove(root) {
            let alternate = self.arena.get(record.current).alternate;
            self.arena.remove_subtree(record.current);
            if let Some(alt) = alternate {
                if self.arena.contains(alt) {
                    self.arena.remove_subtree(alt);
                }
            }
        }
        Ok(())
    }

    /// Number of live fibers across all roots and the pass in flight.
    pub fn fiber_count(&self) -> usize {
        self.arena.len()
    }

    /// Allocate a fresh fiber for a newly mounted element, on the books
    /// of the pass in flight.
    pub(crate) fn mount_fiber(&mut self, element: &Element<H>) -> FiberId {
        let id = self.arena.create_from_element(element);
        self.session.created.push(id);
        id
    }

    /// Idempotently arrange one pending scheduling callback for `root`.
    pub(crate) fn ensure_scheduled(&mut self, root: RootId) {
        let record = &mut self.roots[root];
        if !record.scheduled {
            record.scheduled = true;
            self.schedule.push_back(root);
        }
    }
}
