//! Host configuration - the contract between the reconciler and a
//! rendering target.
//!
//! The reconciler never mutates a host tree directly. During the complete
//! phase it creates detached instances and records effect instructions;
//! at commit it applies them through this trait. Adapters (a DOM backend,
//! a native-view backend, the [`RecordingHost`] test backend) implement
//! `HostConfig`; the core stays target-agnostic.
//!
//! Host contexts are values consulted while descending into host nodes
//! (e.g. an XML namespace). They must compare equal when unchanged: the
//! reconciler uses equality to decide whether a fiber pushes a new stack
//! frame at all.

mod recording;

pub use recording::{ContainerId, HostCall, HostCx, RecordingHost, TraceInstance, TraceText};

use std::fmt;
use std::time::Duration;

use crate::fiber::FiberId;
use crate::stack::ValueCursor;
use crate::types::{PropMap, Priority};

// =============================================================================
// Host Configuration Contract
// =============================================================================

/// The abstract adapter contract the core calls to mutate a rendering
/// target.
///
/// Mount-time operations (`create_instance`, `append_initial_child`,
/// `finalize_initial_children`) are invoked exactly once per new host node,
/// from the complete phase, on detached instances. Visible mutation
/// (`commit_update`, `update_container`, `commit_deletion`) happens only
/// inside the `prepare_for_commit`/`reset_after_commit` bracket.
pub trait HostConfig: Sized {
    /// Handle to a mounted host node.
    type Instance: Clone + PartialEq + fmt::Debug;
    /// Handle to a mounted host text node.
    type TextInstance: Clone + PartialEq + fmt::Debug;
    /// Handle to a root (or portal) container.
    type Container: Clone + PartialEq + fmt::Debug;
    /// Context value pushed while descending into host nodes. Must compare
    /// equal when unchanged.
    type Context: Clone + PartialEq;

    /// Context in effect at a container's root.
    fn get_root_host_context(&self, container: &Self::Container) -> Self::Context;

    /// Context in effect below a host node of type `ty`. Pure.
    fn get_child_host_context(
        &self,
        parent: &Self::Context,
        ty: &str,
        container: &Self::Container,
    ) -> Self::Context;

    /// Whether a host node of type `ty` handles its text through props,
    /// in which case the reconciler produces no child fibers for it.
    fn should_set_text_content(&self, ty: &str, props: &PropMap) -> bool {
        let _ = (ty, props);
        false
    }

    /// Whether the adapter applies per-node mutations (`append_child`,
    /// `commit_update`, `commit_text_update`, `commit_deletion`). An
    /// adapter that rebuilds from container flushes opts out and only
    /// ever sees `update_container`.
    fn supports_mutation(&self) -> bool {
        true
    }

    /// Tier to run an update at when the caller names none, typically
    /// derived from the event being handled.
    fn get_current_event_priority(&self) -> Priority {
        Priority::Normal
    }

    /// Create a detached instance for a newly mounted host fiber.
    fn create_instance(
        &mut self,
        ty: &str,
        props: &PropMap,
        container: &Self::Container,
        context: &Self::Context,
    ) -> Self::Instance;

    /// Create a detached text instance.
    fn create_text_instance(
        &mut self,
        text: &str,
        container: &Self::Container,
        context: &Self::Context,
    ) -> Self::TextInstance;

    /// Attach a child to a still-detached parent during initial mount.
    fn append_initial_child(&mut self, parent: &Self::Instance, child: &HostNode<Self>);

    /// Finish initial mount of an instance. Returns whether the instance
    /// needs commit-time attention (e.g. focus).
    fn finalize_initial_children(
        &mut self,
        instance: &Self::Instance,
        ty: &str,
        props: &PropMap,
    ) -> bool;

    /// Attach a newly created node under an already-mounted parent.
    /// Called at commit for placements below a reused host node.
    fn append_child(&mut self, parent: &Self::Instance, child: &HostNode<Self>);

    /// Commit bracket start. No visible mutation before this.
    fn prepare_for_commit(&mut self);

    /// Commit bracket end.
    fn reset_after_commit(&mut self);

    /// Apply a finalized prop diff to a mounted instance.
    fn commit_update(
        &mut self,
        instance: &Self::Instance,
        ty: &str,
        old_props: &PropMap,
        new_props: &PropMap,
        children: &[HostNode<Self>],
    );

    /// Apply a text change to a mounted text instance.
    fn commit_text_update(&mut self, instance: &Self::TextInstance, old_text: &str, new_text: &str);

    /// Detach a deleted node from the host tree.
    fn commit_deletion(&mut self, node: &HostNode<Self>);

    /// Replace a container's children with the finalized output list.
    fn update_container(&mut self, container: &Self::Container, children: &[HostNode<Self>]);

    /// Monotonic clock for scheduling heuristics. Never used for
    /// correctness.
    fn now(&self) -> Duration;
}

// =============================================================================
// Host Output Nodes
// =============================================================================

/// A single finalized host node, as produced by the complete phase.
pub enum HostNode<H: HostConfig> {
    Instance(H::Instance),
    Text(H::TextInstance),
}

impl<H: HostConfig> Clone for HostNode<H> {
    fn clone(&self) -> Self {
        match self {
            HostNode::Instance(i) => HostNode::Instance(i.clone()),
            HostNode::Text(t) => HostNode::Text(t.clone()),
        }
    }
}

impl<H: HostConfig> PartialEq for HostNode<H> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (HostNode::Instance(a), HostNode::Instance(b)) => a == b,
            (HostNode::Text(a), HostNode::Text(b)) => a == b,
            _ => false,
        }
    }
}

impl<H: HostConfig> fmt::Debug for HostNode<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostNode::Instance(i) => f.debug_tuple("Instance").field(i).finish(),
            HostNode::Text(t) => f.debug_tuple("Text").field(t).finish(),
        }
    }
}

// =============================================================================
// Host Context Stacks
// =============================================================================

/// Session-owned stacks tracking the current host container and host
/// context during the walk.
///
/// All three cursors move together: containers push a frame on every
/// cursor, host components push a context frame only when their child
/// context actually differs from the parent's (the provider cursor records
/// which fiber owns the frame, so pops from non-providers are no-ops).
pub struct HostContextStack<H: HostConfig> {
    container: ValueCursor<Option<H::Container>>,
    context: ValueCursor<Option<H::Context>>,
    provider: ValueCursor<Option<FiberId>>,
}

impl<H: HostConfig> HostContextStack<H> {
    /// Fresh stacks at the sentinel "no context" value.
    pub fn new() -> Self {
        Self {
            container: ValueCursor::new(None),
            context: ValueCursor::new(None),
            provider: ValueCursor::new(None),
        }
    }

    /// The container currently being rendered into.
    ///
    /// Panics at the sentinel: reading outside a container scope means the
    /// push/pop discipline is broken.
    pub fn root_host_container(&self) -> &H::Container {
        self.container
            .current()
            .as_ref()
            .expect("host container read at sentinel: no container pushed")
    }

    /// The host context in effect for the next host node.
    pub fn host_context(&self) -> &H::Context {
        self.context
            .current()
            .as_ref()
            .expect("host context read at sentinel: no container pushed")
    }

    /// Enter a container scope (root or portal).
    pub fn push_host_container(
        &mut self,
        fiber: FiberId,
        container: H::Container,
        root_context: H::Context,
    ) {
        self.container.push(Some(container), fiber);
        self.context.push(Some(root_context), fiber);
        self.provider.push(None, fiber);
    }

    /// Leave a container scope.
    pub fn pop_host_container(&mut self, fiber: FiberId) {
        self.provider.pop(fiber);
        self.context.pop(fiber);
        self.container.pop(fiber);
    }

    /// Push `child_context` for `fiber` if it differs from the current
    /// context. Returns whether a frame was pushed; only then does the
    /// fiber count as the unique provider that must pop on exit.
    pub fn push_host_context(&mut self, fiber: FiberId, child_context: H::Context) -> bool {
        if self
            .context
            .current()
            .as_ref()
            .is_some_and(|current| *current == child_context)
        {
            return false;
        }
        self.context.push(Some(child_context), fiber);
        self.provider.push(Some(fiber), fiber);
        true
    }

    /// Pop `fiber`'s context frame. No-op unless `fiber` is the recorded
    /// provider at the top of the stack - prevents mismatched pops when a
    /// fiber didn't push.
    pub fn pop_host_context(&mut self, fiber: FiberId) {
        if *self.provider.current() != Some(fiber) {
            return;
        }
        self.provider.pop(fiber);
        self.context.pop(fiber);
    }

    /// Clear both stacks back to the sentinel. Used when a pass is
    /// abandoned.
    pub fn reset(&mut self) {
        self.container.reset(None);
        self.context.reset(None);
        self.provider.reset(None);
    }
}

impl<H: HostConfig> Default for HostContextStack<H> {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Tests
// =============================================================================
