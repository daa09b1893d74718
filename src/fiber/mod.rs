//! Fiber tree structures - the dual-buffered unit-of-work representation.
//!
//! Fibers live in a slotmap arena; `child`/`sibling`/`ret` first-child/
//! next-sibling/parent keys form the tree without arbitrary-arity child
//! arrays, so the walk moves between nodes with O(1) pointer chasing and
//! no native recursion. At most two fibers exist per logical tree
//! position: the committed "current" fiber and its "work-in-progress"
//! counterpart, linked through `alternate` (a back-link key, never an
//! owning reference). Work-in-progress mutations stay invisible through
//! the current tree until commit swaps the root pointer.

mod root;

pub use root::{FiberRoot, RootId};

use std::cell::RefCell;
use std::rc::Rc;

use slotmap::{new_key_type, SlotMap};

use crate::element::{Element, ElementKind};
use crate::host::{HostConfig, HostNode};
use crate::queue::UpdateQueue;
use crate::types::{EffectFlags, PropMap, Priority, StateMap, WorkTag};

new_key_type! {
    /// Arena key of a fiber.
    pub struct FiberId;
}

// =============================================================================
// State Node
// =============================================================================

/// The imperative thing a fiber represents, exclusively owned by the
/// logical position while mounted. Class instances are shared between the
/// two alternates of a position (they are the same logical component).
pub enum StateNode<H: HostConfig> {
    None,
    /// Host root or portal: the container being rendered into.
    Container(H::Container),
    /// A mounted host instance.
    Instance(H::Instance),
    /// A mounted host text instance.
    Text(H::TextInstance),
    /// A class component instance.
    Class(Rc<RefCell<ClassInstance>>),
}

impl<H: HostConfig> Clone for StateNode<H> {
    fn clone(&self) -> Self {
        match self {
            StateNode::None => StateNode::None,
            StateNode::Container(c) => StateNode::Container(c.clone()),
            StateNode::Instance(i) => StateNode::Instance(i.clone()),
            StateNode::Text(t) => StateNode::Text(t.clone()),
            StateNode::Class(instance) => StateNode::Class(instance.clone()),
        }
    }
}

/// Mutable state of a mounted class component.
pub struct ClassInstance {
    pub state: StateMap,
    pub props: PropMap,
    /// Masked context seen at the last render.
    pub context: PropMap,
    /// Memoized merged child context, reused by identity while the fiber
    /// performs no work.
    pub memoized_merged_context: Option<Rc<PropMap>>,
}

impl ClassInstance {
    pub fn new(initial_state: StateMap, props: PropMap) -> Self {
        Self {
            state: initial_state,
            props,
            context: PropMap::new(),
            memoized_merged_context: None,
        }
    }
}

// =============================================================================
// Fiber
// =============================================================================

/// One unit of work, mirroring one position in the UI tree.
pub struct Fiber<H: HostConfig> {
    /// What kind of node this is. Fixed for the fiber's lifetime, except
    /// the coroutine-to-handler-phase transition.
    pub tag: WorkTag,
    /// The element's type descriptor. `None` only on host roots.
    pub kind: Option<ElementKind<H>>,
    /// Stable identity for list reconciliation.
    pub key: Option<String>,

    /// Incoming props, set when work is scheduled.
    pub pending_props: PropMap,
    /// Props from the last completed render.
    pub memoized_props: PropMap,
    /// State from the last completed render (class fibers).
    pub memoized_state: StateMap,
    /// Child elements waiting to be reconciled when this fiber begins.
    /// `None` when the fiber was cloned without a fresh element; the
    /// committed children stand in that case.
    pub pending_children: Option<Vec<Element<H>>>,
    /// Incoming root element. Host roots only.
    pub pending_element: Option<Element<H>>,

    /// The imperative instance behind this fiber.
    pub state_node: StateNode<H>,
    /// Pending state transitions. Shared between alternates: updates
    /// target the logical position, not one buffer.
    pub update_queue: Option<Rc<RefCell<UpdateQueue>>>,

    /// First child in this buffer.
    pub child: Option<FiberId>,
    /// Next sibling in this buffer.
    pub sibling: Option<FiberId>,
    /// Parent in this buffer.
    pub ret: Option<FiberId>,
    /// The counterpart fiber in the other buffer.
    pub alternate: Option<FiberId>,

    /// Host mutations this node requires after diffing.
    pub effects: EffectFlags,
    /// Children deleted while reconciling this fiber's child list.
    pub deletions: Vec<FiberId>,
    /// Most urgent pending work in this fiber's subtree, if any.
    pub pending_priority: Option<Priority>,
    /// This subtree was skipped this pass; its previously computed output
    /// is reused verbatim.
    pub was_deprioritized: bool,

    /// Finalized host output, computed by the complete phase.
    pub output: Vec<HostNode<H>>,
    /// Host nodes last flushed into this fiber's container. Roots and
    /// portals only; used to skip redundant container flushes.
    pub container_output: Vec<HostNode<H>>,
    /// This fiber pushed a context-provider frame this pass.
    pub did_provide_context: bool,
    /// This fiber pushed a host container frame this pass.
    pub did_push_container: bool,
}

impl<H: HostConfig> Fiber<H> {
    fn bare(tag: WorkTag) -> Self {
        Self {
            tag,
            kind: None,
            key: None,
            pending_props: PropMap::new(),
            memoized_props: PropMap::new(),
            memoized_state: StateMap::new(),
            pending_children: None,
            pending_element: None,
            state_node: StateNode::None,
            update_queue: None,
            child: None,
            sibling: None,
            ret: None,
            alternate: None,
            effects: EffectFlags::empty(),
            deletions: Vec::new(),
            pending_priority: None,
            was_deprioritized: false,
            output: Vec::new(),
            container_output: Vec::new(),
            did_provide_context: false,
            did_push_container: false,
        }
    }

    /// The shared class instance, if this is a class fiber.
    pub fn class_instance(&self) -> Option<&Rc<RefCell<ClassInstance>>> {
        match &self.state_node {
            StateNode::Class(instance) => Some(instance),
            _ => None,
        }
    }

    /// Display name for diagnostics.
    pub fn name(&self) -> &str {
        match (&self.kind, self.tag) {
            (Some(kind), _) => kind.name(),
            (None, WorkTag::HostRoot) => "#root",
            (None, _) => "#unknown",
        }
    }
}

/// Map an element kind to the fiber tag it mounts as.
pub fn tag_for_kind<H: HostConfig>(kind: &ElementKind<H>) -> WorkTag {
    match kind {
        ElementKind::Host(_) => WorkTag::HostComponent,
        ElementKind::Text => WorkTag::HostText,
        ElementKind::Class(_) => WorkTag::ClassComponent,
        ElementKind::Function(_) => WorkTag::FunctionComponent,
        ElementKind::Fragment => WorkTag::Fragment,
        ElementKind::Portal(_) => WorkTag::Portal,
        ElementKind::Coroutine(_) => WorkTag::Coroutine,
        ElementKind::Yield(_) => WorkTag::YieldComponent,
    }
}

// =============================================================================
// Arena
// =============================================================================

/// Slotmap arena owning every fiber of every tree managed by one
/// reconciler. Slot reuse comes from the slotmap free list; `alternate`
/// slots persist across passes and are recycled per logical position.
pub struct FiberArena<H: HostConfig> {
    fibers: SlotMap<FiberId, Fiber<H>>,
}

impl<H: HostConfig> FiberArena<H> {
    pub fn new() -> Self {
        Self {
            fibers: SlotMap::with_key(),
        }
    }

    pub fn get(&self, id: FiberId) -> &Fiber<H> {
        self.fibers.get(id).expect("fiber id out of arena")
    }

    pub fn get_mut(&mut self, id: FiberId) -> &mut Fiber<H> {
        self.fibers.get_mut(id).expect("fiber id out of arena")
    }

    pub fn try_get(&self, id: FiberId) -> Option<&Fiber<H>> {
        self.fibers.get(id)
    }

    pub fn try_get_mut(&mut self, id: FiberId) -> Option<&mut Fiber<H>> {
        self.fibers.get_mut(id)
    }

    pub fn contains(&self, id: FiberId) -> bool {
        self.fibers.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.fibers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fibers.is_empty()
    }

    /// Create the root fiber for a new container.
    pub fn create_root_fiber(&mut self, container: H::Container) -> FiberId {
        let mut fiber = Fiber::bare(WorkTag::HostRoot);
        fiber.state_node = StateNode::Container(container);
        fiber.update_queue = Some(Rc::new(RefCell::new(UpdateQueue::new(None))));
        self.fibers.insert(fiber)
    }

    /// Create a fresh fiber from an element. New fibers carry the
    /// placement effect; attaching happens at commit.
    pub fn create_from_element(&mut self, element: &Element<H>) -> FiberId {
        let tag = tag_for_kind(&element.kind);
        let mut fiber = Fiber::bare(tag);
        fiber.key = element.key.clone();
        fiber.pending_props = element.props.clone();
        fiber.pending_children = Some(element.children.clone());
        fiber.effects = EffectFlags::PLACEMENT;

        if let ElementKind::Class(def) = &element.kind {
            fiber.state_node = StateNode::Class(Rc::new(RefCell::new(ClassInstance::new(
                def.initial_state.clone(),
                element.props.clone(),
            ))));
            fiber.update_queue = Some(Rc::new(RefCell::new(UpdateQueue::new(None))));
        }
        if let ElementKind::Portal(container) = &element.kind {
            fiber.state_node = StateNode::Container(container.clone());
        }
        fiber.kind = Some(element.kind.clone());

        self.fibers.insert(fiber)
    }

    /// Create (or recycle) the work-in-progress counterpart of `current`.
    ///
    /// The existing alternate slot is reused when present, keeping the
    /// exactly-two-fibers-per-position invariant. Incoming element data
    /// (if any) replaces pending props/children; effect flags and tree
    /// pointers are reset. `ret`/`sibling` are linked by the caller.
    pub fn create_work_in_progress(
        &mut self,
        current_id: FiberId,
        element: Option<&Element<H>>,
    ) -> FiberId {
        let (snapshot, existing_alternate) = {
            let current = self.get(current_id);
            let snapshot = WipSnapshot {
                tag: current.tag,
                kind: current.kind.clone(),
                key: current.key.clone(),
                memoized_props: current.memoized_props.clone(),
                memoized_state: current.memoized_state.clone(),
                state_node: current.state_node.clone(),
                update_queue: current.update_queue.clone(),
                pending_priority: current.pending_priority,
            };
            (snapshot, current.alternate.filter(|alt| self.contains(*alt)))
        };

        let wip_id = match existing_alternate {
            Some(id) => id,
            None => {
                let id = self.fibers.insert(Fiber::bare(snapshot.tag));
                self.get_mut(current_id).alternate = Some(id);
                id
            }
        };

        let wip = self.get_mut(wip_id);
        wip.tag = snapshot.tag;
        wip.kind = snapshot.kind;
        wip.key = snapshot.key;
        wip.memoized_props = snapshot.memoized_props.clone();
        wip.memoized_state = snapshot.memoized_state;
        wip.state_node = snapshot.state_node;
        wip.update_queue = snapshot.update_queue;
        wip.pending_priority = snapshot.pending_priority;
        wip.alternate = Some(current_id);

        match element {
            Some(element) => {
                // A handler-phase fiber restarts as a coroutine when its
                // element comes around again.
                wip.tag = tag_for_kind(&element.kind);
                wip.kind = Some(element.kind.clone());
                wip.key = element.key.clone();
                wip.pending_props = element.props.clone();
                wip.pending_children = Some(element.children.clone());
            }
            None => {
                wip.pending_props = snapshot.memoized_props;
                wip.pending_children = None;
            }
        }

        wip.pending_element = None;
        wip.child = None;
        wip.sibling = None;
        wip.ret = None;
        wip.effects = EffectFlags::empty();
        wip.deletions.clear();
        wip.was_deprioritized = false;
        wip.output.clear();
        wip.container_output.clear();
        wip.did_provide_context = false;
        wip.did_push_container = false;

        wip_id
    }

    /// Collect a fiber's children in sibling order.
    pub fn children_of(&self, id: FiberId) -> Vec<FiberId> {
        let mut out = Vec::new();
        let mut next = self.get(id).child;
        while let Some(child) = next {
            out.push(child);
            next = self.get(child).sibling;
        }
        out
    }

    /// Drop a single slot. For fibers allocated by a pass that was
    /// abandoned before commit; no committed tree can reach them.
    pub fn release(&mut self, id: FiberId) {
        self.fibers.remove(id);
    }

    /// Remove a fiber and its entire subtree, unlinking the alternates.
    pub fn remove_subtree(&mut self, id: FiberId) {
        let mut stack = vec![id];
        while let Some(fiber_id) = stack.pop() {
            if let Some(fiber) = self.fibers.remove(fiber_id) {
                if let Some(alt) = fiber.alternate {
                    if let Some(alt_fiber) = self.fibers.get_mut(alt) {
                        alt_fiber.alternate = None;
                    }
                }
                let mut next = fiber.child;
                while let Some(child) = next {
                    stack.push(child);
                    next = self.try_get(child).and_then(|c| c.sibling);
                }
            }
        }
    }

    /// Raise `priority` on `fiber` and every ancestor, so a later pass
    /// knows which subtrees hold pending work. Both buffers are marked at
    /// each level: after an adopted bailout a child's `ret` can point into
    /// the other buffer, and the next pass snapshots from whichever fiber
    /// is current.
    pub fn mark_pending_priority(&mut self, fiber: FiberId, priority: Priority) {
        let mut at = Some(fiber);
        while let Some(id) = at {
            let (alternate, ret) = {
                let node = self.get_mut(id);
                node.pending_priority =
                    Priority::most_urgent(node.pending_priority, Some(priority));
                (node.alternate, node.ret)
            };
            let mut next = ret;
            if let Some(alt) = alternate {
                if let Some(alt_node) = self.fibers.get_mut(alt) {
                    alt_node.pending_priority =
                        Priority::most_urgent(alt_node.pending_priority, Some(priority));
                    if next.is_none() {
                        next = alt_node.ret;
                    }
                }
            }
            at = next;
        }
    }
}

impl<H: HostConfig> Default for FiberArena<H> {
    fn default() -> Self {
        Self::new()
    }
}

struct WipSnapshot<H: HostConfig> {
    tag: WorkTag,
    kind: Option<ElementKind<H>>,
    key: Option<String>,
    memoized_props: PropMap,
    memoized_state: StateMap,
    state_node: StateNode<H>,
    update_queue: Option<Rc<RefCell<UpdateQueue>>>,
    pending_priority: Option<Priority>,
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::RecordingHost;
    use crate::types::props;

    type Arena = FiberArena<RecordingHost>;

    #[test]
    fn test_create_from_element_sets_placement() {
        let mut arena = Arena::new();
        let element = Element::host("div", props([("id", "a")]), vec![]);
        let id = arena.create_from_element(&element);

        let fiber = arena.get(id);
        assert_eq!(fiber.tag, WorkTag::HostComponent);
        assert!(fiber.effects.contains(EffectFlags::PLACEMENT));
        assert_eq!(fiber.pending_props, props([("id", "a")]));
    }

    #[test]
    fn test_work_in_progress_reuses_alternate_slot() {
        let mut arena = Arena::new();
        let element = Element::host("div", PropMap::new(), vec![]);
        let current = arena.create_from_element(&element);

        let wip_a = arena.create_work_in_progress(current, Some(&element));
        assert_eq!(arena.get(current).alternate, Some(wip_a));
        assert_eq!(arena.get(wip_a).alternate, Some(current));

        // A second pass recycles the same slot: never a third fiber per
        // position.
        let wip_b = arena.create_work_in_progress(current, Some(&element));
        assert_eq!(wip_a, wip_b);
        assert_eq!(arena.len(), 2);
    }

    #[test]
    fn test_work_in_progress_resets_effects_and_pointers() {
        let mut arena = Arena::new();
        let element = Element::host("div", props([("x", 1i64)]), vec![]);
        let current = arena.create_from_element(&element);
        let wip = arena.create_work_in_progress(current, Some(&element));

        {
            let fiber = arena.get_mut(wip);
            fiber.effects = EffectFlags::UPDATE;
            fiber.child = Some(current); // garbage link from a stale pass
        }

        let wip_again = arena.create_work_in_progress(current, Some(&element));
        let fiber = arena.get(wip_again);
        assert!(fiber.effects.is_empty());
        assert_eq!(fiber.child, None);
    }

    #[test]
    fn test_class_instance_is_shared_between_alternates() {
        use crate::element::ComponentDef;
        use std::rc::Rc;

        let def = ComponentDef::<RecordingHost>::stateless("Widget", Rc::new(|_, _, _| Ok(vec![])));
        let element = Element::class(&def, PropMap::new());

        let mut arena = Arena::new();
        let current = arena.create_from_element(&element);
        let wip = arena.create_work_in_progress(current, Some(&element));

        let a = arena.get(current).class_instance().unwrap().clone();
        let b = arena.get(wip).class_instance().unwrap().clone();
        assert!(Rc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_mark_pending_priority_walks_ancestors() {
        let mut arena = Arena::new();
        let parent = arena.create_from_element(&Element::host("div", PropMap::new(), vec![]));
        let child = arena.create_from_element(&Element::host("span", PropMap::new(), vec![]));
        arena.get_mut(child).ret = Some(parent);
        arena.get_mut(parent).child = Some(child);

        arena.mark_pending_priority(child, Priority::UserBlocking);
        assert_eq!(arena.get(child).pending_priority, Some(Priority::UserBlocking));
        assert_eq!(arena.get(parent).pending_priority, Some(Priority::UserBlocking));
    }

    #[test]
    fn test_remove_subtree_unlinks_alternate() {
        let mut arena = Arena::new();
        let element = Element::host("div", PropMap::new(), vec![]);
        let current = arena.create_from_element(&element);
        let wip = arena.create_work_in_progress(current, Some(&element));

        arena.remove_subtree(wip);
        assert!(!arena.contains(wip));
        assert_eq!(arena.get(current).alternate, None);
    }
}
