//! Context propagation - ambient keyed values flowing down the tree.
//!
//! Providers (class components with a child-context producer) push a merged
//! "unmasked" context object on the way down; consumers see only the keys
//! they declare, through masking. A parallel did-perform-work stack records
//! whether the values above the current frame could have changed since the
//! last render, so clean subtrees can skip re-evaluation.
//!
//! The stacks live on the reconciler session, not in globals, so
//! independent roots never share mutable state.

use std::cell::RefCell;
use std::rc::Rc;

use crate::element::{ChildContextFn, ElementKind};
use crate::fiber::{ClassInstance, Fiber, FiberArena, FiberId};
use crate::host::HostConfig;
use crate::stack::ValueCursor;
use crate::types::{merge_shallow, PropMap, WorkTag};

// =============================================================================
// Context Stack
// =============================================================================

/// The unmasked-context and did-perform-work stacks for one session.
pub struct ContextStack {
    unmasked: ValueCursor<Rc<PropMap>>,
    did_change: ValueCursor<bool>,
}

impl ContextStack {
    pub fn new() -> Self {
        Self {
            unmasked: ValueCursor::new(Rc::new(PropMap::new())),
            did_change: ValueCursor::new(false),
        }
    }

    /// The full unmasked context currently in effect.
    pub fn current_unmasked(&self) -> Rc<PropMap> {
        self.unmasked.current().clone()
    }

    /// Whether context differs from the previous render at this frame.
    /// Used to decide whether a subtree can skip re-evaluation.
    pub fn has_context_changed(&self) -> bool {
        *self.did_change.current()
    }

    /// Push the top-level context object. Only valid at the true root:
    /// a non-empty stack here means the walk is corrupted.
    pub fn push_top_level(&mut self, context: Rc<PropMap>, did_change: bool, fiber: FiberId) {
        assert!(
            self.unmasked.is_empty(),
            "top-level context pushed with non-empty stack"
        );
        self.unmasked.push(context, fiber);
        self.did_change.push(did_change, fiber);
    }

    /// Pop the top-level frame.
    pub fn pop_top_level(&mut self, fiber: FiberId) {
        self.did_change.pop(fiber);
        self.unmasked.pop(fiber);
    }

    /// Push a provider's merged child context.
    ///
    /// If the fiber performed no work and a merged context is already
    /// memoized on the instance, the identical object is reused - the
    /// memoization is invalidated only by the fiber itself performing
    /// work. Otherwise the contribution is recomputed and merged into the
    /// unmasked parent context (child keys win) and cached for next time.
    ///
    /// Contributed keys missing from `declared_keys` are reported through
    /// the diagnostic channel; the render proceeds.
    pub fn push_provider(
        &mut self,
        fiber: FiberId,
        name: &str,
        child_context: &ChildContextFn,
        declared_keys: &[String],
        instance: &Rc<RefCell<ClassInstance>>,
        did_perform_work: bool,
    ) {
        let merged = {
            let mut inst = instance.borrow_mut();
            match (&inst.memoized_merged_context, did_perform_work) {
                (Some(cached), false) => cached.clone(),
                _ => {
                    let contribution = child_context(&inst.props, &inst.state);
                    for key in contribution.keys() {
                        if !declared_keys.iter().any(|declared| declared == key) {
                            log::warn!(
                                "{name} contributes context key `{key}` it does not declare"
                            );
                        }
                    }
                    let mut merged = (**self.unmasked.current()).clone();
                    merge_shallow(&mut merged, &contribution);
                    let merged = Rc::new(merged);
                    inst.memoized_merged_context = Some(merged.clone());
                    merged
                }
            }
        };
        self.unmasked.push(merged, fiber);
        self.did_change.push(did_perform_work, fiber);
    }

    /// Pop a provider's frame.
    pub fn pop_provider(&mut self, fiber: FiberId) {
        self.did_change.pop(fiber);
        self.unmasked.pop(fiber);
    }

    /// Project only `keys` out of the unmasked context. Consumers never
    /// see keys they did not declare.
    pub fn masked_context(&self, keys: &[String]) -> PropMap {
        let unmasked = self.unmasked.current();
        let mut masked = PropMap::new();
        for key in keys {
            if let Some(value) = unmasked.get(key) {
                masked.insert(key.clone(), value.clone());
            }
        }
        masked
    }

    /// Drop all frames. Used when a pass is abandoned mid-tree.
    pub fn reset(&mut self) {
        self.unmasked.reset(Rc::new(PropMap::new()));
        self.did_change.reset(false);
    }
}

impl Default for ContextStack {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Provider discovery
// =============================================================================

/// A class fiber whose definition exposes a child-context producer.
pub fn is_context_provider<H: HostConfig>(fiber: &Fiber<H>) -> bool {
    matches!(
        (&fiber.tag, &fiber.kind),
        (WorkTag::ClassComponent, Some(ElementKind::Class(def))) if def.child_context.is_some()
    )
}

/// Find the unmasked context in effect at `fiber`, outside a pass.
///
/// Walks from the fiber itself up through `ret` links to the nearest
/// provider with a memoized merged context; empty at the root.
pub fn find_current_unmasked_context<H: HostConfig>(
    arena: &FiberArena<H>,
    fiber: FiberId,
) -> Rc<PropMap> {
    let mut at = Some(fiber);
    while let Some(id) = at {
        let node = arena.get(id);
        if is_context_provider(node) {
            if let Some(instance) = node.class_instance() {
                if let Some(cached) = &instance.borrow().memoized_merged_context {
                    return cached.clone();
                }
            }
        }
        at = node.ret;
    }
    Rc::new(PropMap::new())
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::props;
    use slotmap::SlotMap;

    fn fibers(n: usize) -> Vec<FiberId> {
        let mut keys: SlotMap<FiberId, ()> = SlotMap::with_key();
        (0..n).map(|_| keys.insert(())).collect()
    }

    fn provider_fn(contribution: PropMap) -> ChildContextFn {
        Rc::new(move |_props, _state| contribution.clone())
    }

    #[test]
    fn test_masking_hides_undeclared_keys() {
        let ids = fibers(2);
        let mut stack = ContextStack::new();
        stack.push_top_level(Rc::new(PropMap::new()), false, ids[0]);

        let instance = Rc::new(RefCell::new(ClassInstance::new(
            PropMap::new(),
            PropMap::new(),
        )));
        stack.push_provider(
            ids[1],
            "Theme",
            &provider_fn(props([("x", 1i64), ("y", 2i64)])),
            &["x".to_string(), "y".to_string()],
            &instance,
            true,
        );

        let masked = stack.masked_context(&["x".to_string()]);
        assert_eq!(masked, props([("x", 1i64)]));
        assert!(!masked.contains_key("y"));
    }

    #[test]
    fn test_provider_memoization_reuses_identical_object() {
        let ids = fibers(3);
        let mut stack = ContextStack::new();
        stack.push_top_level(Rc::new(PropMap::new()), false, ids[0]);

        let instance = Rc::new(RefCell::new(ClassInstance::new(
            PropMap::new(),
            PropMap::new(),
        )));
        let producer = provider_fn(props([("x", 1i64)]));
        let declared = vec!["x".to_string()];

        stack.push_provider(ids[1], "P", &producer, &declared, &instance, true);
        let first = stack.current_unmasked();
        stack.pop_provider(ids[1]);

        // No work performed: the cached merged object comes back untouched.
        stack.push_provider(ids[1], "P", &producer, &declared, &instance, false);
        let second = stack.current_unmasked();
        assert!(Rc::ptr_eq(&first, &second));
        stack.pop_provider(ids[1]);

        // Work performed: recomputed, new object.
        stack.push_provider(ids[1], "P", &producer, &declared, &instance, true);
        let third = stack.current_unmasked();
        assert!(!Rc::ptr_eq(&first, &third));
        assert_eq!(*first, *third);
    }

    #[test]
    fn test_did_change_follows_work() {
        let ids = fibers(2);
        let mut stack = ContextStack::new();
        stack.push_top_level(Rc::new(PropMap::new()), false, ids[0]);
        assert!(!stack.has_context_changed());

        let instance = Rc::new(RefCell::new(ClassInstance::new(
            PropMap::new(),
            PropMap::new(),
        )));
        stack.push_provider(
            ids[1],
            "P",
            &provider_fn(props([("x", 1i64)])),
            &["x".to_string()],
            &instance,
            true,
        );
        assert!(stack.has_context_changed());
        stack.pop_provider(ids[1]);
        assert!(!stack.has_context_changed());
    }

    #[test]
    fn test_child_keys_win_on_conflict() {
        let ids = fibers(2);
        let mut stack = ContextStack::new();
        stack.push_top_level(Rc::new(props([("x", 1i64), ("z", 9i64)])), false, ids[0]);

        let instance = Rc::new(RefCell::new(ClassInstance::new(
            PropMap::new(),
            PropMap::new(),
        )));
        stack.push_provider(
            ids[1],
            "P",
            &provider_fn(props([("x", 2i64)])),
            &["x".to_string()],
            &instance,
            true,
        );

        let unmasked = stack.current_unmasked();
        assert_eq!(*unmasked, props([("x", 2i64), ("z", 9i64)]));
    }

    #[test]
    #[should_panic(expected = "non-empty stack")]
    fn test_top_level_requires_empty_stack() {
        let ids = fibers(2);
        let mut stack = ContextStack::new();
        stack.push_top_level(Rc::new(PropMap::new()), false, ids[0]);
        stack.push_top_level(Rc::new(PropMap::new()), false, ids[1]);
    }

    #[test]
    fn test_undeclared_contribution_still_applies() {
        // Contributing an undeclared key is a reported diagnostic, not a
        // crash; the contribution itself goes through.
        let ids = fibers(2);
        let mut stack = ContextStack::new();
        stack.push_top_level(Rc::new(PropMap::new()), false, ids[0]);

        let instance = Rc::new(RefCell::new(ClassInstance::new(
            PropMap::new(),
            PropMap::new(),
        )));
        stack.push_provider(
            ids[1],
            "Sloppy",
            &provider_fn(props([("undeclared", 1i64)])),
            &[],
            &instance,
            true,
        );
        assert!(stack.current_unmasked().contains_key("undeclared"));
    }
}
