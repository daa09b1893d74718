//! The commit phase - applying a finished pass to the host tree.
//!
//! Runs synchronously and uninterrupted once a pass has fully completed.
//! Effects are applied in completion order (children first), bracketed by
//! `prepare_for_commit`/`reset_after_commit`. The work-in-progress root
//! fiber is promoted to current, then update callbacks fire exactly once
//! each; the first callback error is surfaced after the whole batch ran.

use std::mem;

use crate::element::ElementKind;
use crate::fiber::{FiberId, StateNode};
use crate::host::HostConfig;
use crate::queue::CallbackError;
use crate::types::{EffectFlags, WorkTag};

use super::{Effect, ReconcileError, Reconciler};

impl<H: HostConfig> Reconciler<H> {
    /// Commit the session's completed pass and reset the session.
    pub(crate) fn commit_pass(&mut self) -> Result<(), ReconcileError> {
        let root_id = self
            .session
            .wip_root
            .take()
            .expect("commit without a pass in flight");
        let wip_root_fiber = self
            .session
            .wip_root_fiber
            .take()
            .expect("commit without a work-in-progress root");
        let effects = mem::take(&mut self.session.effects);
        let processed_queues = mem::take(&mut self.session.processed_queues);
        let deprioritized = self.session.deprioritized.take();
        self.session.next_unit_of_work = None;
        // The pass landed; everything it mounted is now owned by the
        // committed tree.
        self.session.created.clear();

        self.host.prepare_for_commit();
        for effect in &effects {
            self.apply_effect(effect);
        }
        self.host.reset_after_commit();

        // Promote the finished tree. The previous current becomes the
        // recycled alternate of the next pass.
        if let Some(record) = self.roots.get_mut(root_id) {
            record.current = wip_root_fiber;
            record.pending_priority = deprioritized;
        }
        self.clear_effect_flags(&effects, wip_root_fiber);

        // Callbacks observe the committed state.
        let mut first_error: Option<CallbackError> = None;
        for (fiber, queue) in processed_queues {
            let state = match self.arena.try_get_mut(fiber) {
                Some(node) => {
                    node.effects = EffectFlags::empty();
                    node.memoized_state.clone()
                }
                None => Default::default(),
            };
            let mut queue = queue.borrow_mut();
            if let Err(error) = queue.call_callbacks(&state) {
                first_error.get_or_insert(error);
            }
            queue.clear();
        }

        if deprioritized.is_some() {
            self.ensure_scheduled(root_id);
        }

        match first_error {
            Some(error) => Err(error.into()),
            None => Ok(()),
        }
    }

    fn apply_effect(&mut self, effect: &Effect<H>) {
        // A non-mutating adapter is driven through container flushes
        // alone; per-node effects still run their arena bookkeeping.
        let mutate = self.host.supports_mutation();
        match effect {
            Effect::Deletion(fiber) => self.commit_deletion(*fiber, mutate),
            Effect::Placement(fiber) => {
                if mutate {
                    self.commit_placement(*fiber);
                }
            }
            Effect::Update {
                fiber,
                old_props,
                children,
            } => {
                // Stale entries can be left behind by a replaced
                // coroutine yield phase; skip them.
                let Some(node) = self.arena.try_get(*fiber) else {
                    return;
                };
                let ty = match &node.kind {
                    Some(ElementKind::Host(ty)) => ty.clone(),
                    _ => return,
                };
                let StateNode::Instance(instance) = node.state_node.clone() else {
                    return;
                };
                let new_props = node.memoized_props.clone();
                if mutate {
                    self.host
                        .commit_update(&instance, &ty, old_props, &new_props, children);
                }
            }
            Effect::TextUpdate { fiber, old_text } => {
                let Some(node) = self.arena.try_get(*fiber) else {
                    return;
                };
                let StateNode::Text(instance) = node.state_node.clone() else {
                    return;
                };
                let new_text = match node.memoized_props.get("text") {
                    Some(crate::types::PropValue::Str(text)) => text.clone(),
                    _ => String::new(),
                };
                if mutate {
                    self.host
                        .commit_text_update(&instance, old_text, &new_text);
                }
            }
            Effect::ContainerFlush { fiber, children } => {
                let Some(node) = self.arena.try_get(*fiber) else {
                    return;
                };
                let StateNode::Container(container) = node.state_node.clone() else {
                    return;
                };
                self.host.update_container(&container, children);
            }
        }
    }

    /// Detach a deleted fiber's host output and drop its subtree from the
    /// arena.
    fn commit_deletion(&mut self, fiber: FiberId, mutate: bool) {
        let Some(node) = self.arena.try_get(fiber) else {
            return;
        };
        if mutate {
            for output in node.output.clone() {
                self.host.commit_deletion(&output);
            }
        }
        self.arena.remove_subtree(fiber);
    }

    /// Attach a newly mounted host node, unless an ancestor already
    /// covers it: a new host parent attached it during initial mount, and
    /// a container flush re-lists the whole top level.
    fn commit_placement(&mut self, fiber: FiberId) {
        let Some(node) = self.arena.try_get(fiber) else {
            return;
        };
        let output = node.output.clone();
        let mut at = node.ret;
        while let Some(parent_id) = at {
            let Some(parent) = self.arena.try_get(parent_id) else {
                return;
            };
            match parent.tag {
                WorkTag::HostComponent => {
                    if parent.effects.contains(EffectFlags::PLACEMENT) {
                        // Covered by the parent's own initial mount.
                        return;
                    }
                    let StateNode::Instance(instance) = parent.state_node.clone() else {
                        return;
                    };
                    for child in &output {
                        self.host.append_child(&instance, child);
                    }
                    return;
                }
                WorkTag::HostRoot | WorkTag::Portal => return,
                _ => at = parent.ret,
            }
        }
    }

    /// Placement flags drive attach decisions within one commit only.
    fn clear_effect_flags(&mut self, effects: &[Effect<H>], root_fiber: FiberId) {
        for effect in effects {
            let fiber = match effect {
                Effect::Placement(fiber)
                | Effect::Update { fiber, .. }
                | Effect::TextUpdate { fiber, .. }
                | Effect::ContainerFlush { fiber, .. } => *fiber,
                Effect::Deletion(_) => continue,
            };
            if let Some(node) = self.arena.try_get_mut(fiber) {
                node.effects = EffectFlags::empty();
            }
        }
        if let Some(node) = self.arena.try_get_mut(root_fiber) {
            node.effects = EffectFlags::empty();
        }
    }
}
