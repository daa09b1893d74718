//! The complete phase - bottom-up finalization of one fiber.
//!
//! Runs when a fiber has no unfinished children left. Host fibers build
//! their instances here, detached: new instances get their children
//! appended and are finalized, but nothing visible is touched until
//! commit. Mutations of already-mounted instances are recorded as effects
//! instead. Composite fibers pass their children's output through and pop
//! whatever frames they pushed during begin.
//!
//! Completing a coroutine is the one case that produces more work: the
//! collected yield values are handed to the handler and the continuation
//! it returns is reconciled in place, so the walk descends again.

use std::mem;

use crate::element::ElementKind;
use crate::fiber::{FiberId, StateNode};
use crate::host::{HostConfig, HostNode};
use crate::types::{EffectFlags, PropValue, WorkTag};

use super::{Effect, Reconciler};

impl<H: HostConfig> Reconciler<H> {
    /// Finalize `wip`. Returns a continuation fiber when completion
    /// spawned new work (coroutine handler phase), otherwise `None` and
    /// the walk moves to the sibling or parent.
    pub(crate) fn complete_work(&mut self, wip: FiberId) -> Option<FiberId> {
        self.flush_deletions(wip);

        let continuation = match self.arena.get(wip).tag {
            WorkTag::HostRoot => {
                self.complete_container(wip, true);
                None
            }
            WorkTag::Portal => {
                self.complete_container(wip, false);
                None
            }
            WorkTag::HostComponent => {
                self.complete_host_component(wip);
                None
            }
            WorkTag::HostText => {
                self.complete_host_text(wip);
                None
            }
            WorkTag::ClassComponent => {
                if self.arena.get(wip).did_provide_context {
                    self.session.context.pop_provider(wip);
                }
                self.complete_passthrough(wip);
                None
            }
            WorkTag::FunctionComponent
            | WorkTag::Fragment
            | WorkTag::CoroutineHandlerPhase => {
                self.complete_passthrough(wip);
                None
            }
            WorkTag::YieldComponent => {
                let fiber = self.arena.get_mut(wip);
                fiber.memoized_props = fiber.pending_props.clone();
                fiber.output.clear();
                None
            }
            WorkTag::Coroutine => self.complete_coroutine(wip),
        };

        let fiber = self.arena.get_mut(wip);
        if !fiber.was_deprioritized {
            fiber.pending_priority = None;
        }
        continuation
    }

    /// Concatenate the host output of `wip`'s children in sibling order.
    /// Works across buffers: adopted (committed) children still hold the
    /// output of their last completion.
    fn collect_child_output(&self, wip: FiberId) -> Vec<HostNode<H>> {
        let mut out = Vec::new();
        for child in self.arena.children_of(wip) {
            out.extend(self.arena.get(child).output.iter().cloned());
        }
        out
    }

    /// Turn the deletions recorded during child reconciliation into
    /// commit effects. Deletions are emitted before this fiber's own
    /// mutation effects.
    fn flush_deletions(&mut self, wip: FiberId) {
        let deletions = mem::take(&mut self.arena.get_mut(wip).deletions);
        for deleted in deletions {
            self.session.effects.push(Effect::Deletion(deleted));
        }
    }

    fn complete_container(&mut self, wip: FiberId, is_root: bool) {
        let child_output = self.collect_child_output(wip);
        let changed = self
            .arena
            .get(wip)
            .alternate
            .map(|alt| self.arena.get(alt).container_output != child_output)
            .unwrap_or(true);
        if changed {
            self.session.effects.push(Effect::ContainerFlush {
                fiber: wip,
                children: child_output.clone(),
            });
        }

        let fiber = self.arena.get_mut(wip);
        fiber.container_output = child_output;
        // Containers contribute nothing to their parent's output; a
        // portal's content lives in its own container.
        fiber.output.clear();
        fiber.memoized_props = fiber.pending_props.clone();

        if is_root {
            self.session.context.pop_top_level(wip);
        }
        self.session.host_context.pop_host_container(wip);
    }

    fn complete_host_component(&mut self, wip: FiberId) {
        // Pop first: instance creation sees the context in effect at this
        // node's own position, i.e. the parent's child context.
        self.session.host_context.pop_host_context(wip);

        let child_output = self.collect_child_output(wip);
        let (ty, pending_props, memoized_props, mounted) = {
            let fiber = self.arena.get(wip);
            let ty = match &fiber.kind {
                Some(ElementKind::Host(ty)) => ty.clone(),
                _ => panic!("host fiber without a type"),
            };
            let mounted = match &fiber.state_node {
                StateNode::Instance(instance) => Some(instance.clone()),
                _ => None,
            };
            (
                ty,
                fiber.pending_props.clone(),
                fiber.memoized_props.clone(),
                mounted,
            )
        };

        match mounted {
            None => {
                let container = self.session.host_context.root_host_container().clone();
                let context = self.session.host_context.host_context().clone();
                let instance = self
                    .host
                    .create_instance(&ty, &pending_props, &container, &context);
                for node in &child_output {
                    self.host.append_initial_child(&instance, node);
                }
                self.host.finalize_initial_children(&instance, &ty, &pending_props);

                let fiber = self.arena.get_mut(wip);
                fiber.state_node = StateNode::Instance(instance.clone());
                fiber.output = vec![HostNode::Instance(instance)];
                fiber.memoized_props = pending_props;
                self.session.effects.push(Effect::Placement(wip));
            }
            Some(instance) => {
                let props_changed = pending_props != memoized_props;
                let children_changed = self
                    .arena
                    .get(wip)
                    .alternate
                    .map(|alt| self.collect_child_output(alt) != child_output)
                    .unwrap_or(true);
                if props_changed || children_changed {
                    self.arena.get_mut(wip).effects |= EffectFlags::UPDATE;
                    self.session.effects.push(Effect::Update {
                        fiber: wip,
                        old_props: memoized_props,
                        children: child_output,
                    });
                }
                let fiber = self.arena.get_mut(wip);
                fiber.output = vec![HostNode::Instance(instance)];
                fiber.memoized_props = pending_props;
            }
        }
    }

    fn complete_host_text(&mut self, wip: FiberId) {
        let (text, old_text, mounted) = {
            let fiber = self.arena.get(wip);
            let text = text_prop(&fiber.pending_props);
            let old_text = text_prop(&fiber.memoized_props);
            let mounted = match &fiber.state_node {
                StateNode::Text(instance) => Some(instance.clone()),
                _ => None,
            };
            (text, old_text, mounted)
        };

        match mounted {
            None => {
                let container = self.session.host_context.root_host_container().clone();
                let context = self.session.host_context.host_context().clone();
                let instance = self.host.create_text_instance(&text, &container, &context);

                let fiber = self.arena.get_mut(wip);
                fiber.state_node = StateNode::Text(instance.clone());
                fiber.output = vec![HostNode::Text(instance)];
                fiber.memoized_props = fiber.pending_props.clone();
                self.session.effects.push(Effect::Placement(wip));
            }
            Some(instance) => {
                if text != old_text {
                    self.arena.get_mut(wip).effects |= EffectFlags::UPDATE;
                    self.session.effects.push(Effect::TextUpdate {
                        fiber: wip,
                        old_text,
                    });
                }
                let fiber = self.arena.get_mut(wip);
                fiber.output = vec![HostNode::Text(instance)];
                fiber.memoized_props = fiber.pending_props.clone();
            }
        }
    }

    /// Composite fibers surface their children's host output unchanged.
    fn complete_passthrough(&mut self, wip: FiberId) {
        let output = self.collect_child_output(wip);
        let fiber = self.arena.get_mut(wip);
        fiber.output = output;
        fiber.memoized_props = fiber.pending_props.clone();
    }

    /// Move a completed coroutine into its handler phase: collect the
    /// yield values from the finished yield subtree, drop that subtree,
    /// and reconcile the handler's continuation in its place. The first
    /// continuation child resumes the walk.
    fn complete_coroutine(&mut self, wip: FiberId) -> Option<FiberId> {
        let (def, props) = {
            let fiber = self.arena.get(wip);
            let def = match &fiber.kind {
                Some(ElementKind::Coroutine(def)) => def.clone(),
                _ => panic!("coroutine fiber without a definition"),
            };
            (def, fiber.pending_props.clone())
        };

        let yields = self.collect_yields(wip);
        // The yield phase never reaches the host tree.
        for child in self.arena.children_of(wip) {
            self.arena.remove_subtree(child);
        }
        self.arena.get_mut(wip).child = None;

        let continuation = (def.handler)(&props, &yields);
        self.arena.get_mut(wip).tag = WorkTag::CoroutineHandlerPhase;
        let next = self.reconcile_children(wip, continuation);
        if next.is_none() {
            // An empty continuation completes the handler phase on the
            // spot; it never comes back through the passthrough path, so
            // memoize (and flush any deletions of the previous
            // continuation) here.
            self.flush_deletions(wip);
            let fiber = self.arena.get_mut(wip);
            fiber.output = Vec::new();
            fiber.memoized_props = fiber.pending_props.clone();
        }
        next
    }

    /// Yield values of the completed yield subtree, depth-first in tree
    /// order.
    fn collect_yields(&self, wip: FiberId) -> Vec<PropValue> {
        let mut values = Vec::new();
        let mut stack: Vec<FiberId> = self.arena.children_of(wip).into_iter().rev().collect();
        while let Some(id) = stack.pop() {
            let fiber = self.arena.get(id);
            if let Some(ElementKind::Yield(value)) = &fiber.kind {
                values.push(value.clone());
            }
            let children = self.arena.children_of(id);
            stack.extend(children.into_iter().rev());
        }
        values
    }
}

fn text_prop(props: &crate::types::PropMap) -> String {
    match props.get("text") {
        Some(PropValue::Str(text)) => text.clone(),
        _ => String::new(),
    }
}
