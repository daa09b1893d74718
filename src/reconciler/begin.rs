//! The begin phase - top-down work on one fiber.
//!
//! `begin_work` dispatches on the fiber tag, produces the fiber's child
//! elements (by rendering, or by reading the element's children), and
//! reconciles them into work-in-progress child fibers. It returns the
//! first child as the next unit of work, or `None` when the fiber is a
//! leaf or its subtree can be reused unchanged.

use std::rc::Rc;

use crate::element::ElementKind;
use crate::fiber::{FiberId, StateNode};
use crate::host::HostConfig;
use crate::types::{EffectFlags, PropMap, Priority, WorkTag};

use super::{ReconcileError, Reconciler};

impl<H: HostConfig> Reconciler<H> {
    pub(crate) fn begin_work(&mut self, wip: FiberId) -> Result<Option<FiberId>, ReconcileError> {
        match self.arena.get(wip).tag {
            WorkTag::HostRoot => self.begin_host_root(wip),
            WorkTag::ClassComponent => self.begin_class(wip),
            WorkTag::FunctionComponent => self.begin_function(wip),
            WorkTag::HostComponent => self.begin_host_component(wip),
            WorkTag::HostText | WorkTag::YieldComponent => Ok(None),
            WorkTag::Fragment | WorkTag::CoroutineHandlerPhase => {
                Ok(self.begin_children_passthrough(wip))
            }
            WorkTag::Portal => Ok(self.begin_portal(wip)),
            WorkTag::Coroutine => Ok(self.begin_coroutine(wip)),
        }
    }

    fn begin_host_root(&mut self, wip: FiberId) -> Result<Option<FiberId>, ReconcileError> {
        let (container, element, queue) = {
            let fiber = self.arena.get_mut(wip);
            let container = match &fiber.state_node {
                StateNode::Container(container) => container.clone(),
                _ => panic!("host root without a container"),
            };
            (container, fiber.pending_element.take(), fiber.update_queue.clone())
        };

        let root_context = self.host.get_root_host_context(&container);
        self.session
            .host_context
            .push_host_container(wip, container, root_context);
        self.arena.get_mut(wip).did_push_container = true;
        self.session
            .context
            .push_top_level(Rc::new(PropMap::new()), false, wip);

        if let Some(queue) = queue {
            if queue.borrow().has_pending_callbacks() {
                self.arena.get_mut(wip).effects |= EffectFlags::CALLBACK;
            }
            self.session.processed_queues.push((wip, queue));
        }

        let children = element.map(|element| vec![element]).unwrap_or_default();
        Ok(self.reconcile_children(wip, children))
    }

    fn begin_class(&mut self, wip: FiberId) -> Result<Option<FiberId>, ReconcileError> {
        let (def, instance, queue, is_mount, pending_props, memoized_props, memoized_state) = {
            let fiber = self.arena.get(wip);
            let def = match &fiber.kind {
                Some(ElementKind::Class(def)) => def.clone(),
                _ => panic!("class fiber without a component definition"),
            };
            let instance = fiber
                .class_instance()
                .cloned()
                .expect("class fiber without an instance");
            (
                def,
                instance,
                fiber.update_queue.clone(),
                fiber.alternate.is_none(),
                fiber.pending_props.clone(),
                fiber.memoized_props.clone(),
                fiber.memoized_state.clone(),
            )
        };

        let masked = self.session.context.masked_context(&def.context_keys);
        let priority_ready = self
            .arena
            .get(wip)
            .pending_priority
            .is_none_or(|p| !self.session.pass_priority.is_more_urgent_than(p));
        // A callback-only update still has to run the queue at commit.
        let has_state_update = priority_ready
            && queue.as_ref().is_some_and(|q| {
                let q = q.borrow();
                q.has_update() || q.has_pending_callbacks()
            });
        let props_changed = is_mount || pending_props != memoized_props;
        let context_changed = self.session.context.has_context_changed()
            || (!def.context_keys.is_empty() && masked != instance.borrow().context);

        if !props_changed && !has_state_update && !context_changed {
            if let Some(child_context) = &def.child_context {
                self.session.context.push_provider(
                    wip,
                    &def.name,
                    child_context,
                    &def.child_context_keys,
                    &instance,
                    false,
                );
                self.arena.get_mut(wip).did_provide_context = true;
            }
            return Ok(self.continue_without_input(wip));
        }

        let new_state = match &queue {
            Some(queue) => {
                let merged = {
                    let queue = queue.borrow();
                    if queue.has_pending_callbacks() {
                        self.arena.get_mut(wip).effects |= EffectFlags::CALLBACK;
                    }
                    queue.merge(&memoized_state, &pending_props)
                };
                self.session.processed_queues.push((wip, queue.clone()));
                merged
            }
            None => memoized_state,
        };

        {
            let mut inst = instance.borrow_mut();
            inst.props = pending_props.clone();
            inst.state = new_state.clone();
            inst.context = masked.clone();
        }

        let children = (def.render)(&pending_props, &new_state, &masked)?;

        {
            let fiber = self.arena.get_mut(wip);
            fiber.memoized_props = pending_props;
            fiber.memoized_state = new_state;
        }

        if let Some(child_context) = &def.child_context {
            self.session.context.push_provider(
                wip,
                &def.name,
                child_context,
                &def.child_context_keys,
                &instance,
                true,
            );
            self.arena.get_mut(wip).did_provide_context = true;
        }

        Ok(self.reconcile_children(wip, children))
    }

    fn begin_function(&mut self, wip: FiberId) -> Result<Option<FiberId>, ReconcileError> {
        let (def, is_mount, pending_props, memoized_props) = {
            let fiber = self.arena.get(wip);
            let def = match &fiber.kind {
                Some(ElementKind::Function(def)) => def.clone(),
                _ => panic!("function fiber without a definition"),
            };
            (
                def,
                fiber.alternate.is_none(),
                fiber.pending_props.clone(),
                fiber.memoized_props.clone(),
            )
        };

        let props_changed = is_mount || pending_props != memoized_props;
        let context_changed = self.session.context.has_context_changed();
        if !props_changed && !context_changed {
            return Ok(self.continue_without_input(wip));
        }

        let masked = self.session.context.masked_context(&def.context_keys);
        let children = (def.render)(&pending_props, &masked)?;
        self.arena.get_mut(wip).memoized_props = pending_props;
        Ok(self.reconcile_children(wip, children))
    }

    fn begin_host_component(&mut self, wip: FiberId) -> Result<Option<FiberId>, ReconcileError> {
        let (ty, pending_props, pending_children) = {
            let fiber = self.arena.get_mut(wip);
            let ty = match &fiber.kind {
                Some(ElementKind::Host(ty)) => ty.clone(),
                _ => panic!("host fiber without a type"),
            };
            (ty, fiber.pending_props.clone(), fiber.pending_children.take())
        };

        let child_context = {
            let parent = self.session.host_context.host_context().clone();
            let container = self.session.host_context.root_host_container().clone();
            self.host.get_child_host_context(&parent, &ty, &container)
        };
        self.session.host_context.push_host_context(wip, child_context);

        match pending_children {
            Some(children) => {
                // Literal text content is set by the host on the instance
                // itself; no text fibers are materialized underneath.
                let children = if self.host.should_set_text_content(&ty, &pending_props) {
                    Vec::new()
                } else {
                    children
                };
                Ok(self.reconcile_children(wip, children))
            }
            None => Ok(self.continue_without_input(wip)),
        }
    }

    fn begin_portal(&mut self, wip: FiberId) -> Option<FiberId> {
        let (container, pending_children) = {
            let fiber = self.arena.get_mut(wip);
            let container = match &fiber.state_node {
                StateNode::Container(container) => container.clone(),
                _ => panic!("portal fiber without a container"),
            };
            (container, fiber.pending_children.take())
        };

        let root_context = self.host.get_root_host_context(&container);
        self.session
            .host_context
            .push_host_container(wip, container, root_context);
        self.arena.get_mut(wip).did_push_container = true;

        match pending_children {
            Some(children) => self.reconcile_children(wip, children),
            None => self.continue_without_input(wip),
        }
    }

    /// Fragments and completed handler phases: children come straight from
    /// the element.
    fn begin_children_passthrough(&mut self, wip: FiberId) -> Option<FiberId> {
        let pending_children = self.arena.get_mut(wip).pending_children.take();
        match pending_children {
            Some(children) => self.reconcile_children(wip, children),
            None => self.continue_without_input(wip),
        }
    }

    /// Coroutines mount their yield phase fresh each pass; the previous
    /// continuation is diffed against the handler's output at completion,
    /// not against the yields.
    fn begin_coroutine(&mut self, wip: FiberId) -> Option<FiberId> {
        let pending_children = self.arena.get_mut(wip).pending_children.take();
        let Some(children) = pending_children else {
            return self.continue_without_input(wip);
        };

        let ids: Vec<FiberId> = children
            .iter()
            .map(|element| self.mount_fiber(element))
            .collect();
        for (index, &id) in ids.iter().enumerate() {
            let fiber = self.arena.get_mut(id);
            fiber.ret = Some(wip);
            fiber.sibling = ids.get(index + 1).copied();
        }
        let first = ids.first().copied();
        self.arena.get_mut(wip).child = first;
        first
    }

    /// A fiber with no new input of its own: reuse the committed subtree
    /// outright, descend into clones when deeper work is pending at this
    /// pass's tier, or skip and remember the lower tier.
    fn continue_without_input(&mut self, wip: FiberId) -> Option<FiberId> {
        match self.arena.get(wip).pending_priority {
            None => {
                self.adopt_current_children(wip);
                None
            }
            Some(priority) if !self.session.pass_priority.is_more_urgent_than(priority) => {
                self.clone_current_children(wip)
            }
            Some(priority) => {
                self.arena.get_mut(wip).was_deprioritized = true;
                self.session.deprioritized =
                    Priority::most_urgent(self.session.deprioritized, Some(priority));
                self.adopt_current_children(wip);
                None
            }
        }
    }
}
