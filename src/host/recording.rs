//! Recording host - the no-op test backend.
//!
//! Every `HostConfig` call is appended to a call log. Tests drive the
//! reconciler against this adapter and assert on the exact sequence of
//! host mutations; nothing is actually rendered.

use std::time::{Duration, Instant};

use super::{HostConfig, HostNode};
use crate::types::PropMap;

/// Opaque container handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContainerId(pub u32);

/// Host instance handle minted by [`RecordingHost`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceInstance {
    pub id: u32,
    pub ty: String,
}

/// Host text instance handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceText {
    pub id: u32,
    pub text: String,
}

/// Host context: a namespace string. `svg` subtrees switch namespaces so
/// tests can exercise the context-differs push path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostCx {
    pub namespace: String,
}

/// One recorded host-config call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostCall {
    CreateInstance { id: u32, ty: String },
    CreateTextInstance { id: u32, text: String },
    AppendInitialChild { parent: u32, child: u32 },
    FinalizeInitialChildren { instance: u32 },
    AppendChild { parent: u32, child: u32 },
    PrepareForCommit,
    ResetAfterCommit,
    CommitUpdate { instance: u32, ty: String },
    CommitTextUpdate { instance: u32, old: String, new: String },
    CommitDeletion { node: u32 },
    UpdateContainer { container: u32, children: Vec<u32> },
}

/// A host adapter that records every call and mutates nothing.
pub struct RecordingHost {
    pub calls: Vec<HostCall>,
    next_id: u32,
    started: Instant,
}

impl RecordingHost {
    pub fn new() -> Self {
        Self {
            calls: Vec::new(),
            next_id: 0,
            started: Instant::now(),
        }
    }

    fn mint_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn node_id(node: &HostNode<Self>) -> u32 {
        match node {
            HostNode::Instance(i) => i.id,
            HostNode::Text(t) => t.id,
        }
    }

    /// Count recorded calls matching `predicate`.
    pub fn count(&self, predicate: impl Fn(&HostCall) -> bool) -> usize {
        self.calls.iter().filter(|call| predicate(call)).count()
    }

    /// All `UpdateContainer` child lists for `container`, in call order.
    pub fn container_flushes(&self, container: ContainerId) -> Vec<Vec<u32>> {
        self.calls
            .iter()
            .filter_map(|call| match call {
                HostCall::UpdateContainer { container: c, children } if *c == container.0 => {
                    Some(children.clone())
                }
                _ => None,
            })
            .collect()
    }

    /// Forget all recorded calls. Handy between test phases.
    pub fn clear_calls(&mut self) {
        self.calls.clear();
    }
}

impl Default for RecordingHost {
    fn default() -> Self {
        Self::new()
    }
}

impl HostConfig for RecordingHost {
    type Instance = TraceInstance;
    type TextInstance = TraceText;
    type Container = ContainerId;
    type Context = HostCx;

    fn get_root_host_context(&self, _container: &ContainerId) -> HostCx {
        HostCx {
            namespace: "root".to_string(),
        }
    }

    fn get_child_host_context(
        &self,
        parent: &HostCx,
        ty: &str,
        _container: &ContainerId,
    ) -> HostCx {
        if ty == "svg" {
            HostCx {
                namespace: "svg".to_string(),
            }
        } else {
            parent.clone()
        }
    }

    fn should_set_text_content(&self, _ty: &str, props: &PropMap) -> bool {
        props.contains_key("text")
    }

    fn create_instance(
        &mut self,
        ty: &str,
        _props: &PropMap,
        _container: &ContainerId,
        _context: &HostCx,
    ) -> TraceInstance {
        let id = self.mint_id();
        self.calls.push(HostCall::CreateInstance {
            id,
            ty: ty.to_string(),
        });
        TraceInstance {
            id,
            ty: ty.to_string(),
        }
    }

    fn create_text_instance(
        &mut self,
        text: &str,
        _container: &ContainerId,
        _context: &HostCx,
    ) -> TraceText {
        let id = self.mint_id();
        self.calls.push(HostCall::CreateTextInstance {
            id,
            text: text.to_string(),
        });
        TraceText {
            id,
            text: text.to_string(),
        }
    }

    fn append_initial_child(&mut self, parent: &TraceInstance, child: &HostNode<Self>) {
        self.calls.push(HostCall::AppendInitialChild {
            parent: parent.id,
            child: Self::node_id(child),
        });
    }

    fn finalize_initial_children(
        &mut self,
        instance: &TraceInstance,
        _ty: &str,
        _props: &PropMap,
    ) -> bool {
        self.calls.push(HostCall::FinalizeInitialChildren {
            instance: instance.id,
        });
        false
    }

    fn append_child(&mut self, parent: &TraceInstance, child: &HostNode<Self>) {
        self.calls.push(HostCall::AppendChild {
            parent: parent.id,
            child: Self::node_id(child),
        });
    }

    fn prepare_for_commit(&mut self) {
        self.calls.push(HostCall::PrepareForCommit);
    }

    fn reset_after_commit(&mut self) {
        self.calls.push(HostCall::ResetAfterCommit);
    }

    fn commit_update(
        &mut self,
        instance: &TraceInstance,
        ty: &str,
        _old_props: &PropMap,
        _new_props: &PropMap,
        _children: &[HostNode<Self>],
    ) {
        self.calls.push(HostCall::CommitUpdate {
            instance: instance.id,
            ty: ty.to_string(),
        });
    }

    fn commit_text_update(&mut self, instance: &TraceText, old_text: &str, new_text: &str) {
        self.calls.push(HostCall::CommitTextUpdate {
            instance: instance.id,
            old: old_text.to_string(),
            new: new_text.to_string(),
        });
    }

    fn commit_deletion(&mut self, node: &HostNode<Self>) {
        self.calls.push(HostCall::CommitDeletion {
            node: Self::node_id(node),
        });
    }

    fn update_container(&mut self, container: &ContainerId, children: &[HostNode<Self>]) {
        self.calls.push(HostCall::UpdateContainer {
            container: container.0,
            children: children.iter().map(Self::node_id).collect(),
        });
    }

    fn now(&self) -> Duration {
        self.started.elapsed()
    }
}
