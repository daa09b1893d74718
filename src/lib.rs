//! # spindle
//!
//! Incremental fiber reconciliation runtime for declarative UI trees.
//!
//! Element trees describe what a UI should look like; spindle diffs them
//! against what is currently mounted and drives a host adapter through
//! the minimal set of mutations. Rendering targets plug in through the
//! [`HostConfig`] trait; the core never touches a host tree directly.
//!
//! ## Architecture
//!
//! Work is organized around fibers, one per mounted tree position, held
//! in two buffers: the committed `current` tree and the `work-in-progress`
//! tree being built. A pass walks the work-in-progress tree in two
//! phases:
//!
//! ```text
//! update → begin (top-down render + child diff)
//!        → complete (bottom-up host output, detached)
//!        → commit (apply effects, swap buffers)
//! ```
//!
//! The walk is resumable: between fibers the loop polls a
//! [`Deadline`](scheduler::Deadline) and yields with its position intact
//! when the budget runs out. Updates carry a [`Priority`]; more urgent
//! work preempts a pass in flight at the fiber boundary.
//!
//! ## Modules
//!
//! - [`types`] - Tags, effect flags, priorities, prop values
//! - [`element`] - Immutable element descriptions and component definitions
//! - [`fiber`] - The fiber arena and the dual-buffer tree
//! - [`queue`] - Per-fiber state update queues
//! - [`context`] - Parent-to-descendant context propagation
//! - [`host`] - The host adapter contract and a recording test host
//! - [`reconciler`] - Begin/complete/commit and the public entry points
//! - [`scheduler`] - Deadlines and the interruptible work loop

pub mod context;
pub mod element;
pub mod fiber;
pub mod host;
pub mod queue;
pub mod reconciler;
pub mod scheduler;
pub mod stack;
pub mod types;

pub use types::{EffectFlags, Priority, PropMap, PropValue, StateMap, WorkTag, props};

pub use element::{
    ChildContextFn, ComponentDef, CoroutineDef, CoroutineHandlerFn, Element, ElementKind,
    FunctionDef, FunctionRenderFn, RenderError, RenderFn, RenderResult,
};

pub use fiber::{Fiber, FiberArena, FiberId, FiberRoot, RootId};

pub use host::{
    ContainerId, HostCall, HostConfig, HostCx, HostNode, RecordingHost, TraceInstance, TraceText,
};

pub use queue::{CallbackError, StateUpdate, UpdateCallback, UpdateQueue};

pub use reconciler::{ReconcileError, Reconciler};

pub use scheduler::{Deadline, Forever, UnitBudget, TIME_SLICE_FLOOR};
