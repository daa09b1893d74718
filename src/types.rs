//! Core types for spindle.
//!
//! These types define the foundation that everything builds on.
//! They flow through the begin/complete walk and define what the
//! host configuration understands.

use bitflags::bitflags;
use std::collections::BTreeMap;

// =============================================================================
// Work Tags
// =============================================================================

/// Discriminant over the kinds of work a fiber can represent.
///
/// This is a closed, exhaustive set. Every fiber carries exactly one tag for
/// its whole lifetime, except `Coroutine`, which becomes
/// `CoroutineHandlerPhase` when its yielded children have completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkTag {
    /// The root of an independently rendered tree. Owns the host container.
    HostRoot,
    /// A concrete host node (e.g. a DOM element), identified by a type name.
    HostComponent,
    /// A host text node.
    HostText,
    /// A stateful component with an update queue and optional child context.
    ClassComponent,
    /// A stateless component: props and context in, elements out.
    FunctionComponent,
    /// A grouping node with no host representation of its own.
    Fragment,
    /// Renders its children into a different host container.
    Portal,
    /// A coroutine collecting `Yield` values from its children.
    Coroutine,
    /// A coroutine whose handler has been invoked with the collected yields.
    CoroutineHandlerPhase,
    /// A yielded value inside a coroutine. Produces no host output.
    YieldComponent,
}

// =============================================================================
// Side-Effect Flags
// =============================================================================

bitflags! {
    /// Host mutations a fiber requires after diffing.
    ///
    /// Set during the begin/complete walk, consumed (and cleared) at commit.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct EffectFlags: u8 {
        /// Newly created node that must be attached to the host tree.
        const PLACEMENT = 1 << 0;
        /// Existing host node whose props (or text) changed.
        const UPDATE = 1 << 1;
        /// Node removed from the tree; host instance must be detached.
        const DELETION = 1 << 2;
        /// Update-queue callbacks must run after commit.
        const CALLBACK = 1 << 3;
    }
}

impl EffectFlags {
    /// Check if any flags are set.
    pub fn any(self) -> bool {
        !self.is_empty()
    }
}

// =============================================================================
// Priority
// =============================================================================

/// Scheduling tier for pending work. Smaller is more urgent.
///
/// `Sync` work is flushed before control returns to the caller.
/// `UserBlocking`, `Normal` and `Idle` work run inside deadline-driven
/// callbacks; a more urgent update arriving for a root abandons that root's
/// in-progress pass at the next unit boundary and restarts it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    Sync,
    UserBlocking,
    Normal,
    Idle,
}

impl Priority {
    /// Whether work at this tier preempts work at `other`.
    pub fn is_more_urgent_than(self, other: Priority) -> bool {
        self < other
    }

    /// The more urgent of two optional priorities.
    pub fn most_urgent(a: Option<Priority>, b: Option<Priority>) -> Option<Priority> {
        match (a, b) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (x, None) | (None, x) => x,
        }
    }
}

// =============================================================================
// Props / State Values
// =============================================================================

/// A single prop, state, or context value.
///
/// Values are plain data with exact equality - the reconciler only ever
/// compares them, it never interprets them.
#[derive(Debug, Clone, PartialEq)]
pub enum PropValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl From<bool> for PropValue {
    fn from(value: bool) -> Self {
        PropValue::Bool(value)
    }
}

impl From<i64> for PropValue {
    fn from(value: i64) -> Self {
        PropValue::Int(value)
    }
}

impl From<f64> for PropValue {
    fn from(value: f64) -> Self {
        PropValue::Float(value)
    }
}

impl From<&str> for PropValue {
    fn from(value: &str) -> Self {
        PropValue::Str(value.to_string())
    }
}

impl From<String> for PropValue {
    fn from(value: String) -> Self {
        PropValue::Str(value)
    }
}

/// Keyed prop/context values. `BTreeMap` keeps iteration deterministic,
/// which matters for update-queue replay.
pub type PropMap = BTreeMap<String, PropValue>;

/// Component state, same representation as props.
pub type StateMap = PropMap;

/// Shallow-merge `contribution` into `acc`: later keys overwrite earlier ones.
pub fn merge_shallow(acc: &mut PropMap, contribution: &PropMap) {
    for (key, value) in contribution {
        acc.insert(key.clone(), value.clone());
    }
}

/// Build a `PropMap` from key/value pairs. Convenience for callers and tests.
pub fn props<I, K, V>(entries: I) -> PropMap
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<PropValue>,
{
    entries
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}

// =============================================================================
// Tests
// =============================================================================
