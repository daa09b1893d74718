//! Update queue - pending state transitions for a stateful fiber.
//!
//! Updates are appended in order and replayed FIFO into a materialized
//! state snapshot. Replay is a pure function of (previous state, ordered
//! updates, latest props), which is what makes a pass safely restartable:
//! abandoning and re-running a merge from the same inputs yields the same
//! state.
//!
//! Storage is a `Vec` rather than a hand-rolled linked list: the contract
//! (FIFO order, O(1) amortized append at the tail) is identical and the
//! representation is idiomatic.

use std::rc::Rc;

use thiserror::Error;

use crate::types::{merge_shallow, PropMap, StateMap};

// =============================================================================
// Errors
// =============================================================================

/// An update callback failed after commit.
///
/// One failing callback never suppresses the others; the first error is
/// surfaced after the whole batch has run.
#[derive(Debug, Clone, Error)]
#[error("update callback failed: {message}")]
pub struct CallbackError {
    pub message: String,
}

impl CallbackError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

// =============================================================================
// Updates
// =============================================================================

/// State contribution carried by one update.
#[derive(Clone)]
pub enum StateUpdate {
    /// A partial state object, shallow-merged into the accumulator.
    Partial(StateMap),
    /// Computed from the accumulated pending state and the latest props -
    /// not just the last committed state.
    Compute(Rc<dyn Fn(&StateMap, &PropMap) -> StateMap>),
}

/// Callback to run once after the update commits, given the committed state.
pub type UpdateCallback = Rc<dyn Fn(&StateMap) -> Result<(), CallbackError>>;

/// One queued state transition.
pub struct Update {
    state: Option<StateUpdate>,
    /// Discard everything accumulated before this node at merge time.
    is_replace: bool,
    callback: Option<UpdateCallback>,
    callback_was_called: bool,
}

// =============================================================================
// Queue
// =============================================================================

/// An appendable queue of pending state transitions.
#[derive(Default)]
pub struct UpdateQueue {
    updates: Vec<Update>,
    has_update: bool,
}

impl UpdateQueue {
    /// Build a one-node queue. `has_update` is true iff `partial` is given.
    pub fn new(partial: Option<StateUpdate>) -> Self {
        let has_update = partial.is_some();
        Self {
            updates: vec![Update {
                state: partial,
                is_replace: false,
                callback: None,
                callback_was_called: false,
            }],
            has_update,
        }
    }

    /// Append a state contribution at the tail.
    pub fn push_state(&mut self, state: StateUpdate) {
        self.updates.push(Update {
            state: Some(state),
            is_replace: false,
            callback: None,
            callback_was_called: false,
        });
        self.has_update = true;
    }

    /// Append a replacing state contribution: at merge time the accumulator
    /// is reset before this node's contribution applies.
    pub fn push_replace(&mut self, state: StateUpdate) {
        self.updates.push(Update {
            state: Some(state),
            is_replace: true,
            callback: None,
            callback_was_called: false,
        });
        self.has_update = true;
    }

    /// Attach a callback to the tail.
    ///
    /// If the tail already carries a callback, an empty node is appended
    /// first so each distinct update fires exactly one callback, in
    /// registration order.
    pub fn push_callback(&mut self, callback: UpdateCallback) {
        let needs_new_tail = self
            .updates
            .last()
            .is_none_or(|tail| tail.callback.is_some());
        if needs_new_tail {
            self.updates.push(Update {
                state: None,
                is_replace: false,
                callback: None,
                callback_was_called: false,
            });
        }
        // Unwrap is fine: a tail was just ensured.
        self.updates.last_mut().unwrap().callback = Some(callback);
    }

    /// Whether any node carries a state contribution.
    pub fn has_update(&self) -> bool {
        self.has_update
    }

    /// Whether any node carries an unfired callback.
    pub fn has_pending_callbacks(&self) -> bool {
        self.updates
            .iter()
            .any(|u| u.callback.is_some() && !u.callback_was_called)
    }

    /// Replay the queue head-to-tail into a new state snapshot.
    ///
    /// A replace node resets the accumulator to empty before its own
    /// contribution applies. Computed contributions see the accumulated
    /// pending state so far and the latest props. Contributions are
    /// shallow-merged: later keys overwrite earlier ones.
    ///
    /// Pure with respect to the queue - merging twice from the same inputs
    /// produces the same snapshot.
    pub fn merge(&self, prev_state: &StateMap, props: &PropMap) -> StateMap {
        let mut acc = prev_state.clone();
        for update in &self.updates {
            let Some(state) = &update.state else { continue };
            if update.is_replace {
                acc = StateMap::new();
            }
            match state {
                StateUpdate::Partial(partial) => merge_shallow(&mut acc, partial),
                StateUpdate::Compute(f) => {
                    let contribution = f(&acc, props);
                    merge_shallow(&mut acc, &contribution);
                }
            }
        }
        acc
    }

    /// Invoke each callback at most once, in order, with the committed
    /// state. Continues past failing callbacks; the first error is
    /// returned after the full walk.
    pub fn call_callbacks(&mut self, state: &StateMap) -> Result<(), CallbackError> {
        let mut first_error = None;
        for update in &mut self.updates {
            if update.callback_was_called {
                continue;
            }
            let Some(callback) = &update.callback else { continue };
            update.callback_was_called = true;
            if let Err(err) = callback(state) {
                if first_error.is_none() {
                    first_error = Some(err);
                }
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Drop all processed nodes. Called after commit, once state is
    /// memoized and callbacks have fired.
    pub fn clear(&mut self) {
        self.updates.clear();
        self.has_update = false;
    }
}

// =============================================================================
// Tests
// =============================================================================
