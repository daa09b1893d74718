//! Fiber-keyed value cursor - restorable context for the iterative walk.
//!
//! The begin/complete traversal is recursive in shape but iterative in
//! implementation, so nested context cannot live on the call stack. A
//! `ValueCursor` holds the current value plus a stack of saved values, each
//! keyed by the fiber that pushed it. Push and pop must nest exactly with
//! the traversal; a mismatched pop means the walk itself is broken, so it
//! is treated as a fatal programming error rather than a recoverable
//! condition.

use crate::fiber::FiberId;

/// A push/pop value stack keyed by the pushing fiber.
#[derive(Debug)]
pub struct ValueCursor<T> {
    current: T,
    saved: Vec<(FiberId, T)>,
}

impl<T> ValueCursor<T> {
    /// Create a cursor holding `initial` with an empty save stack.
    pub fn new(initial: T) -> Self {
        Self {
            current: initial,
            saved: Vec::new(),
        }
    }

    /// The value at the top of the cursor.
    pub fn current(&self) -> &T {
        &self.current
    }

    /// Save the current value under `fiber` and make `value` current.
    pub fn push(&mut self, value: T, fiber: FiberId) {
        let previous = std::mem::replace(&mut self.current, value);
        self.saved.push((fiber, previous));
    }

    /// Restore the value saved by `fiber`'s push.
    ///
    /// Panics if the stack is empty or the top frame was pushed by a
    /// different fiber - both indicate corrupted traversal nesting.
    pub fn pop(&mut self, fiber: FiberId) {
        let Some((owner, previous)) = self.saved.pop() else {
            panic!("cursor underflow: pop with empty stack");
        };
        assert!(
            owner == fiber,
            "mismatched cursor pop: top frame belongs to {owner:?}, popped by {fiber:?}"
        );
        self.current = previous;
    }

    /// Number of saved frames.
    pub fn depth(&self) -> usize {
        self.saved.len()
    }

    /// Whether no fiber has pushed.
    pub fn is_empty(&self) -> bool {
        self.saved.is_empty()
    }

    /// Drop all saved frames and make `initial` current again.
    /// Used when a pass is abandoned mid-tree.
    pub fn reset(&mut self, initial: T) {
        self.saved.clear();
        self.current = initial;
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use slotmap::SlotMap;

    fn two_fibers() -> (FiberId, FiberId) {
        let mut keys: SlotMap<FiberId, ()> = SlotMap::with_key();
        (keys.insert(()), keys.insert(()))
    }

    #[test]
    fn test_push_pop_restores() {
        let (a, b) = two_fibers();
        let mut cursor = ValueCursor::new(0);

        cursor.push(1, a);
        cursor.push(2, b);
        assert_eq!(*cursor.current(), 2);

        cursor.pop(b);
        assert_eq!(*cursor.current(), 1);
        cursor.pop(a);
        assert_eq!(*cursor.current(), 0);
        assert!(cursor.is_empty());
    }

    #[test]
    #[should_panic(expected = "mismatched cursor pop")]
    fn test_out_of_order_pop_panics() {
        let (a, b) = two_fibers();
        let mut cursor = ValueCursor::new(0);
        cursor.push(1, a);
        cursor.push(2, b);
        cursor.pop(a);
    }

    #[test]
    #[should_panic(expected = "cursor underflow")]
    fn test_underflow_panics() {
        let (a, _) = two_fibers();
        let mut cursor: ValueCursor<i32> = ValueCursor::new(0);
        cursor.pop(a);
    }

    #[test]
    fn test_reset_clears_saved() {
        let (a, _) = two_fibers();
        let mut cursor = ValueCursor::new(0);
        cursor.push(5, a);
        cursor.reset(0);
        assert!(cursor.is_empty());
        assert_eq!(*cursor.current(), 0);
    }
}
