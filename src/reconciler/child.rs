//! Child list reconciliation.
//!
//! Matches a parent's new child elements against the fibers from the
//! previous committed pass. Keyed children match by key regardless of
//! position; unkeyed children match in order. A match with the same type
//! descriptor reuses the fiber (and its state); anything else replaces.
//! Old fibers with no match are recorded as deletions on the parent.

use std::collections::{HashMap, HashSet, VecDeque};

use smallvec::SmallVec;

use crate::element::Element;
use crate::fiber::FiberId;
use crate::host::HostConfig;
use crate::types::EffectFlags;

use super::Reconciler;

impl<H: HostConfig> Reconciler<H> {
    /// Build (or reuse) the work-in-progress children of `wip` from
    /// `elements`, linking child/sibling/ret pointers in element order.
    /// Returns the first child, which is the next unit of work.
    pub(crate) fn reconcile_children(
        &mut self,
        wip: FiberId,
        elements: Vec<Element<H>>,
    ) -> Option<FiberId> {
        let old_children: Vec<FiberId> = self
            .arena
            .get(wip)
            .alternate
            .map(|current| self.arena.children_of(current))
            .unwrap_or_default();

        // Bucket the old fibers: keyed ones by key, the rest in order.
        let mut keyed: HashMap<String, VecDeque<FiberId>> = HashMap::new();
        let mut unkeyed: VecDeque<FiberId> = VecDeque::new();
        for &old in &old_children {
            match self.arena.get(old).key.clone() {
                Some(key) => keyed.entry(key).or_default().push_back(old),
                None => unkeyed.push_back(old),
            }
        }

        let mut consumed: HashSet<FiberId> = HashSet::new();
        let mut deletions: Vec<FiberId> = Vec::new();
        let mut new_ids: SmallVec<[FiberId; 8]> = SmallVec::new();

        for element in &elements {
            let candidate = match &element.key {
                Some(key) => keyed.get_mut(key).and_then(VecDeque::pop_front),
                None => unkeyed.pop_front(),
            };

            let child_id = match candidate {
                Some(old_id) => {
                    consumed.insert(old_id);
                    let reusable = {
                        let old = self.arena.get(old_id);
                        old.key == element.key
                            && old
                                .kind
                                .as_ref()
                                .is_some_and(|kind| kind.same_kind(&element.kind))
                    };
                    if reusable {
                        self.arena.create_work_in_progress(old_id, Some(element))
                    } else {
                        // Type changed at a matched position: tear down,
                        // mount fresh.
                        deletions.push(old_id);
                        self.mount_fiber(element)
                    }
                }
                None => self.mount_fiber(element),
            };
            new_ids.push(child_id);
        }

        // Everything left over from the old list is gone.
        for &old in &old_children {
            if !consumed.contains(&old) {
                deletions.push(old);
            }
        }
        for &deleted in &deletions {
            self.arena.get_mut(deleted).effects |= EffectFlags::DELETION;
        }

        // Link the new chain.
        for (index, &id) in new_ids.iter().enumerate() {
            let fiber = self.arena.get_mut(id);
            fiber.ret = Some(wip);
            fiber.sibling = new_ids.get(index + 1).copied();
        }
        let first = new_ids.first().copied();
        let parent = self.arena.get_mut(wip);
        parent.child = first;
        parent.deletions.extend(deletions);

        first
    }

    /// Reuse the committed children of `current` as-is: the subtree did no
    /// work this pass, so its fibers and output stand. Cross-buffer
    /// adoption is read-only.
    pub(crate) fn adopt_current_children(&mut self, wip: FiberId) {
        let child = self
            .arena
            .get(wip)
            .alternate
            .and_then(|current| self.arena.get(current).child);
        self.arena.get_mut(wip).child = child;
    }

    /// Clone the committed children into fresh work-in-progress fibers so
    /// the walk can descend looking for deeper pending work. Props are
    /// carried over unchanged.
    pub(crate) fn clone_current_children(&mut self, wip: FiberId) -> Option<FiberId> {
        let old_children: Vec<FiberId> = self
            .arena
            .get(wip)
            .alternate
            .map(|current| self.arena.children_of(current))
            .unwrap_or_default();

        let mut new_ids: SmallVec<[FiberId; 8]> = SmallVec::new();
        for &old in &old_children {
            new_ids.push(self.arena.create_work_in_progress(old, None));
        }
        for (index, &id) in new_ids.iter().enumerate() {
            let fiber = self.arena.get_mut(id);
            fiber.ret = Some(wip);
            fiber.sibling = new_ids.get(index + 1).copied();
        }
        let first = new_ids.first().copied();
        self.arena.get_mut(wip).child = first;
        first
    }
}
