//! Cooperative scheduling - the interruptible work loop.
//!
//! Work is performed one fiber at a time. Between units the loop polls a
//! [`Deadline`]; when the remaining budget drops to the slice floor the
//! loop returns with the next-unit pointer intact, and a later call picks
//! up exactly where it stopped. The commit phase never yields.
//!
//! Roots are drained FIFO. A pass runs at the most urgent priority the
//! root has accumulated; updates more urgent than the pass in flight
//! abandon it at the unit boundary and the root restarts from its last
//! committed state plus every pending update.

use std::mem;
use std::time::Duration;

use crate::fiber::{FiberId, RootId};
use crate::host::HostConfig;
use crate::types::Priority;

use crate::reconciler::{ReconcileError, Reconciler};

/// Below this remaining budget the loop yields rather than start another
/// unit.
pub const TIME_SLICE_FLOOR: Duration = Duration::from_millis(1);

/// Source of remaining time budget, polled between units of work.
pub trait Deadline {
    fn time_remaining(&mut self) -> Duration;
}

/// Never expires. Drives synchronous flushes.
pub struct Forever;

impl Deadline for Forever {
    fn time_remaining(&mut self) -> Duration {
        Duration::MAX
    }
}

/// Expires after a fixed number of polls. One poll happens per unit of
/// work, which makes interruption points deterministic in tests.
pub struct UnitBudget {
    pub units: usize,
}

impl UnitBudget {
    pub fn new(units: usize) -> Self {
        Self { units }
    }
}

impl Deadline for UnitBudget {
    fn time_remaining(&mut self) -> Duration {
        if self.units == 0 {
            Duration::ZERO
        } else {
            self.units -= 1;
            Duration::from_millis(5)
        }
    }
}

impl<H: HostConfig> Reconciler<H> {
    /// Run units of work until the deadline expires or nothing is left.
    /// Returns whether work remains (either an interrupted pass or more
    /// scheduled roots).
    pub fn work_until(&mut self, deadline: &mut dyn Deadline) -> Result<bool, ReconcileError> {
        loop {
            if self.session.wip_root.is_none() {
                let Some(root) = self.take_next_scheduled_root() else {
                    return Ok(false);
                };
                self.prepare_fresh_stack(root);
            }

            while let Some(unit) = self.session.next_unit_of_work {
                if deadline.time_remaining() <= TIME_SLICE_FLOOR {
                    return Ok(true);
                }
                match self.perform_unit_of_work(unit) {
                    Ok(next) => self.session.next_unit_of_work = next,
                    Err(error) => {
                        self.abandon_pass(false);
                        return Err(error);
                    }
                }
            }

            let started = self.host.now();
            self.commit_pass()?;
            log::debug!("pass committed in {:?}", self.host.now().saturating_sub(started));
        }
    }

    /// Run every pending unit for `root` to completion, right now.
    ///
    /// Any pass in flight (for this root or another) is abandoned at the
    /// unit boundary and rescheduled; its root will rebuild from the last
    /// committed tree plus all pending updates.
    pub fn flush_sync(&mut self, root: RootId) -> Result<(), ReconcileError> {
        if self.session.wip_root.is_some() {
            self.abandon_pass(true);
        }
        let has_work = self
            .roots
            .get(root)
            .is_some_and(|record| record.has_pending_work());
        if !has_work {
            return Ok(());
        }

        self.prepare_fresh_stack(root);
        while let Some(unit) = self.session.next_unit_of_work {
            match self.perform_unit_of_work(unit) {
                Ok(next) => self.session.next_unit_of_work = next,
                Err(error) => {
                    self.abandon_pass(false);
                    return Err(error);
                }
            }
        }
        self.commit_pass()
    }

    /// Begin one fiber; if it produced no child, complete upward until a
    /// sibling (or a coroutine continuation) takes over.
    pub(crate) fn perform_unit_of_work(
        &mut self,
        unit: FiberId,
    ) -> Result<Option<FiberId>, ReconcileError> {
        let next = self.begin_work(unit)?;
        match next {
            Some(child) => Ok(Some(child)),
            None => Ok(self.complete_unit_of_work(unit)),
        }
    }

    fn complete_unit_of_work(&mut self, mut fiber: FiberId) -> Option<FiberId> {
        loop {
            if let Some(continuation) = self.complete_work(fiber) {
                return Some(continuation);
            }
            let node = self.arena.get(fiber);
            if let Some(sibling) = node.sibling {
                return Some(sibling);
            }
            match node.ret {
                Some(parent) => fiber = parent,
                None => return None,
            }
        }
    }

    /// Start a fresh pass for `root`: recycle the work-in-progress root
    /// fiber, consume the root's pending element and priority, and point
    /// the loop at it.
    pub(crate) fn prepare_fresh_stack(&mut self, root_id: RootId) {
        self.session.reset();
        let (current, element, priority) = {
            let record = &mut self.roots[root_id];
            let element = record
                .pending_element
                .take()
                .or_else(|| record.last_element.clone());
            record.last_element = element.clone();
            let priority = record.pending_priority.take().unwrap_or(Priority::Normal);
            (record.current, element, priority)
        };

        let wip = self.arena.create_work_in_progress(current, None);
        self.arena.get_mut(wip).pending_element = element;

        self.session.wip_root = Some(root_id);
        self.session.wip_root_fiber = Some(wip);
        self.session.pass_priority = priority;
        self.session.next_unit_of_work = Some(wip);
        log::trace!("pass started at {:?}", priority);
    }

    /// Discard the pass in flight without touching committed fibers.
    /// With `reschedule`, the root keeps its claim at the abandoned
    /// pass's priority and will rebuild from scratch.
    pub(crate) fn abandon_pass(&mut self, reschedule: bool) {
        // Fibers mounted by the dead pass are unreachable from any
        // committed tree; give their slots back. A coroutine may have
        // already removed its yield phase, hence the liveness check.
        for id in mem::take(&mut self.session.created) {
            if self.arena.contains(id) {
                self.arena.release(id);
            }
        }
        if let Some(root_id) = self.session.wip_root {
            if reschedule {
                let pass_priority = self.session.pass_priority;
                if let Some(record) = self.roots.get_mut(root_id) {
                    record.pending_priority =
                        Priority::most_urgent(record.pending_priority, Some(pass_priority));
                }
                self.ensure_scheduled(root_id);
            }
        }
        self.session.reset();
    }

    fn take_next_scheduled_root(&mut self) -> Option<RootId> {
        while let Some(root_id) = self.schedule.pop_front() {
            let Some(record) = self.roots.get_mut(root_id) else {
                continue;
            };
            record.scheduled = false;
            if record.has_pending_work() {
                return Some(root_id);
            }
        }
        None
    }
}
