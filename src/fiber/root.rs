//! Fiber roots - one per independently rendered tree.

use slotmap::new_key_type;

use super::FiberId;
use crate::element::Element;
use crate::host::HostConfig;
use crate::types::Priority;

new_key_type! {
    /// Handle to a fiber root, returned by `create_container`.
    pub struct RootId;
}

/// Record for one host container being rendered into.
///
/// Owns the currently committed root fiber and tracks outstanding update
/// priority. Created when a container is first rendered; persists until
/// explicitly unmounted.
pub struct FiberRoot<H: HostConfig> {
    /// The container this root renders into.
    pub container: H::Container,
    /// The committed, host-visible root fiber.
    pub current: FiberId,
    /// Element tree waiting to be rendered, from the latest
    /// `update_container`.
    pub pending_element: Option<Element<H>>,
    /// Element rendered by the last completed pass. State-only updates
    /// re-render this tree.
    pub last_element: Option<Element<H>>,
    /// Most urgent outstanding update for this root.
    pub pending_priority: Option<Priority>,
    /// A scheduling callback is already outstanding for this root.
    pub scheduled: bool,
}

impl<H: HostConfig> FiberRoot<H> {
    pub fn new(container: H::Container, current: FiberId) -> Self {
        Self {
            container,
            current,
            pending_element: None,
            last_element: None,
            pending_priority: None,
            scheduled: false,
        }
    }

    /// Whether this root has anything left to render.
    pub fn has_pending_work(&self) -> bool {
        self.pending_element.is_some() || self.pending_priority.is_some()
    }
}
