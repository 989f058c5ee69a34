use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Visible,
    Hidden,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaveDecision {
    Proceed,
    /// Someone holds a [`LeaveGuard`]; ask the user before leaving.
    ConfirmFirst,
}

/// The host page an exam session runs inside. The host reports visibility
/// changes and leave attempts here; sessions subscribe through scoped
/// registrations that detach themselves when dropped.
#[derive(Debug, Clone, Default)]
pub struct Page {
    inner: Arc<Mutex<PageInner>>,
}

#[derive(Debug)]
struct PageInner {
    next_id: u64,
    visibility: Visibility,
    visibility_listeners: HashMap<u64, mpsc::UnboundedSender<Visibility>>,
    leave_guards: HashSet<u64>,
}

impl Default for PageInner {
    fn default() -> Self {
        Self {
            next_id: 0,
            visibility: Visibility::Visible,
            visibility_listeners: HashMap::new(),
            leave_guards: HashSet::new(),
        }
    }
}

impl Page {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, PageInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn visibility(&self) -> Visibility {
        self.lock().visibility
    }

    /// Records the new visibility. Listeners hear only actual transitions.
    pub fn set_visibility(&self, visibility: Visibility) {
        let mut inner = self.lock();
        if inner.visibility == visibility {
            return;
        }
        inner.visibility = visibility;
        inner.visibility_listeners.retain(|_, sender| sender.send(visibility).is_ok());
    }

    pub fn on_visibility_change(&self) -> VisibilitySubscription {
        let (sender, receiver) = mpsc::unbounded_channel();
        let mut inner = self.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.visibility_listeners.insert(id, sender);
        VisibilitySubscription { page: self.clone(), id, receiver }
    }

    pub fn guard_leave(&self) -> LeaveGuard {
        let mut inner = self.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.leave_guards.insert(id);
        LeaveGuard { page: self.clone(), id }
    }

    pub fn request_leave(&self) -> LeaveDecision {
        if self.lock().leave_guards.is_empty() {
            LeaveDecision::Proceed
        } else {
            LeaveDecision::ConfirmFirst
        }
    }

    pub fn visibility_listener_count(&self) -> usize {
        self.lock().visibility_listeners.len()
    }

    pub fn leave_guard_count(&self) -> usize {
        self.lock().leave_guards.len()
    }
}

/// A live visibility-change listener. Dropping it deregisters.
#[derive(Debug)]
pub struct VisibilitySubscription {
    page: Page,
    id: u64,
    receiver: mpsc::UnboundedReceiver<Visibility>,
}

impl VisibilitySubscription {
    pub async fn recv(&mut self) -> Option<Visibility> {
        self.receiver.recv().await
    }
}

impl Drop for VisibilitySubscription {
    fn drop(&mut self) {
        self.page.lock().visibility_listeners.remove(&self.id);
    }
}

/// While held, leaving the page asks for confirmation. Dropping it releases.
#[derive(Debug)]
pub struct LeaveGuard {
    page: Page,
    id: u64,
}

impl Drop for LeaveGuard {
    fn drop(&mut self) {
        self.page.lock().leave_guards.remove(&self.id);
    }
}
