//! Hosting-context event target.
//!
//! The host window is shared by every editor mounted in it, so listeners are
//! acquired as guards: registering returns a [`ListenerGuard`] and dropping
//! the guard removes the listener. Dispatch is synchronous and runs listeners
//! in registration order.

use serde_json::Value;
use std::cell::RefCell;
use std::rc::{Rc, Weak};

/// A keyboard event as seen by the host window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPress {
    pub key: String,
    pub ctrl: bool,
    pub meta: bool,
}

impl KeyPress {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            ctrl: false,
            meta: false,
        }
    }

    pub fn with_ctrl(mut self) -> Self {
        self.ctrl = true;
        self
    }

    pub fn with_meta(mut self) -> Self {
        self.meta = true;
        self
    }
}

type MessageListener = Rc<RefCell<dyn FnMut(&Value)>>;
/// Returns true when the listener prevented the default action.
type KeyListener = Rc<RefCell<dyn FnMut(&KeyPress) -> bool>>;

#[derive(Default)]
struct Listeners {
    next_id: u64,
    message: Vec<(u64, MessageListener)>,
    keydown: Vec<(u64, KeyListener)>,
}

/// The host window's `message` and `keydown` event target.
#[derive(Clone, Default)]
pub struct HostContext {
    inner: Rc<RefCell<Listeners>>,
}

impl HostContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a `message` listener for as long as the guard lives.
    #[must_use = "the listener is removed when the guard is dropped"]
    pub fn on_message(&self, listener: impl FnMut(&Value) + 'static) -> ListenerGuard {
        let mut inner = self.inner.borrow_mut();
        let id = inner.next_id;
        inner.next_id += 1;
        let listener: MessageListener = Rc::new(RefCell::new(listener));
        inner.message.push((id, listener));
        ListenerGuard::new(&self.inner, EventKind::Message, id)
    }

    /// Register a `keydown` listener for as long as the guard lives.
    #[must_use = "the listener is removed when the guard is dropped"]
    pub fn on_keydown(&self, listener: impl FnMut(&KeyPress) -> bool + 'static) -> ListenerGuard {
        let mut inner = self.inner.borrow_mut();
        let id = inner.next_id;
        inner.next_id += 1;
        let listener: KeyListener = Rc::new(RefCell::new(listener));
        inner.keydown.push((id, listener));
        ListenerGuard::new(&self.inner, EventKind::KeyDown, id)
    }

    /// Deliver a cross-context message to every `message` listener.
    pub fn post_message(&self, message: &Value) {
        // Snapshot so listeners may register or drop guards while running.
        let listeners: Vec<MessageListener> = self
            .inner
            .borrow()
            .message
            .iter()
            .map(|(_, listener)| Rc::clone(listener))
            .collect();
        for listener in listeners {
            (listener.borrow_mut())(message);
        }
    }

    /// Deliver a key press. Returns true if any listener prevented the default action.
    pub fn key_down(&self, key: &KeyPress) -> bool {
        let listeners: Vec<KeyListener> = self
            .inner
            .borrow()
            .keydown
            .iter()
            .map(|(_, listener)| Rc::clone(listener))
            .collect();
        let mut prevented = false;
        for listener in listeners {
            prevented |= (listener.borrow_mut())(key);
        }
        prevented
    }

    pub fn message_listener_count(&self) -> usize {
        self.inner.borrow().message.len()
    }

    pub fn keydown_listener_count(&self) -> usize {
        self.inner.borrow().keydown.len()
    }
}

#[derive(Debug, Clone, Copy)]
enum EventKind {
    Message,
    KeyDown,
}

/// Removes its listener from the host when dropped.
pub struct ListenerGuard {
    host: Weak<RefCell<Listeners>>,
    kind: EventKind,
    id: u64,
}

impl ListenerGuard {
    fn new(host: &Rc<RefCell<Listeners>>, kind: EventKind, id: u64) -> Self {
        Self {
            host: Rc::downgrade(host),
            kind,
            id,
        }
    }
}

impl Drop for ListenerGuard {
    fn drop(&mut self) {
        let Some(host) = self.host.upgrade() else {
            return;
        };
        let Ok(mut listeners) = host.try_borrow_mut() else {
            return;
        };
        match self.kind {
            EventKind::Message => listeners.message.retain(|(id, _)| *id != self.id),
            EventKind::KeyDown => listeners.keydown.retain(|(id, _)| *id != self.id),
        }
    }
}
