use std::ops::{Deref, DerefMut};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Runs a closure when dropped, unless defused.
pub struct ScopeGuard<F: FnOnce()> {
    dropfn: Option<F>,
}

impl<F: FnOnce()> ScopeGuard<F> {
    pub fn defuse(mut self) {
        self.dropfn = None;
    }
}

impl<F: FnOnce()> Drop for ScopeGuard<F> {
    fn drop(&mut self) {
        if let Some(dropfn) = self.dropfn.take() {
            dropfn();
        }
    }
}

pub fn defer<F: FnOnce()>(dropfn: F) -> ScopeGuard<F> {
    ScopeGuard {
        dropfn: Some(dropfn),
    }
}

/// A broadcast sender that never closes and drops the oldest message when full.
pub struct BroadcastSender<T> {
    sender: async_broadcast::Sender<T>,
    _keep_alive: async_broadcast::InactiveReceiver<T>,
}

impl<T> Deref for BroadcastSender<T> {
    type Target = async_broadcast::Sender<T>;

    fn deref(&self) -> &Self::Target {
        &self.sender
    }
}

impl<T> DerefMut for BroadcastSender<T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.sender
    }
}

pub type BroadcastReceiver<T> = async_broadcast::Receiver<T>;

pub fn broadcast<T>(cap: usize) -> BroadcastSender<T> {
    let (mut sender, receiver) = async_broadcast::broadcast(cap);
    sender.set_overflow(true);
    BroadcastSender {
        sender,
        _keep_alive: receiver.deactivate(),
    }
}

/// A broadcast channel that only keeps the latest value.
pub fn watch<T>() -> BroadcastSender<T> {
    broadcast(1)
}

pub fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
