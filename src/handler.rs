//! Single-slot callback holder
//!
//! Each event an actor can raise is a single optional callback, assigned
//! once during wiring. Invoking an empty slot is a no-op. There is no
//! multi-subscriber fan-out anywhere in the transport layer.

use std::sync::{Arc, Mutex};

/// Holder for one optional callback taking a `T`
pub struct HandlerSlot<T> {
    handler: Mutex<Option<Arc<dyn Fn(T) + Send + Sync + 'static>>>,
}

impl<T> HandlerSlot<T> {
    pub fn new() -> Self {
        Self {
            handler: Mutex::new(None),
        }
    }

    /// Assign the callback, replacing any previous one
    pub fn set<F>(&self, handler: F)
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        let mut slot = self.handler.lock().unwrap_or_else(|e| e.into_inner());
        *slot = Some(Arc::new(handler));
    }

    /// Invoke the callback if one is assigned
    pub fn invoke(&self, arg: T) {
        let handler = {
            let slot = self.handler.lock().unwrap_or_else(|e| e.into_inner());
            slot.clone()
        };
        if let Some(handler) = handler {
            handler(arg);
        }
    }
}

impl<T> Default for HandlerSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_empty_slot_is_noop() {
        let slot: HandlerSlot<u32> = HandlerSlot::new();
        slot.invoke(7);
    }

    #[test]
    fn test_set_and_invoke() {
        let slot: HandlerSlot<u32> = HandlerSlot::new();
        let total = Arc::new(AtomicUsize::new(0));

        let captured = Arc::clone(&total);
        slot.set(move |v| {
            captured.fetch_add(v as usize, Ordering::SeqCst);
        });

        slot.invoke(3);
        slot.invoke(4);
        assert_eq!(total.load(Ordering::SeqCst), 7);
    }

    #[test]
    fn test_reassignment_replaces_handler() {
        let slot: HandlerSlot<()> = HandlerSlot::new();
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        let captured = Arc::clone(&first);
        slot.set(move |_| {
            captured.fetch_add(1, Ordering::SeqCst);
        });
        let captured = Arc::clone(&second);
        slot.set(move |_| {
            captured.fetch_add(1, Ordering::SeqCst);
        });

        slot.invoke(());
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }
}
