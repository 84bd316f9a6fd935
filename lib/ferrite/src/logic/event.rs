use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

type Handler = Arc<dyn Fn() + Send + Sync>;

struct EventInner {
    handlers: Mutex<Vec<(u64, Handler)>>,
    next_token: AtomicU64,
}

/// A multicast notification event. Subscriptions are tokens that
/// unsubscribe when dropped; dispatch copies the handler set first, so a
/// handler may drop its own or another subscription mid-invoke.
pub struct Event {
    inner: Arc<EventInner>,
}

impl Event {
    pub fn new() -> Event {
        Event {
            inner: Arc::new(EventInner {
                handlers: Mutex::new(Vec::new()),
                next_token: AtomicU64::new(1),
            }),
        }
    }

    /// Registers a handler; it stays subscribed for the lifetime of the
    /// returned token.
    pub fn subscribe<F: Fn() + Send + Sync + 'static>(&self, handler: F) -> Subscription {
        let token = self.inner.next_token.fetch_add(1, Ordering::AcqRel);
        self.inner.handlers.lock().push((token, Arc::new(handler)));

        Subscription {
            event: Arc::downgrade(&self.inner),
            token,
        }
    }

    /// Invokes every currently subscribed handler.
    pub fn invoke(&self) {
        let snapshot: Vec<Handler> = {
            let handlers = self.inner.handlers.lock();
            handlers.iter().map(|(_, handler)| handler.clone()).collect()
        };

        for handler in snapshot {
            handler();
        }
    }

    pub fn len(&self) -> usize {
        self.inner.handlers.lock().len()
    }
}

/// Subscription token; dropping it removes the handler.
pub struct Subscription {
    event: Weak<EventInner>,
    token: u64,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.event.upgrade() {
            inner.handlers.lock().retain(|(token, _)| *token != self.token);
        }
    }
}
