use crate::net::payload::Payload;
use crate::net::reactor::SessionHandle;
use crate::net::support::NetworkResult;
use flint::logging;
use hashbrown::HashMap;

/// Typed wire message decoding. Implementations read their fields off the
/// payload cursor and leave anything trailing unread.
pub trait Decode: Sized {
    fn decode(payload: &mut Payload) -> NetworkResult<Self>;
}

type Handler = Box<dyn Fn(&SessionHandle, Payload) + Send + Sync>;

/// Table from packet identifier to decoder + callback. Populated once at
/// startup, then only read by the reactor workers.
pub struct Dispatcher {
    table: HashMap<u32, Handler>,
    log: logging::Logger,
}

impl Dispatcher {
    #[inline]
    pub fn new<'a, L: Into<Option<&'a logging::Logger>>>(log: L) -> Dispatcher {
        Dispatcher {
            table: HashMap::new(),
            log: logging::child(log),
        }
    }

    /// Installs a typed handler: the payload is decoded into `M` and the
    /// callback invoked with the session context. A payload that fails to
    /// decode is a protocol error and disconnects the session.
    pub fn register<M, F>(&mut self, packet_id: u32, handler: F)
    where
        M: Decode + 'static,
        F: Fn(&SessionHandle, M) + Send + Sync + 'static,
    {
        let log = self.log.clone();
        self.insert(
            packet_id,
            Box::new(move |session, mut payload| match M::decode(&mut payload) {
                Ok(message) => handler(session, message),
                Err(err) => {
                    logging::warn!(log, "payload decode failed";
                                   "context" => "dispatch",
                                   "packet_id" => packet_id,
                                   "error" => ?err);
                    session.disconnect();
                }
            }),
        );
    }

    /// Installs a raw handler receiving the payload as-is.
    pub fn register_raw<F>(&mut self, packet_id: u32, handler: F)
    where
        F: Fn(&SessionHandle, Payload) + Send + Sync + 'static,
    {
        self.insert(packet_id, Box::new(handler));
    }

    fn insert(&mut self, packet_id: u32, handler: Handler) {
        if self.table.insert(packet_id, handler).is_some() {
            panic!("Duplicate handler for packet id {:#x}", packet_id);
        }
    }

    /// Invokes the handler for `packet_id`. Returns false on an unknown id;
    /// the unknown-id policy lives with the caller.
    #[inline]
    pub fn dispatch(&self, packet_id: u32, session: &SessionHandle, payload: Payload) -> bool {
        match self.table.get(&packet_id) {
            Some(handler) => {
                handler(session, payload);
                true
            }
            None => false,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.table.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_len() {
        let mut dispatcher = Dispatcher::new(None);
        dispatcher.register_raw(1, |_, _| {});
        dispatcher.register_raw(2, |_, _| {});

        assert_eq!(dispatcher.len(), 2);
    }

    #[test]
    #[should_panic(expected = "Duplicate handler for packet id 0x7")]
    fn test_duplicate_registration_panics() {
        let mut dispatcher = Dispatcher::new(None);
        dispatcher.register_raw(7, |_, _| {});
        dispatcher.register_raw(7, |_, _| {});
    }
}
