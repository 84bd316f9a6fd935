#![allow(clippy::len_without_is_empty)]
#![allow(clippy::new_without_default)]

//! Core runtime for a session-oriented game server: a non-blocking network
//! reactor with length-prefixed framing and pooled payload buffers, a
//! cooperative logic runtime built from per-object job queues and fixed-step
//! logic threads, and a grid based area-of-interest system.

pub mod logic;
pub mod net;

pub mod prelude {
    pub use crate::logic::aoi::{AoiDelta, AoiGrid};
    pub use crate::logic::component::{Component, ComponentSet};
    pub use crate::logic::event::{Event, Subscription};
    pub use crate::logic::job::{Job, JobQueue, JobRunner};
    pub use crate::logic::object::{GameLogic, GameObject, ObjectRef, Sn};
    pub use crate::logic::registry::ObjectRegistry;
    pub use crate::logic::runtime::{Runtime, RuntimeConfig};
    pub use crate::logic::scene::{Scene, SceneConfig};
    pub use crate::logic::thread::{LogicHandle, LogicThread};
    pub use crate::net::dispatch::{Decode, Dispatcher};
    pub use crate::net::payload::Payload;
    pub use crate::net::reactor::{NetEvents, NetStats, Reactor, ReactorConfig};
    pub use crate::net::session::SessionId;
    pub use crate::net::support::{ErrorType, NetworkError, NetworkResult};
    pub use crate::net::SessionHandle;
}
