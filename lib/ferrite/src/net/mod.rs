pub mod buffer;
pub mod dispatch;
pub mod frame;
pub mod payload;
pub mod reactor;
pub mod session;
pub mod support;

pub use self::reactor::SessionHandle;
