pub mod bus;
pub mod event_log;

pub use bus::*;
pub use event_log::*;
