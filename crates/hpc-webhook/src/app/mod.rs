//! Process lifecycle: wiring the poller and the server together and
//! supervising them until shutdown.

pub mod core;
pub mod tasks;

pub use self::core::Application;
pub use tasks::Tasks;
