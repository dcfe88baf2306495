pub mod dispatch;
pub mod events;
pub mod model;
pub mod serve;
pub mod watchdog;
