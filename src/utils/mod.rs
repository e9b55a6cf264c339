pub mod clock;
pub mod config_loader;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config_loader::*;
