//! Event loop, tick scheduling and time sources.

pub mod clock;
pub mod session;
pub mod tick;

pub use clock::{Clock, SystemClock};
pub use session::{Session, SessionError};
pub use tick::{TickGrid, align_up};
