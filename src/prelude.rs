//! Traits needed to use the crate, imported anonymously
pub use crate::bus::CanBus as _;
pub use crate::csec::CommandInterface as _;
pub use crate::message::Raw as _;
pub use crate::secure::SecurityModule as _;
