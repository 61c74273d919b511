//! Protocol implementation.

pub mod constants;
pub mod frame;

// Re-export common types
pub use frame::{Ack, Command, CommandFrame, FrameBuilder, checksum};
