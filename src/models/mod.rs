// Data models (structs)
pub mod job;
pub mod message;

pub use job::*;
pub use message::*;
