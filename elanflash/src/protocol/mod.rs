//! Protocol implementations.

pub mod codec;
pub mod queries;
pub mod rom;

// Re-export common types
pub use codec::{CommandFrame, decode_response};
pub use queries::{HelloPacket, InfoQuery};
