//! Engine - the socket fingerprinting facade handed to module runners

mod engine;

pub use engine::SocketEngine;
