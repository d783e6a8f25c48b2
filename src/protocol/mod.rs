//! 와이어 프로토콜

pub mod game;
pub mod messages;

pub use messages::*;
