//! Smart Mafia 시그널링 릴레이와 헤드리스 플레이어 클라이언트

pub mod client;
pub mod config;
pub mod error;
pub mod handlers;
pub mod protocol;
pub mod server;
pub mod state;
