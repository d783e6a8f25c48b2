//! 클라이언트-릴레이 메시지 프로토콜 정의

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 클라이언트 → 릴레이 메시지
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "kebab-case")]
pub enum ClientMessage {
    // Connection
    Heartbeat,

    // Room Management
    JoinRoom(String),
    LeaveRoom,

    // WebRTC Signaling (data는 릴레이가 해석하지 않음)
    Signal { to: String, data: Value },

    // Player metadata
    PlayerInfo { to: String, name: String, id: u32 },

    // ICE
    RequestIceServers,
}

/// 릴레이 → 클라이언트 메시지
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "kebab-case")]
pub enum ServerMessage {
    // Connection
    Connected { socket_id: String },
    HeartbeatAck,
    Error { code: String, message: String },

    // Room Events
    UserJoined(String),
    UserDisconnected(String),

    // WebRTC Signaling
    Signal { from: String, data: Value },

    // Player metadata
    PlayerInfo { from: String, name: String, id: u32 },

    // ICE
    IceServers { ice_servers: Vec<IceServer>, ttl: u64 },
}

/// ICE 서버 설정
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IceServer {
    pub urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}
