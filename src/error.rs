//! 에러 타입 정의

use thiserror::Error;

/// 릴레이로 들어온 잘못된 입력
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    #[error("room name must not be empty")]
    InvalidRoom,
}

impl ProtocolError {
    /// 클라이언트에게 내려보낼 에러 코드
    pub fn code(&self) -> &'static str {
        match self {
            ProtocolError::InvalidMessage(_) => "invalid-message",
            ProtocolError::InvalidRoom => "invalid-room",
        }
    }
}

/// 카메라 획득 실패
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("camera access denied")]
    PermissionDenied,

    #[error("no camera found")]
    NotFound,

    #[error("{0}")]
    Other(String),
}

impl CaptureError {
    /// 사용자에게 보여줄 상태 문구 (원인별로 구분)
    pub fn user_status(&self) -> String {
        match self {
            CaptureError::PermissionDenied => "Error: Camera access denied".to_string(),
            CaptureError::NotFound => "Error: No camera found".to_string(),
            CaptureError::Other(message) => format!("Error: {}", message),
        }
    }
}

/// SDP/ICE 협상 에러
#[derive(Debug, Error)]
pub enum NegotiationError {
    #[error("cannot {operation} in signaling state {state}")]
    InvalidState {
        operation: &'static str,
        state: &'static str,
    },

    #[error("malformed signal payload: {0}")]
    Malformed(String),

    #[error("peer connection is closed")]
    Closed,
}

/// 릴레이/게임 서버 소켓 에러
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("failed to connect to {url}: {source}")]
    Connect {
        url: String,
        #[source]
        source: tokio_tungstenite::tungstenite::Error,
    },

    #[error("connection closed")]
    Closed,

    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),
}

/// 게임 서버 메시지 해석 에러
#[derive(Debug, Error)]
pub enum GameProtocolError {
    #[error("action '{action}' is missing field '{field}'")]
    MissingField {
        action: String,
        field: &'static str,
    },

    #[error("action '{action}' has malformed payload: {source}")]
    Malformed {
        action: String,
        #[source]
        source: serde_json::Error,
    },
}
