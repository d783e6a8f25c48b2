//! 피어 연결 추상화
//!
//! 실제 WebRTC 스택(브라우저 RTCPeerConnection 등)은 이 트레이트 뒤에 숨긴다.
//! 연결 쪽에서 발생하는 이벤트(ICE 후보, 원격 트랙, 전송 상태)는 채널로 세션 매니저에 전달된다.

use crate::client::media::{MediaStream, MediaTrack};
use crate::error::NegotiationError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
}

/// SDP 세션 설명
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpType,
    pub sdp: String,
}

/// ICE 후보
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(rename = "sdpMid", default)]
    pub sdp_mid: Option<String>,
    #[serde(rename = "sdpMLineIndex", default)]
    pub sdp_m_line_index: Option<u16>,
}

/// signal 메시지의 data (릴레이는 해석하지 않고 클라이언트만 해석)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SignalData {
    Description(SessionDescription),
    Candidate(IceCandidate),
}

impl SignalData {
    pub fn kind(&self) -> &'static str {
        match self {
            SignalData::Description(d) if d.kind == SdpType::Offer => "offer",
            SignalData::Description(_) => "answer",
            SignalData::Candidate(_) => "ice-candidate",
        }
    }
}

/// 하부 전송 계층 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

/// 연결에서 올라오는 이벤트
#[derive(Debug, Clone)]
pub struct PeerEvent {
    pub remote_id: String,
    pub kind: PeerEventKind,
}

#[derive(Debug, Clone)]
pub enum PeerEventKind {
    LocalCandidate(IceCandidate),
    RemoteTrack(MediaStream),
    StateChanged(TransportState),
}

pub type PeerEventSender = UnboundedSender<PeerEvent>;

/// 원격 피어 하나와의 미디어 연결
#[async_trait]
pub trait PeerConnection: Send + Sync {
    fn add_track(&self, track: MediaTrack);
    async fn create_offer(&self) -> Result<SessionDescription, NegotiationError>;
    async fn create_answer(&self) -> Result<SessionDescription, NegotiationError>;
    async fn set_local_description(&self, description: SessionDescription) -> Result<(), NegotiationError>;
    async fn set_remote_description(&self, description: SessionDescription) -> Result<(), NegotiationError>;
    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), NegotiationError>;
    fn transport_state(&self) -> TransportState;
    fn close(&self);
}

/// 피어 연결 생성기
pub trait PeerConnector: Send + Sync {
    fn connect(&self, remote_id: &str, events: PeerEventSender) -> Arc<dyn PeerConnection>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn browser_offer_parses_as_description() {
        let data: SignalData =
            serde_json::from_value(json!({ "type": "offer", "sdp": "v=0\r\n" })).unwrap();
        assert_eq!(data.kind(), "offer");
    }

    #[test]
    fn browser_candidate_parses_with_extra_fields() {
        let data: SignalData = serde_json::from_value(json!({
            "candidate": "candidate:1 1 udp 2122260223 192.168.1.2 54321 typ host",
            "sdpMid": "0",
            "sdpMLineIndex": 0,
            "usernameFragment": "abcd"
        }))
        .unwrap();
        match data {
            SignalData::Candidate(c) => {
                assert_eq!(c.sdp_mid.as_deref(), Some("0"));
                assert_eq!(c.sdp_m_line_index, Some(0));
            }
            other => panic!("unexpected data: {:?}", other),
        }
    }

    #[test]
    fn rollback_description_is_rejected() {
        let parsed = serde_json::from_value::<SignalData>(json!({ "type": "rollback" }));
        assert!(parsed.is_err());
    }
}
