//! 시그널링 전용 피어 연결
//!
//! 미디어는 흘리지 않고 offer/answer 상태 기계와 이벤트 순서만 재현한다.
//! 헤드리스 플레이어가 릴레이와 세션 매니저를 실제 브라우저 없이 검증할 때 쓴다.

use crate::client::media::{MediaStream, MediaTrack, TrackKind};
use crate::client::peer::{
    IceCandidate, PeerConnection, PeerConnector, PeerEvent, PeerEventKind, PeerEventSender,
    SdpType, SessionDescription, TransportState,
};
use crate::error::NegotiationError;
use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SignalingState {
    Stable,
    HaveLocalOffer,
    HaveRemoteOffer,
}

impl SignalingState {
    fn as_str(&self) -> &'static str {
        match self {
            SignalingState::Stable => "stable",
            SignalingState::HaveLocalOffer => "have-local-offer",
            SignalingState::HaveRemoteOffer => "have-remote-offer",
        }
    }
}

struct Inner {
    signaling: SignalingState,
    local: Option<SessionDescription>,
    remote: Option<SessionDescription>,
    tracks: Vec<MediaTrack>,
    transport: TransportState,
    candidates_applied: usize,
    closed: bool,
}

/// 시그널링 전용 연결
pub struct ProbeConnection {
    remote_id: String,
    session_id: u64,
    events: PeerEventSender,
    inner: Mutex<Inner>,
}

impl ProbeConnection {
    fn new(remote_id: &str, events: PeerEventSender) -> Self {
        Self {
            remote_id: remote_id.to_string(),
            session_id: rand::random::<u32>() as u64,
            events,
            inner: Mutex::new(Inner {
                signaling: SignalingState::Stable,
                local: None,
                remote: None,
                tracks: Vec::new(),
                transport: TransportState::New,
                candidates_applied: 0,
                closed: false,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, kind: PeerEventKind) {
        let _ = self.events.send(PeerEvent {
            remote_id: self.remote_id.clone(),
            kind,
        });
    }

    pub fn candidates_applied(&self) -> usize {
        self.lock().candidates_applied
    }

    fn describe(&self, kind: SdpType, tracks: &[MediaTrack]) -> SessionDescription {
        let mut sdp = format!(
            "v=0\r\no=- {} 2 IN IP4 127.0.0.1\r\ns=smart-mafia\r\nt=0 0\r\n",
            self.session_id
        );
        for (mid, track) in tracks.iter().enumerate() {
            sdp.push_str(&format!(
                "m={} 9 UDP/TLS/RTP/SAVPF 96\r\na=mid:{}\r\na=msid:- {}\r\n",
                track.kind().as_str(),
                mid,
                track.id()
            ));
        }
        SessionDescription { kind, sdp }
    }

    /// 양쪽 설명이 모두 적용되면 연결된 것으로 본다
    fn maybe_connected(&self, inner: &mut Inner) -> bool {
        if inner.signaling == SignalingState::Stable
            && inner.local.is_some()
            && inner.remote.is_some()
            && inner.transport != TransportState::Connected
        {
            inner.transport = TransportState::Connected;
            return true;
        }
        false
    }
}

fn ensure_open(inner: &Inner) -> Result<(), NegotiationError> {
    if inner.closed {
        Err(NegotiationError::Closed)
    } else {
        Ok(())
    }
}

fn invalid(operation: &'static str, state: SignalingState) -> NegotiationError {
    NegotiationError::InvalidState {
        operation,
        state: state.as_str(),
    }
}

fn remote_tracks(sdp: &str) -> Vec<MediaTrack> {
    sdp.lines()
        .filter_map(|line| {
            if line.starts_with("m=audio") {
                Some(MediaTrack::new(TrackKind::Audio, "remote audio"))
            } else if line.starts_with("m=video") {
                Some(MediaTrack::new(TrackKind::Video, "remote video"))
            } else {
                None
            }
        })
        .collect()
}

#[async_trait]
impl PeerConnection for ProbeConnection {
    fn add_track(&self, track: MediaTrack) {
        self.lock().tracks.push(track);
    }

    async fn create_offer(&self) -> Result<SessionDescription, NegotiationError> {
        let inner = self.lock();
        ensure_open(&inner)?;
        if inner.signaling == SignalingState::HaveRemoteOffer {
            return Err(invalid("create offer", inner.signaling));
        }
        Ok(self.describe(SdpType::Offer, &inner.tracks))
    }

    async fn create_answer(&self) -> Result<SessionDescription, NegotiationError> {
        let inner = self.lock();
        ensure_open(&inner)?;
        if inner.signaling != SignalingState::HaveRemoteOffer {
            return Err(invalid("create answer", inner.signaling));
        }
        Ok(self.describe(SdpType::Answer, &inner.tracks))
    }

    async fn set_local_description(&self, description: SessionDescription) -> Result<(), NegotiationError> {
        let connected = {
            let mut inner = self.lock();
            ensure_open(&inner)?;
            inner.signaling = match (description.kind, inner.signaling) {
                (SdpType::Offer, SignalingState::Stable | SignalingState::HaveLocalOffer) => {
                    SignalingState::HaveLocalOffer
                }
                (SdpType::Answer, SignalingState::HaveRemoteOffer) => SignalingState::Stable,
                (_, state) => return Err(invalid("set local description", state)),
            };
            inner.local = Some(description);
            if inner.transport == TransportState::New {
                inner.transport = TransportState::Connecting;
            }
            self.maybe_connected(&mut inner)
        };

        // 로컬 설명이 정해진 뒤에만 후보가 생긴다
        self.emit(PeerEventKind::LocalCandidate(IceCandidate {
            candidate: format!(
                "candidate:{} 1 udp 2122260223 127.0.0.1 {} typ host",
                self.session_id,
                9000 + (self.session_id % 1000)
            ),
            sdp_mid: Some("0".to_string()),
            sdp_m_line_index: Some(0),
        }));
        if connected {
            self.emit(PeerEventKind::StateChanged(TransportState::Connected));
        }
        Ok(())
    }

    async fn set_remote_description(&self, description: SessionDescription) -> Result<(), NegotiationError> {
        let tracks = remote_tracks(&description.sdp);
        let connected = {
            let mut inner = self.lock();
            ensure_open(&inner)?;
            inner.signaling = match (description.kind, inner.signaling) {
                (SdpType::Offer, SignalingState::Stable) => SignalingState::HaveRemoteOffer,
                (SdpType::Answer, SignalingState::HaveLocalOffer) => SignalingState::Stable,
                (_, state) => return Err(invalid("set remote description", state)),
            };
            inner.remote = Some(description);
            self.maybe_connected(&mut inner)
        };

        if !tracks.is_empty() {
            self.emit(PeerEventKind::RemoteTrack(MediaStream::new(tracks)));
        }
        if connected {
            self.emit(PeerEventKind::StateChanged(TransportState::Connected));
        }
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), NegotiationError> {
        let mut inner = self.lock();
        ensure_open(&inner)?;
        if inner.remote.is_none() {
            return Err(invalid("add ICE candidate", inner.signaling));
        }
        // 빈 문자열은 end-of-candidates
        if !candidate.candidate.is_empty() && !candidate.candidate.starts_with("candidate:") {
            return Err(NegotiationError::Malformed(candidate.candidate));
        }
        inner.candidates_applied += 1;
        Ok(())
    }

    fn transport_state(&self) -> TransportState {
        self.lock().transport
    }

    fn close(&self) {
        let mut inner = self.lock();
        inner.closed = true;
        inner.transport = TransportState::Closed;
    }
}

/// ProbeConnection 생성기
#[derive(Debug, Default, Clone)]
pub struct ProbeConnector;

impl PeerConnector for ProbeConnector {
    fn connect(&self, remote_id: &str, events: PeerEventSender) -> Arc<dyn PeerConnection> {
        Arc::new(ProbeConnection::new(remote_id, events))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::unbounded_channel;

    fn video_track() -> MediaTrack {
        MediaTrack::new(TrackKind::Video, "cam")
    }

    #[tokio::test]
    async fn answer_requires_remote_offer() {
        let (tx, _rx) = unbounded_channel();
        let conn = ProbeConnection::new("remote", tx);

        let err = conn.create_answer().await.unwrap_err();
        assert!(matches!(
            err,
            NegotiationError::InvalidState {
                state: "stable",
                ..
            }
        ));
    }

    #[tokio::test]
    async fn candidates_before_remote_description_are_rejected() {
        let (tx, _rx) = unbounded_channel();
        let conn = ProbeConnection::new("remote", tx);
        let candidate = IceCandidate {
            candidate: "candidate:1 1 udp 1 127.0.0.1 9 typ host".to_string(),
            sdp_mid: None,
            sdp_m_line_index: None,
        };

        assert!(conn.add_ice_candidate(candidate).await.is_err());
        assert_eq!(conn.candidates_applied(), 0);
    }

    #[tokio::test]
    async fn full_exchange_emits_tracks_and_connects() {
        let (a_tx, mut a_rx) = unbounded_channel();
        let (b_tx, mut b_rx) = unbounded_channel();
        let a = ProbeConnection::new("b", a_tx);
        let b = ProbeConnection::new("a", b_tx);
        a.add_track(video_track());
        b.add_track(video_track());

        let offer = a.create_offer().await.unwrap();
        a.set_local_description(offer.clone()).await.unwrap();
        b.set_remote_description(offer).await.unwrap();
        let answer = b.create_answer().await.unwrap();
        b.set_local_description(answer.clone()).await.unwrap();
        a.set_remote_description(answer).await.unwrap();

        assert_eq!(a.transport_state(), TransportState::Connected);
        assert_eq!(b.transport_state(), TransportState::Connected);

        let mut a_kinds = Vec::new();
        while let Ok(event) = a_rx.try_recv() {
            assert_eq!(event.remote_id, "b");
            a_kinds.push(event.kind);
        }
        assert!(matches!(a_kinds[0], PeerEventKind::LocalCandidate(_)));
        assert!(a_kinds
            .iter()
            .any(|k| matches!(k, PeerEventKind::RemoteTrack(s) if s.tracks.len() == 1)));
        assert!(a_kinds
            .iter()
            .any(|k| matches!(k, PeerEventKind::StateChanged(TransportState::Connected))));

        assert!(b_rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn closed_connection_refuses_negotiation() {
        let (tx, _rx) = unbounded_channel();
        let conn = ProbeConnection::new("remote", tx);
        conn.close();

        assert!(matches!(conn.create_offer().await, Err(NegotiationError::Closed)));
        assert_eq!(conn.transport_state(), TransportState::Closed);
    }
}
