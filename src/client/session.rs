//! 피어 세션 관리
//!
//! 원격 connection id마다 최대 하나의 세션을 둔다.
//! user-joined를 받으면 offer 쪽, 모르는 id에게서 signal이 오면 answer 쪽이 된다.
//! user-disconnected를 받으면 트랙 정지, 연결 종료, 캐시 삭제 후 세션을 지운다 (재사용 없음).

use crate::client::media::MediaStream;
use crate::client::peer::{
    IceCandidate, PeerConnection, PeerConnector, PeerEvent, PeerEventKind, PeerEventSender,
    SdpType, SessionDescription, SignalData, TransportState,
};
use crate::error::NegotiationError;
use crate::protocol::{ClientMessage, IceServer, ServerMessage};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::sync::watch;

/// 플레이어 표시 정보
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerInfo {
    pub name: String,
    pub id: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Offerer,
    Answerer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    Negotiating,
    Connected,
}

/// 원격 피어 하나에 대한 세션
pub struct PeerSession {
    connection: Arc<dyn PeerConnection>,
    role: Role,
    state: PeerState,
    stream: Option<MediaStream>,
}

/// UI에 넘기는 원격 스트림 스냅샷 항목
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteStreamView {
    pub socket_id: String,
    pub stream_id: String,
    pub track_count: usize,
    pub player_name: Option<String>,
    pub player_id: Option<u32>,
}

/// 세션 매니저에 대한 외부 명령
#[derive(Debug, Clone)]
pub enum SessionCommand {
    SetLocalPlayer(PlayerInfo),
    Shutdown,
}

/// 피어 세션 레지스트리
pub struct SessionManager {
    connector: Arc<dyn PeerConnector>,
    local: MediaStream,
    relay: UnboundedSender<ClientMessage>,
    events: PeerEventSender,
    sessions: HashMap<String, PeerSession>,
    player_info: HashMap<String, PlayerInfo>,
    local_player: Option<PlayerInfo>,
    local_id: Option<String>,
    ice_servers: Vec<IceServer>,
    streams: watch::Sender<Vec<RemoteStreamView>>,
}

impl SessionManager {
    /// 세션 매니저와 연결 이벤트 수신 채널을 만든다
    pub fn new(
        connector: Arc<dyn PeerConnector>,
        local: MediaStream,
        relay: UnboundedSender<ClientMessage>,
    ) -> (Self, UnboundedReceiver<PeerEvent>) {
        let (events, events_rx) = tokio::sync::mpsc::unbounded_channel();
        let (streams, _) = watch::channel(Vec::new());
        let manager = Self {
            connector,
            local,
            relay,
            events,
            sessions: HashMap::new(),
            player_info: HashMap::new(),
            local_player: None,
            local_id: None,
            ice_servers: Vec::new(),
            streams,
        };
        (manager, events_rx)
    }

    pub fn remote_streams(&self) -> watch::Receiver<Vec<RemoteStreamView>> {
        self.streams.subscribe()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn session_state(&self, remote_id: &str) -> Option<PeerState> {
        self.sessions.get(remote_id).map(|s| s.state)
    }

    pub fn session_role(&self, remote_id: &str) -> Option<Role> {
        self.sessions.get(remote_id).map(|s| s.role)
    }

    pub fn local_id(&self) -> Option<&str> {
        self.local_id.as_deref()
    }

    pub fn ice_servers(&self) -> &[IceServer] {
        &self.ice_servers
    }

    /// 릴레이 메시지 처리
    pub async fn handle_relay(&mut self, message: ServerMessage) {
        match message {
            ServerMessage::Connected { socket_id } => {
                tracing::info!(socket_id = %socket_id, "Connected to signaling relay");
                self.local_id = Some(socket_id);
            }
            ServerMessage::UserJoined(id) => self.on_user_joined(&id).await,
            ServerMessage::Signal { from, data } => self.on_signal(&from, data).await,
            ServerMessage::UserDisconnected(id) => {
                self.on_user_disconnected(&id);
            }
            ServerMessage::PlayerInfo { from, name, id } => {
                self.on_player_info(&from, PlayerInfo { name, id });
            }
            ServerMessage::IceServers { ice_servers, .. } => {
                tracing::debug!(count = ice_servers.len(), "Received ICE servers");
                self.ice_servers = ice_servers;
            }
            ServerMessage::Error { code, message } => {
                tracing::warn!(code = %code, "Relay rejected message: {}", message);
            }
            ServerMessage::HeartbeatAck => {}
        }
    }

    /// 새 멤버 입장: 이쪽이 offer를 보낸다
    pub async fn on_user_joined(&mut self, remote_id: &str) {
        tracing::info!(remote_id = %remote_id, "User joined");

        if self.sessions.contains_key(remote_id) {
            tracing::warn!(remote_id = %remote_id, "Session already exists, ignoring join");
            return;
        }

        let connection = self.create_session(remote_id, Role::Offerer);
        match offer(connection.as_ref()).await {
            Ok(description) => {
                tracing::info!(remote_id = %remote_id, "Sending offer");
                self.send_signal(remote_id, SignalData::Description(description));
                self.send_local_player_to(remote_id);
            }
            Err(e) => tracing::error!(remote_id = %remote_id, "Error creating offer: {}", e),
        }
    }

    /// 상대에게서 온 SDP/ICE 처리
    pub async fn on_signal(&mut self, from: &str, data: Value) {
        let data: SignalData = match serde_json::from_value(data) {
            Ok(data) => data,
            Err(e) => {
                tracing::warn!(from = %from, "Ignoring malformed signal: {}", e);
                return;
            }
        };
        tracing::debug!(from = %from, kind = data.kind(), "Received signal");

        let is_offer = matches!(&data, SignalData::Description(d) if d.kind == SdpType::Offer);
        let connection = match self.sessions.get(from) {
            Some(session) => session.connection.clone(),
            None if is_offer => self.create_session(from, Role::Answerer),
            None => {
                tracing::warn!(from = %from, kind = data.kind(), "Signal for unknown peer dropped");
                return;
            }
        };

        let result = match data {
            SignalData::Description(description) if description.kind == SdpType::Offer => {
                match answer(connection.as_ref(), description).await {
                    Ok(reply) => {
                        tracing::info!(remote_id = %from, "Sending answer");
                        self.send_signal(from, SignalData::Description(reply));
                        self.send_local_player_to(from);
                        Ok(())
                    }
                    Err(e) => Err(e),
                }
            }
            SignalData::Description(description) => connection.set_remote_description(description).await,
            SignalData::Candidate(candidate) => connection.add_ice_candidate(candidate).await,
        };

        if let Err(e) = result {
            tracing::error!(remote_id = %from, "Error handling signal: {}", e);
        }
    }

    /// 상대 퇴장: 트랙 정지, 연결 종료, 캐시 삭제. 정리할 게 없으면 false
    pub fn on_user_disconnected(&mut self, remote_id: &str) -> bool {
        let had_info = self.player_info.remove(remote_id).is_some();
        let Some(session) = self.sessions.remove(remote_id) else {
            tracing::debug!(remote_id = %remote_id, "No session to tear down");
            return had_info;
        };

        if let Some(stream) = &session.stream {
            stream.stop_all();
        }
        session.connection.close();
        self.publish();

        tracing::info!(
            remote_id = %remote_id,
            remaining = self.sessions.len(),
            "Peer session closed"
        );
        true
    }

    /// 상대 플레이어 정보 수신. 스트림보다 먼저 와도 나중에 합쳐진다
    pub fn on_player_info(&mut self, from: &str, info: PlayerInfo) {
        tracing::info!(from = %from, name = %info.name, player_id = info.id, "Received player info");
        self.player_info.insert(from.to_string(), info);

        let has_stream = self
            .sessions
            .get(from)
            .map(|s| s.stream.is_some())
            .unwrap_or(false);
        if has_stream {
            self.publish();
        }
    }

    /// 게임 서버에서 번호를 받은 뒤 현재 세션 모두에게 알린다
    pub fn set_local_player(&mut self, info: PlayerInfo) {
        self.local_player = Some(info);
        let remote_ids: Vec<String> = self.sessions.keys().cloned().collect();
        for remote_id in remote_ids {
            self.send_local_player_to(&remote_id);
        }
    }

    /// 연결 이벤트 처리
    pub fn handle_peer_event(&mut self, event: PeerEvent) {
        let PeerEvent { remote_id, kind } = event;

        if !self.sessions.contains_key(&remote_id) {
            tracing::debug!(remote_id = %remote_id, "Event for closed session dropped");
            return;
        }

        match kind {
            PeerEventKind::LocalCandidate(candidate) => {
                tracing::debug!(remote_id = %remote_id, "Sending ICE candidate");
                self.send_candidate(&remote_id, candidate);
            }
            PeerEventKind::RemoteTrack(stream) => {
                tracing::info!(
                    remote_id = %remote_id,
                    tracks = stream.tracks.len(),
                    "Received remote stream"
                );
                if let Some(session) = self.sessions.get_mut(&remote_id) {
                    session.stream = Some(stream);
                    session.state = PeerState::Connected;
                }
                self.publish();
            }
            PeerEventKind::StateChanged(state) => {
                tracing::info!(remote_id = %remote_id, state = ?state, "Transport state changed");
                match state {
                    TransportState::Connected => {
                        if let Some(session) = self.sessions.get_mut(&remote_id) {
                            session.state = PeerState::Connected;
                        }
                    }
                    TransportState::Failed | TransportState::Disconnected => {
                        tracing::warn!(remote_id = %remote_id, "Peer transport degraded, not renegotiating");
                    }
                    _ => {}
                }
            }
        }
    }

    /// 모든 세션 종료
    pub fn close_all(&mut self) {
        let remote_ids: Vec<String> = self.sessions.keys().cloned().collect();
        for remote_id in remote_ids {
            self.on_user_disconnected(&remote_id);
        }
        self.player_info.clear();
    }

    /// 단일 태스크 이벤트 루프. Shutdown 명령이나 릴레이 종료 시 끝난다
    pub async fn run(
        mut self,
        mut relay_rx: UnboundedReceiver<ServerMessage>,
        mut events_rx: UnboundedReceiver<PeerEvent>,
        mut commands_rx: UnboundedReceiver<SessionCommand>,
    ) {
        loop {
            tokio::select! {
                message = relay_rx.recv() => match message {
                    Some(message) => self.handle_relay(message).await,
                    None => {
                        tracing::warn!("Signaling relay stream ended");
                        break;
                    }
                },
                Some(event) = events_rx.recv() => self.handle_peer_event(event),
                command = commands_rx.recv() => match command {
                    Some(SessionCommand::SetLocalPlayer(info)) => self.set_local_player(info),
                    Some(SessionCommand::Shutdown) | None => break,
                },
            }
        }

        tracing::info!("Cleaning up peer sessions");
        self.close_all();
    }

    fn create_session(&mut self, remote_id: &str, role: Role) -> Arc<dyn PeerConnection> {
        tracing::info!(remote_id = %remote_id, role = ?role, "Creating peer connection");

        let connection = self.connector.connect(remote_id, self.events.clone());
        for track in &self.local.tracks {
            tracing::debug!(remote_id = %remote_id, kind = track.kind().as_str(), "Adding local track");
            connection.add_track(track.clone());
        }

        self.sessions.insert(
            remote_id.to_string(),
            PeerSession {
                connection: connection.clone(),
                role,
                state: PeerState::Negotiating,
                stream: None,
            },
        );
        connection
    }

    fn send_signal(&self, to: &str, data: SignalData) {
        match serde_json::to_value(&data) {
            Ok(data) => {
                let _ = self.relay.send(ClientMessage::Signal {
                    to: to.to_string(),
                    data,
                });
            }
            Err(e) => tracing::error!("Failed to encode signal: {}", e),
        }
    }

    fn send_candidate(&self, to: &str, candidate: IceCandidate) {
        self.send_signal(to, SignalData::Candidate(candidate));
    }

    fn send_local_player_to(&self, to: &str) {
        if let Some(info) = &self.local_player {
            let _ = self.relay.send(ClientMessage::PlayerInfo {
                to: to.to_string(),
                name: info.name.clone(),
                id: info.id,
            });
        }
    }

    /// 매번 새 스냅샷을 만든다 (공유 가변 구조를 넘기지 않음)
    fn publish(&self) {
        let mut views: Vec<RemoteStreamView> = self
            .sessions
            .iter()
            .filter_map(|(remote_id, session)| {
                let stream = session.stream.as_ref()?;
                let info = self.player_info.get(remote_id);
                Some(RemoteStreamView {
                    socket_id: remote_id.clone(),
                    stream_id: stream.id.clone(),
                    track_count: stream.tracks.len(),
                    player_name: info.map(|i| i.name.clone()),
                    player_id: info.map(|i| i.id),
                })
            })
            .collect();
        views.sort_by(|a, b| a.socket_id.cmp(&b.socket_id));
        self.streams.send_replace(views);
    }
}

async fn offer(connection: &dyn PeerConnection) -> Result<SessionDescription, NegotiationError> {
    let description = connection.create_offer().await?;
    connection.set_local_description(description.clone()).await?;
    Ok(description)
}

async fn answer(
    connection: &dyn PeerConnection,
    remote: SessionDescription,
) -> Result<SessionDescription, NegotiationError> {
    connection.set_remote_description(remote).await?;
    let description = connection.create_answer().await?;
    connection.set_local_description(description.clone()).await?;
    Ok(description)
}
