//! 게임 서버 연결
//!
//! 끊기면 지수 backoff로 한 번씩 재접속을 예약한다. 연속 실패가 한도에 닿으면 멈춘다.
//! setup은 링크 수명 동안 한 번만 보낸다.

use crate::client::game_state::{Effect, GameState};
use crate::client::status::StatusLine;
use crate::config::ReconnectPolicy;
use crate::error::LinkError;
use crate::protocol::game::{GameMessage, OutboundAction, ServerEvent};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message, MaybeTlsStream, WebSocketStream};

type GameSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// 재접속 지연 계산기
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: ReconnectPolicy,
    attempts: u32,
}

impl Backoff {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            attempts: 0,
        }
    }

    /// 다음 시도까지의 지연. 한도를 넘으면 None
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempts >= self.policy.max_attempts {
            return None;
        }
        let factor = 1u32.checked_shl(self.attempts).unwrap_or(u32::MAX);
        let delay = self
            .policy
            .base
            .checked_mul(factor)
            .unwrap_or(self.policy.max)
            .min(self.policy.max);
        self.attempts += 1;
        Some(delay)
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
    }
}

enum SessionEnd {
    Closed,
    Shutdown,
}

/// 게임 서버 링크 핸들
pub struct GameLink {
    commands: UnboundedSender<OutboundAction>,
    state: watch::Receiver<GameState>,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl GameLink {
    pub fn spawn(url: String, player_name: String, policy: ReconnectPolicy, status: StatusLine) -> Self {
        let (commands, commands_rx) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(GameState::default());
        let (shutdown, shutdown_rx) = oneshot::channel();

        let worker = Worker {
            url,
            player_name,
            status,
            state: GameState::default(),
            state_tx,
            commands: commands_rx,
            has_setup: false,
        };
        let task = tokio::spawn(worker.run(policy, shutdown_rx));

        Self {
            commands,
            state,
            shutdown,
            task,
        }
    }

    /// 액션 전송 요청. 연결이 없으면 링크가 버린다
    pub fn send(&self, action: OutboundAction) {
        let _ = self.commands.send(action);
    }

    pub fn commands(&self) -> UnboundedSender<OutboundAction> {
        self.commands.clone()
    }

    pub fn state(&self) -> watch::Receiver<GameState> {
        self.state.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// 예약된 재접속을 취소하고 소켓을 닫는다
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(());
        if let Err(e) = self.task.await {
            tracing::error!("Game link task failed: {}", e);
        }
    }
}

struct Worker {
    url: String,
    player_name: String,
    status: StatusLine,
    state: GameState,
    state_tx: watch::Sender<GameState>,
    commands: UnboundedReceiver<OutboundAction>,
    has_setup: bool,
}

impl Worker {
    async fn run(mut self, policy: ReconnectPolicy, mut shutdown: oneshot::Receiver<()>) {
        let mut backoff = Backoff::new(policy);

        loop {
            tracing::info!(url = %self.url, attempt = backoff.attempts(), "Connecting to game server");

            let connected = tokio::select! {
                result = connect_async(self.url.as_str()) => result,
                _ = &mut shutdown => break,
            };

            match connected {
                Ok((ws_stream, _)) => {
                    backoff.reset();
                    tracing::info!("Connected to game server");
                    self.status.set("Connected to game server!");

                    match self.session(ws_stream, &mut shutdown).await {
                        SessionEnd::Shutdown => break,
                        SessionEnd::Closed => {
                            self.status.set("Disconnected from game server");
                            self.state.reset_for_reconnect();
                            self.publish();
                        }
                    }
                }
                Err(e) => {
                    let error = LinkError::Connect {
                        url: self.url.clone(),
                        source: e,
                    };
                    tracing::warn!("{}", error);
                    self.status.set("Error: Failed to connect to game server");
                }
            }

            let Some(delay) = backoff.next_delay() else {
                tracing::error!(attempts = backoff.attempts(), "Giving up on game server");
                self.status.set("Game server unreachable. Restart to retry.");
                break;
            };

            tracing::info!(delay_ms = delay.as_millis() as u64, "Scheduling game server reconnect");
            if !self.wait_disconnected(delay, &mut shutdown).await {
                break;
            }
        }

        tracing::info!("Game link stopped");
    }

    /// 연결 하나의 읽기/명령 루프
    async fn session(
        &mut self,
        ws_stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
        shutdown: &mut oneshot::Receiver<()>,
    ) -> SessionEnd {
        let (mut write, mut read) = ws_stream.split();

        if !self.has_setup {
            let setup = OutboundAction::Setup {
                name: self.player_name.clone(),
            };
            if let Err(e) = send_action(&mut write, &setup).await {
                tracing::warn!("Failed to send setup: {}", e);
                return SessionEnd::Closed;
            }
            tracing::info!(name = %self.player_name, "Sent setup");
            self.has_setup = true;
        }

        loop {
            tokio::select! {
                frame = read.next() => match frame {
                    Some(Ok(Message::Text(text))) => {
                        for action in self.handle_frame(&text) {
                            if let Err(e) = send_action(&mut write, &action).await {
                                tracing::warn!("Failed to send {}: {}", action.to_message().action, e);
                                return SessionEnd::Closed;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        tracing::info!("Game server closed the connection");
                        return SessionEnd::Closed;
                    }
                    Some(Err(e)) => {
                        tracing::warn!("Game server read error: {}", e);
                        return SessionEnd::Closed;
                    }
                    Some(Ok(_)) => {}
                },
                command = self.commands.recv() => match command {
                    Some(action) => {
                        self.note_command(&action);
                        if let Err(e) = send_action(&mut write, &action).await {
                            tracing::warn!("Failed to send {}: {}", action.to_message().action, e);
                            return SessionEnd::Closed;
                        }
                    }
                    None => return SessionEnd::Shutdown,
                },
                _ = &mut *shutdown => {
                    let _ = write.send(Message::Close(None)).await;
                    return SessionEnd::Shutdown;
                }
            }
        }
    }

    /// 재접속 대기. 그동안 들어온 명령은 버린다. 종료 요청이면 false
    async fn wait_disconnected(&mut self, delay: Duration, shutdown: &mut oneshot::Receiver<()>) -> bool {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                _ = &mut sleep => return true,
                _ = &mut *shutdown => return false,
                command = self.commands.recv() => match command {
                    Some(action) => {
                        self.note_command(&action);
                        tracing::debug!(action = %action.to_message().action, "Not connected, dropping command");
                    }
                    None => return false,
                },
            }
        }
    }

    fn note_command(&mut self, action: &OutboundAction) {
        if let OutboundAction::Head(position) = action {
            self.state.set_head(*position);
            self.publish();
        }
    }

    fn handle_frame(&mut self, text: &str) -> Vec<OutboundAction> {
        let message: GameMessage = match serde_json::from_str(text) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!("Ignoring unparseable game frame: {}", e);
                return Vec::new();
            }
        };
        tracing::debug!(action = %message.action, "Received game message");

        let event = match ServerEvent::parse(message) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!("Ignoring game message: {}", e);
                return Vec::new();
            }
        };

        let mut outbound = Vec::new();
        for effect in self.state.apply(event) {
            match effect {
                Effect::Send(action) => outbound.push(action),
                Effect::Status(status) => self.status.set(status),
                Effect::PlayerIdAssigned(id) => {
                    tracing::info!(player_id = id, "Local player id assigned");
                }
            }
        }
        self.publish();
        outbound
    }

    fn publish(&self) {
        self.state_tx.send_replace(self.state.clone());
    }
}

async fn send_action(write: &mut GameSink, action: &OutboundAction) -> Result<(), LinkError> {
    let text = serde_json::to_string(&action.to_message())?;
    write.send(Message::Text(text)).await.map_err(|_| LinkError::Closed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::game::HeadPosition;
    use serde_json::{json, Value};
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    fn policy(base_ms: u64, max_ms: u64, max_attempts: u32) -> ReconnectPolicy {
        ReconnectPolicy {
            base: Duration::from_millis(base_ms),
            max: Duration::from_millis(max_ms),
            max_attempts,
        }
    }

    async fn next_json<S>(socket: &mut WebSocketStream<S>) -> Value
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
    {
        loop {
            let frame = tokio::time::timeout(Duration::from_secs(5), socket.next())
                .await
                .expect("timed out waiting for frame")
                .expect("socket closed")
                .expect("read error");
            if let Message::Text(text) = frame {
                return serde_json::from_str(&text).unwrap();
            }
        }
    }

    #[test]
    fn backoff_doubles_up_to_cap() {
        let mut backoff = Backoff::new(policy(2000, 30_000, 10));
        let delays: Vec<u64> = std::iter::from_fn(|| backoff.next_delay())
            .map(|d| d.as_millis() as u64)
            .collect();

        assert_eq!(
            delays,
            vec![2000, 4000, 8000, 16_000, 30_000, 30_000, 30_000, 30_000, 30_000, 30_000]
        );
    }

    #[test]
    fn backoff_reset_restarts_sequence() {
        let mut backoff = Backoff::new(policy(100, 1000, 3));
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();

        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(100)));
        assert_eq!(backoff.attempts(), 1);
    }

    #[test]
    fn backoff_survives_large_attempt_counts() {
        let mut backoff = Backoff::new(policy(1000, 5000, 100));
        let last = std::iter::from_fn(|| backoff.next_delay()).last();
        assert_eq!(last, Some(Duration::from_millis(5000)));
    }

    #[tokio::test]
    async fn setup_is_sent_once_across_reconnects() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}/ws", listener.local_addr().unwrap());
        let status = StatusLine::new();
        let link = GameLink::spawn(url, "Alice".to_string(), policy(10, 50, 5), status.clone());
        let mut state = link.state();

        let (stream, _) = listener.accept().await.unwrap();
        let mut first = accept_async(stream).await.unwrap();
        assert_eq!(next_json(&mut first).await, json!({ "action": "setup", "target": "Alice" }));

        first
            .send(Message::Text(json!({ "action": "id_registered", "player": 3 }).to_string()))
            .await
            .unwrap();
        state.wait_for(|s| s.player_id == Some(3)).await.unwrap();
        assert!(status.current().contains("Player 3"));

        first.close(None).await.unwrap();
        drop(first);

        let (stream, _) = listener.accept().await.unwrap();
        let mut second = accept_async(stream).await.unwrap();
        second
            .send(Message::Text(json!({ "action": "heads_down" }).to_string()))
            .await
            .unwrap();

        // setup이 다시 오지 않았다면 첫 프레임은 머리 위치 응답이다
        assert_eq!(next_json(&mut second).await, json!({ "action": "headDown", "target": null }));
        assert_eq!(link.state().borrow().player_id, Some(3));

        link.shutdown().await;
    }

    #[tokio::test]
    async fn commands_while_disconnected_are_dropped_and_one_reconnect_scheduled() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}/ws", listener.local_addr().unwrap());
        let status = StatusLine::new();
        let mut updates = status.subscribe();
        let link = GameLink::spawn(url, "Dana".to_string(), policy(500, 2000, 5), status.clone());
        let mut state = link.state();

        let (stream, _) = listener.accept().await.unwrap();
        let mut first = accept_async(stream).await.unwrap();
        next_json(&mut first).await;
        first.close(None).await.unwrap();
        drop(first);

        tokio::time::timeout(
            Duration::from_secs(5),
            updates.wait_for(|s| s == "Disconnected from game server"),
        )
        .await
        .expect("disconnect not noticed")
        .unwrap();

        // 핸드셰이크는 accept_async 전에는 끝날 수 없으므로 모두 대기 중에 처리된다
        link.send(OutboundAction::Ready);
        link.send(OutboundAction::VoiceCommand(1));
        link.send(OutboundAction::Head(HeadPosition::Up));
        state.wait_for(|s| s.head == HeadPosition::Up).await.unwrap();

        let (stream, _) = listener.accept().await.unwrap();
        let mut second = accept_async(stream).await.unwrap();
        second
            .send(Message::Text(json!({ "action": "heads_down" }).to_string()))
            .await
            .unwrap();

        // ready나 voiceCommand가 먼저 오면 끊긴 동안의 명령이 새어 나간 것
        assert_eq!(next_json(&mut second).await, json!({ "action": "headUp", "target": null }));

        // 두 번째 재접속 시도는 없어야 한다
        let extra = tokio::time::timeout(Duration::from_millis(1500), listener.accept()).await;
        assert!(extra.is_err(), "unexpected extra reconnect attempt");

        link.shutdown().await;
    }

    #[tokio::test]
    async fn secure_url_attempts_tls_handshake() {
        use tokio_tungstenite::tungstenite::error::{Error as WsError, UrlError};

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            if let Ok((stream, _)) = listener.accept().await {
                drop(stream);
            }
        });

        let err = connect_async(format!("wss://{}/ws", addr)).await.unwrap_err();

        assert!(
            !matches!(err, WsError::Url(UrlError::TlsFeatureNotEnabled)),
            "wss:// rejected without attempting TLS: {}",
            err
        );
    }

    #[tokio::test]
    async fn commands_reach_connected_server() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}/ws", listener.local_addr().unwrap());
        let link = GameLink::spawn(url, "Bob".to_string(), policy(10, 50, 5), StatusLine::new());

        let (stream, _) = listener.accept().await.unwrap();
        let mut server = accept_async(stream).await.unwrap();
        next_json(&mut server).await;

        link.send(OutboundAction::Head(HeadPosition::Down));
        link.send(OutboundAction::VoiceCommand(3));

        assert_eq!(next_json(&mut server).await, json!({ "action": "headDown", "target": null }));
        assert_eq!(next_json(&mut server).await, json!({ "action": "voiceCommand", "target": 3 }));

        link.shutdown().await;
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}/ws", listener.local_addr().unwrap());
        drop(listener);

        let status = StatusLine::new();
        let mut updates = status.subscribe();
        let link = GameLink::spawn(url, "Carol".to_string(), policy(5, 10, 2), status.clone());

        tokio::time::timeout(
            Duration::from_secs(5),
            updates.wait_for(|s| s == "Game server unreachable. Restart to retry."),
        )
        .await
        .expect("link never gave up")
        .unwrap();

        link.shutdown().await;
    }
}
