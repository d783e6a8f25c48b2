//! 시그널링 릴레이 클라이언트 연결

use crate::client::status::StatusLine;
use crate::error::LinkError;
use crate::protocol::{ClientMessage, ServerMessage};
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(25);

/// 릴레이 소켓의 송수신 태스크 핸들
pub struct RelayLink {
    outbound: UnboundedSender<ClientMessage>,
    writer: JoinHandle<()>,
    reader: JoinHandle<()>,
}

impl RelayLink {
    /// 릴레이에 접속하고 방에 참여한다. 받은 메시지는 반환된 채널로 흘러온다
    pub async fn connect(
        url: &str,
        room: &str,
        status: &StatusLine,
    ) -> Result<(Self, UnboundedReceiver<ServerMessage>), LinkError> {
        tracing::info!(url = %url, room = %room, "Connecting to signaling relay");

        let (ws_stream, _response) = match connect_async(url).await {
            Ok(result) => result,
            Err(e) => {
                status.set("Error: Cannot connect to video server");
                return Err(LinkError::Connect {
                    url: url.to_string(),
                    source: e,
                });
            }
        };

        let (mut write, mut read) = ws_stream.split();
        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<ClientMessage>();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<ServerMessage>();

        let writer = tokio::spawn(async move {
            let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
            heartbeat.tick().await;

            loop {
                let message = tokio::select! {
                    message = outbound_rx.recv() => match message {
                        Some(message) => message,
                        None => break,
                    },
                    _ = heartbeat.tick() => ClientMessage::Heartbeat,
                };

                let text = match serde_json::to_string(&message) {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::error!("Failed to encode relay message: {}", e);
                        continue;
                    }
                };
                if write.send(Message::Text(text)).await.is_err() {
                    tracing::warn!("Relay socket closed while sending");
                    break;
                }
            }

            let _ = write.send(Message::Close(None)).await;
        });

        let reader = tokio::spawn(async move {
            while let Some(frame) = read.next().await {
                match frame {
                    Ok(Message::Text(text)) => match serde_json::from_str::<ServerMessage>(&text) {
                        Ok(ServerMessage::HeartbeatAck) => {}
                        Ok(message) => {
                            if inbound_tx.send(message).is_err() {
                                break;
                            }
                        }
                        Err(e) => tracing::warn!("Ignoring unparseable relay frame: {}", e),
                    },
                    Ok(Message::Close(_)) => {
                        tracing::info!("Relay closed the connection");
                        break;
                    }
                    Err(e) => {
                        tracing::warn!("Relay read error: {}", e);
                        break;
                    }
                    _ => {}
                }
            }
        });

        for message in [ClientMessage::JoinRoom(room.to_string()), ClientMessage::RequestIceServers] {
            outbound.send(message).map_err(|_| LinkError::Closed)?;
        }
        status.set("Connected to video server!");

        Ok((
            Self {
                outbound,
                writer,
                reader,
            },
            inbound_rx,
        ))
    }

    /// 릴레이로 보낼 메시지 송신기
    pub fn sender(&self) -> UnboundedSender<ClientMessage> {
        self.outbound.clone()
    }

    /// 방에서 나가고 소켓 태스크를 정리한다
    pub async fn shutdown(self) {
        let _ = self.outbound.send(ClientMessage::LeaveRoom);
        drop(self.outbound);
        self.reader.abort();

        // 세션 매니저가 송신기 복제본을 들고 있을 수 있어 제한 시간 후 중단
        let mut writer = self.writer;
        if tokio::time::timeout(Duration::from_secs(1), &mut writer).await.is_err() {
            writer.abort();
        }
    }
}
