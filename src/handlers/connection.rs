//! 연결 핸들러

use crate::protocol::ServerMessage;
use crate::state::{AppState, Connection};
use tokio::sync::mpsc::UnboundedSender;
use uuid::Uuid;

/// 새 연결 처리
pub fn handle_connection(state: &AppState, sender: UnboundedSender<ServerMessage>) -> String {
    let connection_id = Uuid::new_v4().to_string();

    let _ = sender.send(ServerMessage::Connected {
        socket_id: connection_id.clone(),
    });
    state
        .connections
        .insert(connection_id.clone(), Connection::new(connection_id.clone(), sender));

    tracing::info!(peer_id = %connection_id, "New connection established");
    connection_id
}

/// 연결 해제 처리: 방에 남은 멤버에게 user-disconnected 알림
pub fn handle_disconnect(state: &AppState, connection_id: &str) {
    if let Some((_, connection)) = state.connections.remove(connection_id) {
        if let Some(room) = connection.room {
            crate::handlers::room::leave_room_internal(state, connection_id, &room);
        }
        tracing::info!(
            peer_id = %connection_id,
            connected_secs = connection.connected_at.elapsed().as_secs(),
            "Connection closed"
        );
    }
}

/// Heartbeat 처리
pub fn handle_heartbeat(sender: &UnboundedSender<ServerMessage>) {
    let _ = sender.send(ServerMessage::HeartbeatAck);
}
