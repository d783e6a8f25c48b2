//! 방 관리 핸들러

use crate::error::ProtocolError;
use crate::protocol::ServerMessage;
use crate::state::AppState;

/// 방 참여 처리
///
/// 기존 멤버에게만 user-joined를 보내고 참여자에게는 응답하지 않는다.
pub fn handle_join_room(
    state: &AppState,
    connection_id: &str,
    room_id: &str,
) -> Result<(), ProtocolError> {
    let room_id = room_id.trim();
    if room_id.is_empty() {
        return Err(ProtocolError::InvalidRoom);
    }

    // connections 샤드 락은 이 블록 안에서만 잡는다 (send_to와 데드락 방지)
    let previous = match state.connections.get_mut(connection_id) {
        Some(mut connection) => connection.room.replace(room_id.to_string()),
        None => return Ok(()),
    };

    match previous {
        Some(previous) if previous == room_id => {
            tracing::debug!(peer_id = %connection_id, room_id = %room_id, "Already in room");
            return Ok(());
        }
        Some(previous) => leave_room_internal(state, connection_id, &previous),
        None => {}
    }

    let existing = state.rooms.join(room_id, connection_id);
    for member in &existing {
        state.send_to(member, ServerMessage::UserJoined(connection_id.to_string()));
    }

    tracing::info!(
        peer_id = %connection_id,
        room_id = %room_id,
        notified = existing.len(),
        "User joined room"
    );
    Ok(())
}

/// 방 나가기 처리 (연결은 유지)
pub fn handle_leave_room(state: &AppState, connection_id: &str) {
    let room = state
        .connections
        .get_mut(connection_id)
        .and_then(|mut connection| connection.room.take());

    if let Some(room) = room {
        leave_room_internal(state, connection_id, &room);
    }
}

/// 방 나가기 내부 로직
pub fn leave_room_internal(state: &AppState, connection_id: &str, room_id: &str) {
    let remaining = state.rooms.leave(room_id, connection_id);

    for member in &remaining {
        state.send_to(member, ServerMessage::UserDisconnected(connection_id.to_string()));
    }

    tracing::info!(
        peer_id = %connection_id,
        room_id = %room_id,
        remaining = remaining.len(),
        "User left room"
    );
}

/// 끊긴 연결이 남아있는 방 정리
pub fn sweep_rooms(state: &AppState) {
    let pruned = state
        .rooms
        .prune(|member| state.connections.contains_key(member));

    if pruned > 0 {
        tracing::info!(pruned_members = pruned, "Room sweep completed");
    }
}
