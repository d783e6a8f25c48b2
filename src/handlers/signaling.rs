//! WebRTC 시그널링 핸들러
//!
//! signal/player-info는 수신자 한 명에게만 전달한다. 수신자가 없으면 조용히 버린다.

use crate::protocol::ServerMessage;
use crate::state::AppState;
use serde_json::Value;

/// Signal 처리 (SDP/ICE, 내용은 해석하지 않음)
pub fn handle_signal(state: &AppState, from: &str, to: &str, data: Value) {
    let delivered = state.send_to(
        to,
        ServerMessage::Signal {
            from: from.to_string(),
            data,
        },
    );

    tracing::debug!(from = %from, to = %to, delivered, "Relayed signal");
}

/// Player info 처리
pub fn handle_player_info(state: &AppState, from: &str, to: &str, name: String, id: u32) {
    let delivered = state.send_to(
        to,
        ServerMessage::PlayerInfo {
            from: from.to_string(),
            name,
            id,
        },
    );

    tracing::debug!(from = %from, to = %to, player_id = id, delivered, "Relayed player info");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::handlers::connection::handle_connection;
    use crate::handlers::room::handle_join_room;
    use serde_json::json;
    use tokio::sync::mpsc::unbounded_channel;

    #[test]
    fn signal_reaches_only_the_addressee() {
        let state = AppState::new(Config::default());
        let mut ids = Vec::new();
        let mut receivers = Vec::new();
        for _ in 0..3 {
            let (tx, mut rx) = unbounded_channel();
            let id = handle_connection(&state, tx);
            rx.try_recv().unwrap();
            ids.push(id);
            receivers.push(rx);
        }
        for id in &ids {
            handle_join_room(&state, id, "test-room").unwrap();
        }
        for rx in receivers.iter_mut() {
            while rx.try_recv().is_ok() {}
        }

        let offer = json!({ "type": "offer", "sdp": "v=0" });
        handle_signal(&state, &ids[0], &ids[1], offer.clone());

        assert_eq!(
            receivers[1].try_recv().unwrap(),
            ServerMessage::Signal {
                from: ids[0].clone(),
                data: offer
            }
        );
        assert!(receivers[0].try_recv().is_err());
        assert!(receivers[2].try_recv().is_err());
    }

    #[test]
    fn signal_to_unknown_connection_is_dropped() {
        let state = AppState::new(Config::default());
        let (tx, mut rx) = unbounded_channel();
        let id = handle_connection(&state, tx);
        rx.try_recv().unwrap();

        handle_signal(&state, &id, "missing", json!({ "candidate": "x" }));
        handle_player_info(&state, &id, "missing", "Alice".to_string(), 1);

        assert!(rx.try_recv().is_err());
    }
}
