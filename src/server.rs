//! 시그널링 릴레이 HTTP/WebSocket 서버

use crate::error::ProtocolError;
use crate::handlers;
use crate::protocol::{ClientMessage, ServerMessage};
use crate::state::AppState;
use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    http::{HeaderName, HeaderValue},
    response::{Html, IntoResponse, Json},
    routing::get,
    Router,
};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

/// 라우터 구성
pub fn router(state: Arc<AppState>) -> Router {
    let cors = cors_layer(&state.config.cors_origins);
    let static_dir = state.config.static_dir.clone();

    let mut app = Router::new()
        .route("/", get(index_handler))
        .route("/health", get(health_handler))
        .route("/ws", get(ws_handler))
        .with_state(state);

    // 테스트 영상(vid1.mp4, vid2.mp4) 등 정적 파일
    if let Some(dir) = static_dir {
        tracing::info!(static_dir = %dir, "Serving static files");
        app = app.fallback_service(ServeDir::new(dir));
    }

    app.layer(SetResponseHeaderLayer::overriding(
        HeaderName::from_static("cross-origin-resource-policy"),
        HeaderValue::from_static("cross-origin"),
    ))
    .layer(cors)
    .layer(TraceLayer::new_for_http())
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);

    if origins.iter().any(|origin| origin == "*") {
        return layer.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| HeaderValue::from_str(origin).ok())
        .collect();
    layer.allow_origin(AllowOrigin::list(origins))
}

async fn index_handler() -> Html<&'static str> {
    Html("<h1>Smart Mafia Signaling Relay</h1><p>WebSocket endpoint: /ws</p>")
}

async fn health_handler(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "server": "smart-mafia-relay",
        "rooms": state.rooms.room_count(),
        "connections": state.connections.len(),
        "timestamp": SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }))
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();

    // 연결 처리
    let connection_id = handlers::handle_connection(&state, tx.clone());

    // 송신 태스크
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            match serde_json::to_string(&msg) {
                Ok(json) => {
                    if ws_sender.send(Message::Text(json)).await.is_err() {
                        break;
                    }
                }
                Err(e) => tracing::error!("Failed to encode server message: {}", e),
            }
        }
    });

    // 수신 처리
    while let Some(result) = ws_receiver.next().await {
        match result {
            Ok(Message::Text(text)) => {
                let outcome = serde_json::from_str::<ClientMessage>(&text)
                    .map_err(|e| ProtocolError::InvalidMessage(e.to_string()))
                    .and_then(|msg| handle_client_message(&state, &connection_id, &tx, msg));

                if let Err(e) = outcome {
                    tracing::warn!(peer_id = %connection_id, error = %e, "Rejected client message");
                    let _ = tx.send(ServerMessage::Error {
                        code: e.code().to_string(),
                        message: e.to_string(),
                    });
                }
            }
            Ok(Message::Binary(_)) => {
                let _ = tx.send(ServerMessage::Error {
                    code: "invalid-message".to_string(),
                    message: "binary frames are not supported".to_string(),
                });
            }
            Ok(Message::Close(_)) => break,
            Err(e) => {
                tracing::debug!(peer_id = %connection_id, "WebSocket receive error: {}", e);
                break;
            }
            _ => {}
        }
    }

    // 연결 해제
    handlers::handle_disconnect(&state, &connection_id);
    send_task.abort();
}

fn handle_client_message(
    state: &AppState,
    connection_id: &str,
    sender: &mpsc::UnboundedSender<ServerMessage>,
    msg: ClientMessage,
) -> Result<(), ProtocolError> {
    match msg {
        ClientMessage::Heartbeat => handlers::handle_heartbeat(sender),
        ClientMessage::JoinRoom(room_id) => {
            handlers::handle_join_room(state, connection_id, &room_id)?;
        }
        ClientMessage::LeaveRoom => handlers::handle_leave_room(state, connection_id),
        ClientMessage::Signal { to, data } => {
            handlers::handle_signal(state, connection_id, &to, data);
        }
        ClientMessage::PlayerInfo { to, name, id } => {
            handlers::handle_player_info(state, connection_id, &to, name, id);
        }
        ClientMessage::RequestIceServers => handlers::handle_ice_servers_request(state, sender),
    }
    Ok(())
}
