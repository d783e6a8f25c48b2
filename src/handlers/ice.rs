//! ICE 서버 설정 핸들러 (STUN + TURN 임시 자격증명)

use crate::config::{IceConfig, TurnConfig};
use crate::protocol::{IceServer, ServerMessage};
use crate::state::AppState;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use hmac::{Hmac, Mac};
use sha1::Sha1;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc::UnboundedSender;

type HmacSha1 = Hmac<Sha1>;

/// ICE 서버 목록 요청 처리
pub fn handle_ice_servers_request(state: &AppState, sender: &UnboundedSender<ServerMessage>) {
    let ice = &state.config.ice;
    let ice_servers = build_ice_servers(ice, unix_now());

    let _ = sender.send(ServerMessage::IceServers {
        ice_servers,
        ttl: ice.turn.credential_ttl,
    });

    tracing::debug!(turn = ice.turn.is_configured(), "ICE servers sent");
}

/// STUN 목록 + (설정된 경우) TURN 서버
pub fn build_ice_servers(config: &IceConfig, now: u64) -> Vec<IceServer> {
    let mut servers: Vec<IceServer> = config
        .stun_urls
        .iter()
        .map(|url| IceServer {
            urls: vec![url.clone()],
            username: None,
            credential: None,
        })
        .collect();

    if config.turn.is_configured() {
        let (username, credential) = generate_credentials(&config.turn, now);
        let urls = turn_urls(&config.turn);
        if !urls.is_empty() {
            servers.push(IceServer {
                urls,
                username: Some(username),
                credential: Some(credential),
            });
        }
    }

    servers
}

/// TURN REST 방식 자격증명 (username = "<만료시각>:<랜덤>", credential = HMAC-SHA1)
fn generate_credentials(config: &TurnConfig, now: u64) -> (String, String) {
    let expiry_time = now + config.credential_ttl;
    let random: u64 = rand::random();
    let username = format!("{}:smart-mafia-{:x}", expiry_time, random);
    let credential = generate_hmac_hash(&username, &config.secret);
    (username, credential)
}

fn generate_hmac_hash(username: &str, secret: &str) -> String {
    // new_from_slice는 HMAC에서 키 길이 제한이 없어 실패하지 않는다
    let mut mac = match HmacSha1::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return String::new(),
    };
    mac.update(username.as_bytes());
    BASE64.encode(mac.finalize().into_bytes())
}

fn turn_urls(config: &TurnConfig) -> Vec<String> {
    let mut urls = Vec::new();
    if config.enable_udp {
        urls.push(format!("turn:{}:{}", config.url, config.ports.udp));
    }
    if config.enable_tcp {
        urls.push(format!("turn:{}:{}?transport=tcp", config.url, config.ports.tcp));
    }
    if config.enable_tls {
        urls.push(format!("turns:{}:{}?transport=tcp", config.url, config.ports.tls));
    }
    urls
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
