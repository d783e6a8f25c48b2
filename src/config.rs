//! 환경 변수 기반 설정 관리

use std::env;
use std::str::FromStr;
use std::time::Duration;

/// 릴레이 서버 설정
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub host: String,
    pub cors_origins: Vec<String>,
    pub static_dir: Option<String>,
    pub room: RoomConfig,
    pub ice: IceConfig,
    pub log_level: String,
}

/// 방 설정
#[derive(Debug, Clone)]
pub struct RoomConfig {
    /// 끊긴 멤버 정리 주기
    pub sweep_interval_secs: u64,
}

/// STUN/TURN 서버 설정
#[derive(Debug, Clone)]
pub struct IceConfig {
    pub stun_urls: Vec<String>,
    pub turn: TurnConfig,
}

/// TURN 서버 설정
#[derive(Debug, Clone)]
pub struct TurnConfig {
    pub url: String,
    pub secret: String,
    pub enable_tls: bool,
    pub enable_udp: bool,
    pub enable_tcp: bool,
    pub ports: TurnPorts,
    pub credential_ttl: u64,
}

/// TURN 포트 설정
#[derive(Debug, Clone)]
pub struct TurnPorts {
    pub udp: u16,
    pub tcp: u16,
    pub tls: u16,
}

impl TurnConfig {
    pub fn is_configured(&self) -> bool {
        !self.url.is_empty() && !self.secret.is_empty()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 3001,
            host: "0.0.0.0".to_string(),
            cors_origins: vec!["*".to_string()],
            static_dir: None,
            room: RoomConfig {
                sweep_interval_secs: 300,
            },
            ice: IceConfig {
                stun_urls: vec!["stun:stun.l.google.com:19302".to_string()],
                turn: TurnConfig {
                    url: String::new(),
                    secret: String::new(),
                    enable_tls: false,
                    enable_udp: true,
                    enable_tcp: true,
                    ports: TurnPorts {
                        udp: 3478,
                        tcp: 3478,
                        tls: 443,
                    },
                    credential_ttl: 3600,
                },
            },
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// 환경 변수에서 설정 로드
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        let defaults = Self::default();

        Self {
            port: parse_var("PORT", defaults.port),
            host: env::var("HOST").unwrap_or(defaults.host),
            cors_origins: list_var("CORS_ORIGINS").unwrap_or(defaults.cors_origins),
            static_dir: env::var("STATIC_DIR").ok().filter(|dir| !dir.is_empty()),
            room: RoomConfig {
                sweep_interval_secs: parse_var("ROOM_SWEEP_SECS", defaults.room.sweep_interval_secs),
            },
            ice: IceConfig {
                stun_urls: list_var("STUN_URLS").unwrap_or(defaults.ice.stun_urls),
                turn: TurnConfig {
                    url: env::var("TURN_SERVER_URL").unwrap_or_default(),
                    secret: env::var("TURN_SECRET").unwrap_or_default(),
                    enable_tls: env::var("TURN_ENABLE_TLS")
                        .map(|v| v == "true")
                        .unwrap_or(false),
                    enable_udp: env::var("TURN_ENABLE_UDP")
                        .map(|v| v != "false")
                        .unwrap_or(true),
                    enable_tcp: env::var("TURN_ENABLE_TCP")
                        .map(|v| v != "false")
                        .unwrap_or(true),
                    ports: TurnPorts {
                        udp: parse_var("TURN_PORT_UDP", defaults.ice.turn.ports.udp),
                        tcp: parse_var("TURN_PORT_TCP", defaults.ice.turn.ports.tcp),
                        tls: parse_var("TURN_PORT_TLS", defaults.ice.turn.ports.tls),
                    },
                    credential_ttl: parse_var("TURN_CREDENTIAL_TTL", defaults.ice.turn.credential_ttl),
                },
            },
            log_level: env::var("LOG_LEVEL").unwrap_or(defaults.log_level),
        }
    }
}

/// 미디어 획득 방식
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaMode {
    Camera,
    Synthetic,
}

impl FromStr for MediaMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "camera" => Ok(MediaMode::Camera),
            "synthetic" | "test-video" => Ok(MediaMode::Synthetic),
            other => Err(format!("unknown media mode '{}'", other)),
        }
    }
}

/// 재접속 backoff 정책
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub base: Duration,
    pub max: Duration,
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(2000),
            max: Duration::from_millis(30_000),
            max_attempts: 10,
        }
    }
}

/// 플레이어 클라이언트 설정
#[derive(Debug, Clone)]
pub struct PlayerConfig {
    pub relay_url: String,
    pub room: String,
    pub game_server_host: String,
    pub game_server_port: u16,
    pub game_server_tls: bool,
    pub player_name: String,
    pub media_mode: MediaMode,
    pub camera_device: String,
    pub reconnect: ReconnectPolicy,
    pub log_level: String,
}

impl PlayerConfig {
    /// 환경 변수에서 설정 로드
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        let reconnect = ReconnectPolicy::default();

        Self {
            relay_url: env::var("RELAY_URL").unwrap_or_else(|_| "ws://127.0.0.1:3001/ws".to_string()),
            room: env::var("ROOM").unwrap_or_else(|_| "test-room".to_string()),
            game_server_host: env::var("GAME_SERVER_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            game_server_port: parse_var("GAME_SERVER_PORT", 5050),
            game_server_tls: env::var("GAME_SERVER_TLS")
                .map(|v| v == "true")
                .unwrap_or(false),
            player_name: env::var("PLAYER_NAME").unwrap_or_else(|_| "player".to_string()),
            media_mode: env::var("MEDIA_MODE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(MediaMode::Synthetic),
            camera_device: env::var("CAMERA_DEVICE").unwrap_or_else(|_| "/dev/video0".to_string()),
            reconnect: ReconnectPolicy {
                base: Duration::from_millis(parse_var(
                    "RECONNECT_BASE_MS",
                    reconnect.base.as_millis() as u64,
                )),
                max: Duration::from_millis(parse_var(
                    "RECONNECT_MAX_MS",
                    reconnect.max.as_millis() as u64,
                )),
                max_attempts: parse_var("RECONNECT_MAX_ATTEMPTS", reconnect.max_attempts),
            },
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        }
    }

    /// 게임 서버 WebSocket 주소 (TLS면 포트 생략, 프록시 뒤에 있다고 가정)
    pub fn game_server_url(&self) -> String {
        if self.game_server_tls {
            format!("wss://{}/ws", self.game_server_host)
        } else {
            format!("ws://{}:{}/ws", self.game_server_host, self.game_server_port)
        }
    }
}

fn parse_var<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn list_var(key: &str) -> Option<Vec<String>> {
    let value = env::var(key).ok()?;
    let items: Vec<String> = value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    if items.is_empty() {
        None
    } else {
        Some(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn media_mode_accepts_aliases() {
        assert_eq!("Camera".parse::<MediaMode>(), Ok(MediaMode::Camera));
        assert_eq!("test-video".parse::<MediaMode>(), Ok(MediaMode::Synthetic));
        assert!("webcam".parse::<MediaMode>().is_err());
    }

    #[test]
    fn game_server_url_omits_port_behind_tls() {
        let mut config = PlayerConfig::from_env();
        config.game_server_host = "mafia.example".to_string();
        config.game_server_port = 5050;

        config.game_server_tls = false;
        assert_eq!(config.game_server_url(), "ws://mafia.example:5050/ws");

        config.game_server_tls = true;
        assert_eq!(config.game_server_url(), "wss://mafia.example/ws");
    }

    #[test]
    fn turn_requires_url_and_secret() {
        let mut turn = Config::default().ice.turn;
        assert!(!turn.is_configured());
        turn.url = "turn.example".to_string();
        assert!(!turn.is_configured());
        turn.secret = "s3cret".to_string();
        assert!(turn.is_configured());
    }
}
