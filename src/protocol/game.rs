//! 게임 서버 메시지 프로토콜 정의
//!
//! 게임 서버는 `{action, player?, target?}` 형태의 JSON을 주고받는다.
//! 역할 배정처럼 action 자체가 값인 메시지가 있어서 serde 태그 대신 action 문자열로 분기한다.

use crate::error::GameProtocolError;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// 원본 메시지
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameMessage {
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub player: Option<Value>,
    #[serde(default)]
    pub target: Value,
}

/// 머리 위치
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeadPosition {
    Up,
    Down,
}

impl HeadPosition {
    pub fn as_action(&self) -> &'static str {
        match self {
            HeadPosition::Up => "headUp",
            HeadPosition::Down => "headDown",
        }
    }
}

/// 클라이언트 → 게임 서버 액션
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundAction {
    Setup { name: String },
    Head(HeadPosition),
    VoiceCommand(u8),
    Ready,
    Restart,
}

impl OutboundAction {
    pub fn to_message(&self) -> GameMessage {
        let (action, target) = match self {
            OutboundAction::Setup { name } => ("setup", Value::String(name.clone())),
            OutboundAction::Head(position) => (position.as_action(), Value::Null),
            OutboundAction::VoiceCommand(code) => ("voiceCommand", Value::from(*code)),
            OutboundAction::Ready => ("ready", Value::Null),
            OutboundAction::Restart => ("restart", Value::Null),
        };
        GameMessage {
            action: action.to_string(),
            player: None,
            target,
        }
    }
}

/// 역할
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Mafia,
    Doctor,
    Civilian,
}

impl Role {
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "mafia" => Some(Role::Mafia),
            "doctor" => Some(Role::Doctor),
            "civilian" => Some(Role::Civilian),
            _ => None,
        }
    }

    pub fn tag(&self) -> &'static str {
        match self {
            Role::Mafia => "mafia",
            Role::Doctor => "doctor",
            Role::Civilian => "civilian",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// 게임 진행 단계
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Phase {
    Lobby,
    Assign,
    HeadsDown,
    MafiaVote,
    DoctorVote,
    Narrate,
    Vote,
    Other(String),
}

impl Phase {
    pub fn from_state(state: &str) -> Self {
        match state {
            "LOBBY" => Phase::Lobby,
            "ASSIGN" => Phase::Assign,
            "HEADSDOWN" => Phase::HeadsDown,
            "MAFIAVOTE" => Phase::MafiaVote,
            "DOCTORVOTE" => Phase::DoctorVote,
            "NARRATE" => Phase::Narrate,
            "VOTE" => Phase::Vote,
            other => Phase::Other(other.to_string()),
        }
    }

    /// 화면 표시용 제목
    pub fn title(&self) -> &str {
        match self {
            Phase::Lobby => "WAITING FOR PLAYERS",
            Phase::Assign => "ASSIGNING ROLES",
            Phase::HeadsDown => "NIGHTTIME - HEADS DOWN",
            Phase::MafiaVote => "NIGHTTIME - MAFIA CHOOSING",
            Phase::DoctorVote => "NIGHTTIME - DOCTOR VOTING",
            Phase::Narrate => "DAYTIME - NIGHT RESULTS",
            Phase::Vote => "CAST YOUR VOTE",
            Phase::Other(state) => state,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LobbyStatus {
    pub ready_count: u32,
    pub total_count: u32,
    pub min_players: u32,
    #[serde(default)]
    pub max_players: Option<u32>,
    #[serde(default)]
    pub players: BTreeMap<String, bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RestartStatus {
    pub restart_count: u32,
    pub total_count: u32,
    #[serde(default)]
    pub players: BTreeMap<String, bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct GameOver {
    pub winner: String,
    #[serde(default)]
    pub mafia: Vec<String>,
}

impl GameOver {
    pub fn mafia_won(&self) -> bool {
        self.winner == "mafia"
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct NightResult {
    #[serde(default)]
    pub killed: Option<String>,
    #[serde(default)]
    pub saved: Option<String>,
}

/// 게임 서버 → 클라이언트 이벤트
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    IdRegistered { player: u32 },
    PlayerRegistered { name: String },
    Lobby(LobbyStatus),
    Restart(RestartStatus),
    RoleAssigned { role: Role, player: Option<String> },
    GameOver(GameOver),
    PhaseChanged(Phase),
    NightResult(NightResult),
    VoteResult(Vec<String>),
    HeadsDown,
    PlayerDisconnected { name: String },
    Unknown(String),
}

impl ServerEvent {
    pub fn parse(message: GameMessage) -> Result<Self, GameProtocolError> {
        let GameMessage {
            action,
            player,
            target,
        } = message;

        if let Some(role) = Role::from_tag(&action) {
            return Ok(ServerEvent::RoleAssigned {
                role,
                player: player.as_ref().map(display_value),
            });
        }

        let event = match action.as_str() {
            "id_registered" => {
                let player = player
                    .as_ref()
                    .and_then(Value::as_u64)
                    .and_then(|id| u32::try_from(id).ok())
                    .ok_or(GameProtocolError::MissingField {
                        action: action.clone(),
                        field: "player",
                    })?;
                ServerEvent::IdRegistered { player }
            }
            "player_registered" => ServerEvent::PlayerRegistered {
                name: player.as_ref().map(display_value).unwrap_or_default(),
            },
            "lobby_status" => ServerEvent::Lobby(decode(&action, target)?),
            "restart_status" => ServerEvent::Restart(decode(&action, target)?),
            "game_over" => ServerEvent::GameOver(decode(&action, target)?),
            "game_state" => {
                let state = target
                    .get("state")
                    .and_then(Value::as_str)
                    .ok_or(GameProtocolError::MissingField {
                        action: action.clone(),
                        field: "state",
                    })?;
                ServerEvent::PhaseChanged(Phase::from_state(state))
            }
            "night_result" => {
                if target.is_null() {
                    ServerEvent::NightResult(NightResult::default())
                } else {
                    ServerEvent::NightResult(decode(&action, target)?)
                }
            }
            "vote_result" => {
                if target.is_null() {
                    ServerEvent::VoteResult(Vec::new())
                } else {
                    ServerEvent::VoteResult(decode(&action, target)?)
                }
            }
            "heads_down" => ServerEvent::HeadsDown,
            "player_disconnected" => ServerEvent::PlayerDisconnected {
                name: target
                    .as_str()
                    .map(str::to_string)
                    .or_else(|| player.as_ref().map(display_value))
                    .unwrap_or_default(),
            },
            _ => ServerEvent::Unknown(action),
        };
        Ok(event)
    }
}

fn decode<T: DeserializeOwned>(action: &str, target: Value) -> Result<T, GameProtocolError> {
    serde_json::from_value(target).map_err(|source| GameProtocolError::Malformed {
        action: action.to_string(),
        source,
    })
}

/// player 필드는 이름(문자열)일 때도, 번호일 때도 있다
fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(value: Value) -> ServerEvent {
        let message: GameMessage = serde_json::from_value(value).unwrap();
        ServerEvent::parse(message).unwrap()
    }

    #[test]
    fn setup_message_carries_player_name() {
        let message = OutboundAction::Setup {
            name: "Alice".to_string(),
        }
        .to_message();
        assert_eq!(
            serde_json::to_value(message).unwrap(),
            json!({ "action": "setup", "target": "Alice" })
        );
    }

    #[test]
    fn head_position_is_the_action() {
        let message = OutboundAction::Head(HeadPosition::Down).to_message();
        assert_eq!(message.action, "headDown");
        assert!(message.target.is_null());
    }

    #[test]
    fn voice_command_sends_numeric_target() {
        let message = OutboundAction::VoiceCommand(3).to_message();
        assert_eq!(message.action, "voiceCommand");
        assert_eq!(message.target, json!(3));
    }

    #[test]
    fn role_tags_become_role_events() {
        let event = parse(json!({ "action": "doctor", "player": "Bob", "target": null }));
        assert_eq!(
            event,
            ServerEvent::RoleAssigned {
                role: Role::Doctor,
                player: Some("Bob".to_string())
            }
        );
    }

    #[test]
    fn id_registered_requires_numeric_player() {
        let message: GameMessage =
            serde_json::from_value(json!({ "action": "id_registered", "player": "three" })).unwrap();
        assert!(matches!(
            ServerEvent::parse(message),
            Err(GameProtocolError::MissingField { field: "player", .. })
        ));
    }

    #[test]
    fn lobby_status_decodes_players_map() {
        let event = parse(json!({
            "action": "lobby_status",
            "target": {
                "ready_count": 2,
                "total_count": 4,
                "min_players": 3,
                "players": { "Alice": true, "Bob": false }
            }
        }));
        match event {
            ServerEvent::Lobby(status) => {
                assert_eq!(status.ready_count, 2);
                assert_eq!(status.players.get("Bob"), Some(&false));
                assert_eq!(status.max_players, None);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn unknown_game_state_keeps_raw_name() {
        let event = parse(json!({ "action": "game_state", "target": { "state": "SUDDEN_DEATH" } }));
        assert_eq!(
            event,
            ServerEvent::PhaseChanged(Phase::Other("SUDDEN_DEATH".to_string()))
        );
    }

    #[test]
    fn unknown_actions_are_not_errors() {
        let event = parse(json!({ "action": "confetti" }));
        assert_eq!(event, ServerEvent::Unknown("confetti".to_string()));
    }
}
