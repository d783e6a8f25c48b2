//! 게임 상태 리듀서
//!
//! 게임 서버 이벤트를 받아 상태를 바꾸고, 링크가 실행할 효과만 돌려준다.
//! 여기서는 I/O를 하지 않는다.

use crate::protocol::game::{
    GameOver, HeadPosition, LobbyStatus, NightResult, OutboundAction, Phase, RestartStatus, Role,
    ServerEvent,
};

/// 리듀서가 요청하는 부수 효과
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    Send(OutboundAction),
    PlayerIdAssigned(u32),
    Status(String),
}

/// 게임 링크 상태. player_id 외에는 재연결 시 초기화된다
#[derive(Debug, Clone, PartialEq)]
pub struct GameState {
    pub role: Option<Role>,
    pub player_id: Option<u32>,
    pub lobby: Option<LobbyStatus>,
    pub restart: Option<RestartStatus>,
    pub game_over: Option<GameOver>,
    pub phase: Option<Phase>,
    pub status: String,
    pub head: HeadPosition,
}

impl Default for GameState {
    fn default() -> Self {
        Self {
            role: None,
            player_id: None,
            lobby: None,
            restart: None,
            game_over: None,
            phase: None,
            status: String::new(),
            head: HeadPosition::Down,
        }
    }
}

impl GameState {
    pub fn apply(&mut self, event: ServerEvent) -> Vec<Effect> {
        let mut effects = Vec::new();

        match event {
            ServerEvent::IdRegistered { player } => {
                match self.player_id {
                    Some(existing) if existing != player => {
                        tracing::warn!(
                            existing = existing,
                            received = player,
                            "Player id already assigned, ignoring"
                        );
                    }
                    Some(_) => {}
                    None => {
                        tracing::info!(player_id = player, "Player registered");
                        self.player_id = Some(player);
                        effects.push(Effect::PlayerIdAssigned(player));
                    }
                }
                let assigned = self.player_id.unwrap_or(player);
                self.set_status(
                    format!("Registered as Player {}. Waiting in lobby...", assigned),
                    &mut effects,
                );
            }
            ServerEvent::PlayerRegistered { name } => {
                self.set_status(format!("Registered as {}. Waiting in lobby...", name), &mut effects);
            }
            ServerEvent::Lobby(lobby) => {
                let status = format!(
                    "Lobby: {}/{} ready (min: {})",
                    lobby.ready_count, lobby.total_count, lobby.min_players
                );
                self.lobby = Some(lobby);
                self.set_status(status, &mut effects);
            }
            ServerEvent::Restart(restart) => {
                let status = format!(
                    "Restart: {}/{} want to play again",
                    restart.restart_count, restart.total_count
                );
                self.restart = Some(restart);
                self.set_status(status, &mut effects);
            }
            ServerEvent::RoleAssigned { role, player } => {
                self.role = Some(role);
                self.game_over = None;
                self.restart = None;
                tracing::info!(role = %role, "Role assigned");
                let who = player.unwrap_or_default();
                self.set_status(
                    format!("You are {} - Role: {}", who, role.tag().to_uppercase()),
                    &mut effects,
                );
            }
            ServerEvent::GameOver(game_over) => {
                let winner = if game_over.mafia_won() { "MAFIA" } else { "CIVILIANS" };
                self.role = None;
                self.restart = None;
                self.game_over = Some(game_over);
                self.set_status(format!("GAME OVER! {} WIN!", winner), &mut effects);
            }
            ServerEvent::PhaseChanged(phase) => {
                tracing::info!(phase = phase.title(), "Game phase changed");
                self.phase = Some(phase);
            }
            ServerEvent::NightResult(result) => {
                self.set_status(narrate_night(&result), &mut effects);
            }
            ServerEvent::VoteResult(names) => {
                self.set_status(narrate_vote(&names), &mut effects);
            }
            ServerEvent::HeadsDown => {
                effects.push(Effect::Send(OutboundAction::Head(self.head)));
            }
            ServerEvent::PlayerDisconnected { name } => {
                self.set_status(format!("{} disconnected", name), &mut effects);
            }
            ServerEvent::Unknown(action) => {
                tracing::debug!(action = %action, "Ignoring unknown game action");
            }
        }

        effects
    }

    /// 마지막으로 알려진 머리 위치 기록
    pub fn set_head(&mut self, head: HeadPosition) {
        self.head = head;
    }

    /// "준비/전체" 표기. 로비 정보가 없으면 None
    pub fn readiness(&self) -> Option<String> {
        self.lobby
            .as_ref()
            .map(|l| format!("{}/{}", l.ready_count, l.total_count))
    }

    /// 연결이 끊기면 번호와 머리 위치만 남기고 지운다
    pub fn reset_for_reconnect(&mut self) {
        *self = Self {
            player_id: self.player_id,
            head: self.head,
            ..Self::default()
        };
    }

    fn set_status(&mut self, status: String, effects: &mut Vec<Effect>) {
        self.status = status.clone();
        effects.push(Effect::Status(status));
    }
}

fn narrate_night(result: &NightResult) -> String {
    match (&result.killed, &result.saved) {
        (Some(killed), _) => format!("Night is over. {} was killed.", killed),
        (None, Some(saved)) => format!("Night is over. {} was saved by the doctor.", saved),
        (None, None) => "Night is over. Nobody was harmed.".to_string(),
    }
}

fn narrate_vote(names: &[String]) -> String {
    match names {
        [] => "Vote over. No votes were cast.".to_string(),
        [name] => format!("Vote over. {} was voted out.", name),
        tied => format!("Vote tied between {}.", tied.join(", ")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn lobby(ready: u32, total: u32) -> ServerEvent {
        ServerEvent::Lobby(LobbyStatus {
            ready_count: ready,
            total_count: total,
            min_players: 4,
            max_players: None,
            players: BTreeMap::new(),
        })
    }

    #[test]
    fn id_registration_sets_player_once() {
        let mut state = GameState::default();

        let effects = state.apply(ServerEvent::IdRegistered { player: 3 });
        assert_eq!(state.player_id, Some(3));
        assert!(effects.contains(&Effect::PlayerIdAssigned(3)));
        assert!(state.status.contains("Player 3"));

        let effects = state.apply(ServerEvent::IdRegistered { player: 5 });
        assert_eq!(state.player_id, Some(3));
        assert!(!effects.iter().any(|e| matches!(e, Effect::PlayerIdAssigned(_))));
        assert_eq!(state.status, "Registered as Player 3. Waiting in lobby...");
    }

    #[test]
    fn lobby_status_updates_readiness() {
        let mut state = GameState::default();
        assert_eq!(state.readiness(), None);

        state.apply(lobby(2, 4));

        assert_eq!(state.readiness().as_deref(), Some("2/4"));
        assert_eq!(state.status, "Lobby: 2/4 ready (min: 4)");
    }

    #[test]
    fn role_assignment_clears_previous_game() {
        let mut state = GameState::default();
        state.apply(ServerEvent::GameOver(GameOver {
            winner: "civilians".to_string(),
            mafia: vec!["Bob".to_string()],
        }));
        state.apply(ServerEvent::Restart(RestartStatus {
            restart_count: 1,
            total_count: 4,
            players: BTreeMap::new(),
        }));

        state.apply(ServerEvent::RoleAssigned {
            role: Role::Doctor,
            player: Some("Alice".to_string()),
        });

        assert_eq!(state.role, Some(Role::Doctor));
        assert!(state.game_over.is_none());
        assert!(state.restart.is_none());
        assert_eq!(state.status, "You are Alice - Role: DOCTOR");
    }

    #[test]
    fn mafia_victory_resets_role() {
        let mut state = GameState::default();
        state.apply(ServerEvent::RoleAssigned {
            role: Role::Civilian,
            player: Some("Alice".to_string()),
        });

        state.apply(ServerEvent::GameOver(GameOver {
            winner: "mafia".to_string(),
            mafia: vec!["Bob".to_string()],
        }));

        assert!(state.status.contains("MAFIA WIN"));
        assert!(state.role.is_none());
        assert!(state.restart.is_none());
        assert_eq!(state.game_over.as_ref().map(|g| g.mafia.len()), Some(1));
    }

    #[test]
    fn phase_change_keeps_status() {
        let mut state = GameState::default();
        state.apply(lobby(1, 4));

        let effects = state.apply(ServerEvent::PhaseChanged(Phase::HeadsDown));

        assert!(effects.is_empty());
        assert_eq!(state.phase, Some(Phase::HeadsDown));
        assert_eq!(state.status, "Lobby: 1/4 ready (min: 4)");
    }

    #[test]
    fn heads_down_before_any_report_answers_down() {
        let mut state = GameState::default();

        let effects = state.apply(ServerEvent::HeadsDown);

        assert_eq!(effects, vec![Effect::Send(OutboundAction::Head(HeadPosition::Down))]);
    }

    #[test]
    fn heads_down_resends_current_position() {
        let mut state = GameState::default();
        state.set_head(HeadPosition::Up);

        let effects = state.apply(ServerEvent::HeadsDown);

        assert_eq!(effects, vec![Effect::Send(OutboundAction::Head(HeadPosition::Up))]);
    }

    #[test]
    fn vote_narration_covers_tie_and_empty() {
        let mut state = GameState::default();

        state.apply(ServerEvent::VoteResult(vec!["Bob".to_string(), "Carol".to_string()]));
        assert_eq!(state.status, "Vote tied between Bob, Carol.");

        state.apply(ServerEvent::VoteResult(Vec::new()));
        assert_eq!(state.status, "Vote over. No votes were cast.");

        state.apply(ServerEvent::NightResult(NightResult {
            killed: Some("Dave".to_string()),
            saved: None,
        }));
        assert!(state.status.contains("Dave was killed"));
    }

    #[test]
    fn reconnect_reset_keeps_player_id() {
        let mut state = GameState::default();
        state.apply(ServerEvent::IdRegistered { player: 2 });
        state.apply(lobby(3, 4));
        state.apply(ServerEvent::RoleAssigned {
            role: Role::Mafia,
            player: None,
        });
        state.apply(ServerEvent::PhaseChanged(Phase::Vote));

        state.reset_for_reconnect();

        assert_eq!(state.player_id, Some(2));
        assert!(state.role.is_none());
        assert!(state.lobby.is_none());
        assert!(state.phase.is_none());
        assert!(state.status.is_empty());
    }

    #[test]
    fn unknown_action_is_ignored() {
        let mut state = GameState::default();
        let before = state.clone();

        let effects = state.apply(ServerEvent::Unknown("dance".to_string()));

        assert!(effects.is_empty());
        assert_eq!(state, before);
    }
}
