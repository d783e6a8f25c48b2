//! 애플리케이션 상태 관리

use crate::config::Config;
use crate::protocol::ServerMessage;
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc::UnboundedSender;

/// 전역 애플리케이션 상태
pub struct AppState {
    /// 방 정보 (room name -> Room)
    pub rooms: RoomRegistry,
    /// 연결 정보 (connection id -> Connection)
    pub connections: DashMap<String, Connection>,
    /// 설정
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        Self {
            rooms: RoomRegistry::default(),
            connections: DashMap::new(),
            config: Arc::new(config),
        }
    }

    /// 특정 연결에게 메시지 전송 (없으면 조용히 버림)
    pub fn send_to(&self, connection_id: &str, message: ServerMessage) -> bool {
        match self.connections.get(connection_id) {
            Some(connection) => connection.sender.send(message).is_ok(),
            None => false,
        }
    }
}

/// 연결 정보
pub struct Connection {
    pub id: String,
    /// 현재 참여 중인 방 (최대 하나)
    pub room: Option<String>,
    pub sender: UnboundedSender<ServerMessage>,
    pub connected_at: Instant,
}

impl Connection {
    pub fn new(id: String, sender: UnboundedSender<ServerMessage>) -> Self {
        Self {
            id,
            room: None,
            sender,
            connected_at: Instant::now(),
        }
    }
}

/// 방 정보
#[derive(Debug)]
pub struct Room {
    pub members: HashSet<String>,
    pub created_at: Instant,
}

impl Room {
    fn new() -> Self {
        Self {
            members: HashSet::new(),
            created_at: Instant::now(),
        }
    }
}

/// 방 이름 -> 멤버 집합
///
/// 방은 첫 참여 시 생성되고 마지막 멤버가 나가면 바로 삭제된다.
/// DashMap 참조는 메서드 밖으로 새지 않는다.
#[derive(Debug, Default)]
pub struct RoomRegistry {
    rooms: DashMap<String, Room>,
}

impl RoomRegistry {
    /// 방에 참여하고, 참여 전부터 있던 다른 멤버 목록을 반환
    pub fn join(&self, room: &str, member: &str) -> Vec<String> {
        let mut entry = self.rooms.entry(room.to_string()).or_insert_with(|| {
            tracing::info!(room_id = %room, "Room created");
            Room::new()
        });
        let existing = entry
            .members
            .iter()
            .filter(|id| id.as_str() != member)
            .cloned()
            .collect();
        entry.members.insert(member.to_string());
        existing
    }

    /// 방에서 나가고 남은 멤버 목록을 반환. 비면 방 삭제
    pub fn leave(&self, room: &str, member: &str) -> Vec<String> {
        let remaining: Vec<String> = match self.rooms.get_mut(room) {
            Some(mut entry) => {
                entry.members.remove(member);
                entry.members.iter().cloned().collect()
            }
            None => return Vec::new(),
        };

        if remaining.is_empty() && self.rooms.remove_if(room, |_, r| r.members.is_empty()).is_some() {
            tracing::info!(room_id = %room, "Room deleted");
        }
        remaining
    }

    pub fn members(&self, room: &str) -> Vec<String> {
        self.rooms
            .get(room)
            .map(|entry| entry.members.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn contains(&self, room: &str, member: &str) -> bool {
        self.rooms
            .get(room)
            .map(|entry| entry.members.contains(member))
            .unwrap_or(false)
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// 살아있지 않은 멤버를 정리하고 빈 방을 삭제. 제거된 멤버 수 반환
    pub fn prune(&self, is_live: impl Fn(&str) -> bool) -> usize {
        let mut pruned = 0;
        self.rooms.retain(|room_id, room| {
            let before = room.members.len();
            room.members.retain(|member| is_live(member));
            pruned += before - room.members.len();
            if room.members.is_empty() {
                let age_secs = room.created_at.elapsed().as_secs();
                tracing::info!(room_id = %room_id, age_secs, "Cleaned up empty room");
                false
            } else {
                true
            }
        });
        pruned
    }
}
