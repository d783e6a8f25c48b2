//! 헤드리스 플레이어 클라이언트
//!
//! 릴레이 연결과 피어 세션, 미디어 획득, 게임 서버 링크를 묶는다.

pub mod game_link;
pub mod game_state;
pub mod media;
pub mod peer;
pub mod probe;
pub mod relay_link;
pub mod session;
pub mod status;
pub mod vision;
pub mod voice;

pub use game_link::GameLink;
pub use game_state::GameState;
pub use relay_link::RelayLink;
pub use session::{SessionCommand, SessionManager};
pub use status::StatusLine;
