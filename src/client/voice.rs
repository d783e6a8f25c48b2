//! 음성 명령 인식
//!
//! 음성 인식기가 넘겨준 문장을 소문자로 바꿔 구문 표와 부분 문자열로 비교한다.
//! 인식기가 자주 틀리는 발음 변형도 표에 같이 둔다.

use crate::protocol::game::OutboundAction;

/// 표 순서대로 비교하고 처음 맞는 항목을 쓴다
pub const PHRASES: &[(&str, u8)] = &[
    ("ready to start", 1),
    ("ready start", 1),
    ("start game", 1),
    ("start", 1),
    ("assign players", 2),
    ("assign play", 2),
    ("find players", 2),
    ("sign players", 2),
    ("assigned players", 2),
    ("ready to vote", 3),
    ("navigate to vote", 3),
    ("ready to vogt", 3),
    ("night time", 4),
    ("night times", 4),
    ("nite times", 4),
    ("nite time", 4),
];

/// 인식된 명령
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoiceCommand {
    pub code: u8,
    pub phrase: &'static str,
}

impl VoiceCommand {
    pub fn to_action(&self) -> OutboundAction {
        OutboundAction::VoiceCommand(self.code)
    }
}

#[derive(Debug, Clone)]
pub struct CommandRecognizer {
    phrases: &'static [(&'static str, u8)],
}

impl Default for CommandRecognizer {
    fn default() -> Self {
        Self { phrases: PHRASES }
    }
}

impl CommandRecognizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn consume(&self, transcript: &str) -> Option<VoiceCommand> {
        let transcript = transcript.to_lowercase();
        let matched = self
            .phrases
            .iter()
            .find(|(phrase, _)| transcript.contains(phrase))
            .map(|&(phrase, code)| VoiceCommand { code, phrase });

        match &matched {
            Some(command) => {
                tracing::info!(phrase = command.phrase, code = command.code, "Voice command recognized")
            }
            None => tracing::debug!(transcript = %transcript, "No voice command in transcript"),
        }
        matched
    }
}
