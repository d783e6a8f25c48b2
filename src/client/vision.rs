//! 머리 위치 추정
//!
//! 얼굴 랜드마크 추론 자체는 외부 모델 몫이다. 여기서는 랜드마크에서 위/아래를 판정하고
//! 변화만 알리며, 추론이 밀리면 프레임을 버린다.

use crate::protocol::game::{HeadPosition, OutboundAction};
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;

pub const NOSE: usize = 1;
pub const CHIN: usize = 152;
pub const FOREHEAD: usize = 10;

/// 코 위치가 머리 높이의 이 비율보다 위면 고개를 든 것으로 본다
pub const HEAD_UP_RATIO: f32 = 0.666;

/// 정규화된 랜드마크 좌표 (y는 아래로 증가)
#[derive(Debug, Clone, Copy, PartialEq, Default, Deserialize)]
#[serde(default)]
pub struct Landmark {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

/// 추론 결과 한 프레임. 첫 번째 얼굴만 쓴다
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FaceFrame {
    pub faces: Vec<Vec<Landmark>>,
}

pub trait PoseEstimator: Send {
    fn consume(&mut self, frame: &FaceFrame) -> Option<HeadPosition>;
}

/// 코/턱/이마 랜드마크 비율로 판정
#[derive(Debug, Default, Clone)]
pub struct LandmarkPoseEstimator;

impl PoseEstimator for LandmarkPoseEstimator {
    fn consume(&mut self, frame: &FaceFrame) -> Option<HeadPosition> {
        let landmarks = frame.faces.first()?;
        let nose = landmarks.get(NOSE)?;
        let chin = landmarks.get(CHIN)?;
        let forehead = landmarks.get(FOREHEAD)?;

        let head_height = chin.y - forehead.y;
        let nose_relative = nose.y - forehead.y;

        if nose_relative < head_height * HEAD_UP_RATIO {
            Some(HeadPosition::Up)
        } else {
            Some(HeadPosition::Down)
        }
    }
}

/// 바뀐 경우에만 위치를 돌려준다. 처음 상태는 unknown
#[derive(Debug, Default)]
pub struct HeadTracker {
    last: Option<HeadPosition>,
}

impl HeadTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, position: HeadPosition) -> Option<HeadPosition> {
        if self.last == Some(position) {
            return None;
        }
        self.last = Some(position);
        Some(position)
    }

    pub fn current(&self) -> Option<HeadPosition> {
        self.last
    }
}

/// 동시에 하나의 추론만 허용. 바쁘면 프레임을 버린다
#[derive(Debug, Clone, Default)]
pub struct InferenceGate {
    busy: Arc<AtomicBool>,
}

/// 추론이 끝나면 drop해서 게이트를 연다
#[derive(Debug)]
pub struct InferenceTicket {
    busy: Arc<AtomicBool>,
}

impl InferenceGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_begin(&self) -> Option<InferenceTicket> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| InferenceTicket {
                busy: self.busy.clone(),
            })
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

impl Drop for InferenceTicket {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}

enum HeadInput {
    Frame(FaceFrame, InferenceTicket),
    Manual(HeadPosition),
}

/// 프레임 → 게이트 → 추정기 → 트래커 → Head 액션
///
/// 수동 입력도 같은 트래커를 거치므로 같은 위치는 두 번 보내지 않는다.
pub struct HeadPipeline {
    gate: InferenceGate,
    input: UnboundedSender<HeadInput>,
    task: JoinHandle<()>,
}

impl HeadPipeline {
    pub fn spawn<E>(estimator: E, actions: UnboundedSender<OutboundAction>) -> Self
    where
        E: PoseEstimator + 'static,
    {
        let (input, input_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_pipeline(estimator, input_rx, actions));
        Self {
            gate: InferenceGate::new(),
            input,
            task,
        }
    }

    /// 추론 중이면 프레임을 버리고 false
    pub fn submit(&self, frame: FaceFrame) -> bool {
        let Some(ticket) = self.gate.try_begin() else {
            tracing::trace!("Inference busy, dropping frame");
            return false;
        };
        self.input.send(HeadInput::Frame(frame, ticket)).is_ok()
    }

    pub fn report(&self, position: HeadPosition) {
        let _ = self.input.send(HeadInput::Manual(position));
    }

    pub async fn shutdown(self) {
        drop(self.input);
        if let Err(e) = self.task.await {
            tracing::error!("Head pipeline task failed: {}", e);
        }
    }
}

async fn run_pipeline<E: PoseEstimator>(
    mut estimator: E,
    mut input: UnboundedReceiver<HeadInput>,
    actions: UnboundedSender<OutboundAction>,
) {
    let mut tracker = HeadTracker::new();

    while let Some(sample) = input.recv().await {
        let position = match sample {
            HeadInput::Frame(frame, ticket) => {
                let position = estimator.consume(&frame);
                drop(ticket);
                position
            }
            HeadInput::Manual(position) => Some(position),
        };

        let Some(changed) = position.and_then(|p| tracker.observe(p)) else {
            continue;
        };
        tracing::info!(head = changed.as_action(), "Head position changed");
        if actions.send(OutboundAction::Head(changed)).is_err() {
            break;
        }
    }
}
