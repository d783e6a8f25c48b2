//! 로컬 미디어 획득 (카메라 / 합성 테스트 영상)
//!
//! 두 방식 중 하나만 세션 시작 전에 선택한다. 트랙은 여러 피어 세션이 읽기 전용으로 공유하고,
//! enabled/stopped 플래그는 이 모듈만 바꾼다.

use crate::client::status::StatusLine;
use crate::error::CaptureError;
use async_trait::async_trait;
use rand::Rng;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use uuid::Uuid;

pub const CAPTURE_WIDTH: u32 = 640;
pub const CAPTURE_HEIGHT: u32 = 480;
pub const SYNTHETIC_FPS: u32 = 30;

/// 탭 단위로 고정되는 테스트 영상 키
pub const TAB_VIDEO_KEY: &str = "tabVideo";
pub const TEST_CLIPS: [&str; 2] = ["/vid1.mp4", "/vid2.mp4"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Audio,
    Video,
}

impl TrackKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackKind::Audio => "audio",
            TrackKind::Video => "video",
        }
    }
}

struct TrackInner {
    id: String,
    kind: TrackKind,
    label: String,
    enabled: AtomicBool,
    stopped: AtomicBool,
    frames: AtomicU64,
}

/// 미디어 트랙 핸들 (복제해도 같은 트랙을 가리킴)
#[derive(Clone)]
pub struct MediaTrack {
    inner: Arc<TrackInner>,
}

impl MediaTrack {
    pub fn new(kind: TrackKind, label: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(TrackInner {
                id: Uuid::new_v4().to_string(),
                kind,
                label: label.into(),
                enabled: AtomicBool::new(true),
                stopped: AtomicBool::new(false),
                frames: AtomicU64::new(0),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn kind(&self) -> TrackKind {
        self.inner.kind
    }

    pub fn label(&self) -> &str {
        &self.inner.label
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::SeqCst)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.inner.enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn stop(&self) {
        self.inner.stopped.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::SeqCst)
    }

    pub fn frames_delivered(&self) -> u64 {
        self.inner.frames.load(Ordering::SeqCst)
    }

    fn record_frame(&self) {
        self.inner.frames.fetch_add(1, Ordering::SeqCst);
    }
}

impl std::fmt::Debug for MediaTrack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaTrack")
            .field("id", &self.inner.id)
            .field("kind", &self.inner.kind)
            .field("enabled", &self.is_enabled())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

/// 트랙 묶음 (로컬/원격 공통)
#[derive(Debug, Clone)]
pub struct MediaStream {
    pub id: String,
    pub tracks: Vec<MediaTrack>,
}

impl MediaStream {
    pub fn new(tracks: Vec<MediaTrack>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            tracks,
        }
    }

    pub fn stop_all(&self) {
        for track in &self.tracks {
            tracing::debug!(stream_id = %self.id, kind = track.kind().as_str(), "Stopping track");
            track.stop();
        }
    }
}

/// 현재 세션의 로컬 미디어 (세션당 하나)
pub struct LocalMedia {
    stream: MediaStream,
    pump: Option<JoinHandle<()>>,
}

impl LocalMedia {
    fn new(stream: MediaStream, pump: Option<JoinHandle<()>>) -> Self {
        Self { stream, pump }
    }

    /// 피어 세션에 붙일 스트림 (트랙은 공유)
    pub fn stream(&self) -> MediaStream {
        self.stream.clone()
    }

    pub fn tracks(&self) -> &[MediaTrack] {
        &self.stream.tracks
    }

    /// 오디오 트랙만 enabled를 뒤집는다. 토글 후 음소거 상태를 반환
    pub fn toggle_mute(&self) -> bool {
        let mut muted = false;
        for track in self.stream.tracks.iter().filter(|t| t.kind() == TrackKind::Audio) {
            let enabled = !track.is_enabled();
            track.set_enabled(enabled);
            muted = !enabled;
        }
        muted
    }

    pub fn stop(&mut self) {
        self.stream.stop_all();
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
    }
}

impl Drop for LocalMedia {
    fn drop(&mut self) {
        self.stop();
    }
}

/// 카메라 요청 조건
#[derive(Debug, Clone, Copy)]
pub struct CaptureConstraints {
    pub width: u32,
    pub height: u32,
    pub audio: bool,
}

impl Default for CaptureConstraints {
    fn default() -> Self {
        Self {
            width: CAPTURE_WIDTH,
            height: CAPTURE_HEIGHT,
            audio: true,
        }
    }
}

/// 카메라 장치 추상화
#[async_trait]
pub trait CaptureDevice: Send + Sync {
    async fn open(&self, constraints: CaptureConstraints) -> Result<MediaStream, CaptureError>;
}

/// V4L2 장치 노드 기반 카메라
pub struct DeviceCamera {
    path: PathBuf,
}

impl DeviceCamera {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl CaptureDevice for DeviceCamera {
    async fn open(&self, constraints: CaptureConstraints) -> Result<MediaStream, CaptureError> {
        tokio::fs::OpenOptions::new()
            .read(true)
            .open(&self.path)
            .await
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => CaptureError::NotFound,
                ErrorKind::PermissionDenied => CaptureError::PermissionDenied,
                _ => CaptureError::Other(e.to_string()),
            })?;

        let mut tracks = vec![MediaTrack::new(
            TrackKind::Video,
            format!(
                "{} {}x{}",
                self.path.display(),
                constraints.width,
                constraints.height
            ),
        )];
        if constraints.audio {
            tracks.push(MediaTrack::new(TrackKind::Audio, "default"));
        }
        Ok(MediaStream::new(tracks))
    }
}

/// 카메라 모드 시작
pub async fn start_camera(
    device: &dyn CaptureDevice,
    status: &StatusLine,
) -> Result<LocalMedia, CaptureError> {
    status.set("Requesting camera access...");

    match device.open(CaptureConstraints::default()).await {
        Ok(stream) => {
            tracing::info!(tracks = stream.tracks.len(), "Camera stream obtained");
            status.set("Camera connected!");
            Ok(LocalMedia::new(stream, None))
        }
        Err(e) => {
            status.set(e.user_status());
            Err(e)
        }
    }
}

/// 탭 수명 동안 유지되는 저장소
pub trait TabStorage: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str);
}

/// 프로세스 메모리 기반 탭 저장소
#[derive(Debug, Default)]
pub struct MemoryTabStorage {
    values: Mutex<HashMap<String, String>>,
}

impl TabStorage for MemoryTabStorage {
    fn get(&self, key: &str) -> Option<String> {
        self.values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    fn set(&self, key: &str, value: &str) {
        self.values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), value.to_string());
    }
}

/// 탭마다 테스트 영상 하나를 고정 선택
pub fn select_test_clip<R: Rng + ?Sized>(storage: &dyn TabStorage, rng: &mut R) -> String {
    if let Some(existing) = storage.get(TAB_VIDEO_KEY) {
        return existing;
    }

    let clip = if rng.gen_bool(0.5) {
        TEST_CLIPS[0]
    } else {
        TEST_CLIPS[1]
    };
    storage.set(TAB_VIDEO_KEY, clip);
    clip.to_string()
}

/// 합성 테스트 영상 소스
///
/// 영상 프레임을 고정 프레임레이트로 캔버스 트랙에 흘려보낸다. 트랙이 멈추면 펌프도 끝난다.
pub struct SyntheticSource;

impl SyntheticSource {
    pub fn start(clip: &str, fps: u32) -> LocalMedia {
        let track = MediaTrack::new(
            TrackKind::Video,
            format!("canvas:{} {}x{}", clip, CAPTURE_WIDTH, CAPTURE_HEIGHT),
        );

        let frame_interval = Duration::from_secs(1) / fps.max(1);
        let pump_track = track.clone();
        let pump = tokio::spawn(async move {
            let mut interval = tokio::time::interval(frame_interval);
            loop {
                interval.tick().await;
                if pump_track.is_stopped() {
                    break;
                }
                pump_track.record_frame();
            }
        });

        // 영상 파일 소리 대신 무음 트랙 (음소거 토글 대상)
        let silence = MediaTrack::new(TrackKind::Audio, format!("canvas:{} silence", clip));

        LocalMedia::new(MediaStream::new(vec![track, silence]), Some(pump))
    }
}

/// 합성 모드 시작
pub fn start_test_video<R: Rng + ?Sized>(
    storage: &dyn TabStorage,
    rng: &mut R,
    status: &StatusLine,
) -> LocalMedia {
    let clip = select_test_clip(storage, rng);
    status.set(format!("Loading {}...", clip));

    let media = SyntheticSource::start(&clip, SYNTHETIC_FPS);
    status.set("Test video ready!");
    media
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn av_media() -> LocalMedia {
        LocalMedia::new(
            MediaStream::new(vec![
                MediaTrack::new(TrackKind::Audio, "mic"),
                MediaTrack::new(TrackKind::Video, "cam"),
            ]),
            None,
        )
    }

    #[test]
    fn toggle_mute_flips_audio_only() {
        let media = av_media();

        assert!(media.toggle_mute());
        assert!(!media.tracks()[0].is_enabled());
        assert!(media.tracks()[1].is_enabled());

        assert!(!media.toggle_mute());
        assert!(media.tracks()[0].is_enabled());
        assert!(media.tracks()[1].is_enabled());
    }

    #[test]
    fn mute_is_visible_through_shared_stream() {
        let media = av_media();
        let shared = media.stream();

        media.toggle_mute();

        assert!(!shared.tracks[0].is_enabled());
    }

    #[test]
    fn clip_selection_is_stable_per_tab() {
        let storage = MemoryTabStorage::default();
        let mut rng = StdRng::seed_from_u64(7);

        let first = select_test_clip(&storage, &mut rng);
        for _ in 0..20 {
            assert_eq!(select_test_clip(&storage, &mut rng), first);
        }
        assert!(TEST_CLIPS.contains(&first.as_str()));
    }

    #[test]
    fn separate_tabs_can_pick_either_clip() {
        let mut rng = StdRng::seed_from_u64(42);
        let mut seen = std::collections::HashSet::new();
        for _ in 0..64 {
            let storage = MemoryTabStorage::default();
            seen.insert(select_test_clip(&storage, &mut rng));
        }
        assert_eq!(seen.len(), 2);
    }

    #[tokio::test]
    async fn missing_camera_reports_not_found() {
        let status = StatusLine::new();
        let camera = DeviceCamera::new("/definitely/not/a/camera");

        let err = start_camera(&camera, &status).await.err().unwrap();

        assert!(matches!(err, CaptureError::NotFound));
        assert_eq!(status.current(), "Error: No camera found");
    }

    #[tokio::test]
    async fn camera_mute_disables_captured_audio() {
        let status = StatusLine::new();
        let camera = DeviceCamera::new("/dev/null");

        let media = start_camera(&camera, &status).await.unwrap();
        let kinds: Vec<TrackKind> = media.tracks().iter().map(|t| t.kind()).collect();
        assert_eq!(kinds, vec![TrackKind::Video, TrackKind::Audio]);

        assert!(media.toggle_mute());
        let audio = media.tracks().iter().find(|t| t.kind() == TrackKind::Audio).unwrap();
        let video = media.tracks().iter().find(|t| t.kind() == TrackKind::Video).unwrap();
        assert!(!audio.is_enabled());
        assert!(video.is_enabled());
        assert_eq!(status.current(), "Camera connected!");
    }

    #[tokio::test(start_paused = true)]
    async fn synthetic_source_carries_mutable_audio() {
        let media = SyntheticSource::start(TEST_CLIPS[0], SYNTHETIC_FPS);

        assert!(media.tracks().iter().any(|t| t.kind() == TrackKind::Audio));
        assert!(media.toggle_mute());
        assert!(media.tracks()[0].is_enabled());
    }

    #[test]
    fn capture_errors_have_distinct_statuses() {
        assert_eq!(
            CaptureError::PermissionDenied.user_status(),
            "Error: Camera access denied"
        );
        assert_eq!(
            CaptureError::Other("device busy".to_string()).user_status(),
            "Error: device busy"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn synthetic_pump_stops_with_track() {
        let status = StatusLine::new();
        let storage = MemoryTabStorage::default();
        let mut rng = StdRng::seed_from_u64(1);
        let mut media = start_test_video(&storage, &mut rng, &status);
        assert_eq!(status.current(), "Test video ready!");

        tokio::time::sleep(Duration::from_millis(500)).await;
        let delivered = media.tracks()[0].frames_delivered();
        assert!(delivered >= 10, "only {} frames", delivered);

        let track = media.tracks()[0].clone();
        media.stop();
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(track.is_stopped());
        assert!(track.frames_delivered() <= delivered + 1);
    }
}
