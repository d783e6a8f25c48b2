//! Smart Mafia 헤드리스 플레이어
//!
//! 표준 입력으로 조작한다: ready, restart, mute, up, down, quit.
//! `{`로 시작하는 줄은 얼굴 랜드마크 프레임(JSON)으로 머리 위치 추정에 넘긴다.
//! 그 밖의 줄은 음성 인식 결과로 보고 명령을 찾는다.

use anyhow::Context;
use smart_mafia::client::media::{start_camera, start_test_video, DeviceCamera, LocalMedia, MemoryTabStorage};
use smart_mafia::client::probe::ProbeConnector;
use smart_mafia::client::session::PlayerInfo;
use smart_mafia::client::vision::{FaceFrame, HeadPipeline, LandmarkPoseEstimator};
use smart_mafia::client::voice::CommandRecognizer;
use smart_mafia::client::{GameLink, RelayLink, SessionCommand, SessionManager, StatusLine};
use smart_mafia::config::{MediaMode, PlayerConfig};
use smart_mafia::protocol::game::{HeadPosition, OutboundAction};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = PlayerConfig::from_env();

    // 로깅 초기화
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(&config.log_level))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("🎭 Smart Mafia player starting");
    tracing::info!("Player: {}", config.player_name);
    tracing::info!("Room: {}", config.room);

    let status = StatusLine::new();
    let mut media = acquire_media(&config, &status).await?;

    let game = GameLink::spawn(
        config.game_server_url(),
        config.player_name.clone(),
        config.reconnect,
        status.clone(),
    );

    // 비디오 릴레이는 없어도 게임은 진행할 수 있다
    let video = match RelayLink::connect(&config.relay_url, &config.room, &status).await {
        Ok((relay, relay_rx)) => {
            let (manager, events_rx) =
                SessionManager::new(Arc::new(ProbeConnector), media.stream(), relay.sender());
            let mut streams = manager.remote_streams();
            let (session_tx, session_rx) = mpsc::unbounded_channel();
            let session_task = tokio::spawn(manager.run(relay_rx, events_rx, session_rx));

            tokio::spawn(async move {
                while streams.changed().await.is_ok() {
                    let views = streams.borrow_and_update().clone();
                    tracing::info!(count = views.len(), "Remote streams updated");
                    for view in views {
                        tracing::info!(
                            socket_id = %view.socket_id,
                            tracks = view.track_count,
                            name = view.player_name.as_deref().unwrap_or("unknown"),
                            "Remote stream"
                        );
                    }
                }
            });

            // 게임 서버에서 받은 번호를 피어들에게 알린다
            let mut game_state = game.state();
            let forward_tx = session_tx.clone();
            let player_name = config.player_name.clone();
            tokio::spawn(async move {
                let mut forwarded = None;
                while game_state.changed().await.is_ok() {
                    let player_id = game_state.borrow_and_update().player_id;
                    if let Some(id) = player_id {
                        if forwarded != Some(id) {
                            forwarded = Some(id);
                            let info = PlayerInfo {
                                name: player_name.clone(),
                                id,
                            };
                            if forward_tx.send(SessionCommand::SetLocalPlayer(info)).is_err() {
                                break;
                            }
                        }
                    }
                }
            });

            Some((relay, session_tx, session_task))
        }
        Err(e) => {
            tracing::error!("Video relay unavailable: {}", e);
            None
        }
    };

    let head = HeadPipeline::spawn(LandmarkPoseEstimator, game.commands());
    let recognizer = CommandRecognizer::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let line = match line.context("failed to read stdin")? {
                    Some(line) => line,
                    None => break,
                };
                let line = line.trim();
                match line {
                    "" => {}
                    "quit" => break,
                    "ready" => game.send(OutboundAction::Ready),
                    "restart" => game.send(OutboundAction::Restart),
                    "mute" => {
                        let muted = media.toggle_mute();
                        tracing::info!(muted = muted, "Microphone toggled");
                    }
                    "up" => head.report(HeadPosition::Up),
                    "down" => head.report(HeadPosition::Down),
                    frame if frame.starts_with('{') => match serde_json::from_str::<FaceFrame>(frame) {
                        Ok(frame) => {
                            head.submit(frame);
                        }
                        Err(e) => tracing::warn!("Ignoring malformed landmark frame: {}", e),
                    },
                    transcript => {
                        if let Some(command) = recognizer.consume(transcript) {
                            game.send(command.to_action());
                        }
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted");
                break;
            }
        }
    }

    tracing::info!("Shutting down");
    head.shutdown().await;
    if let Some((relay, session_tx, session_task)) = video {
        let _ = session_tx.send(SessionCommand::Shutdown);
        if let Err(e) = session_task.await {
            tracing::error!("Session task failed: {}", e);
        }
        relay.shutdown().await;
    }
    game.shutdown().await;
    media.stop();

    Ok(())
}

async fn acquire_media(config: &PlayerConfig, status: &StatusLine) -> anyhow::Result<LocalMedia> {
    match config.media_mode {
        MediaMode::Camera => {
            let camera = DeviceCamera::new(&config.camera_device);
            start_camera(&camera, status)
                .await
                .with_context(|| format!("failed to open camera {}", config.camera_device))
        }
        MediaMode::Synthetic => {
            let storage = MemoryTabStorage::default();
            Ok(start_test_video(&storage, &mut rand::thread_rng(), status))
        }
    }
}
