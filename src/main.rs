//! Rehearsal - 客服角色扮演训练（终端版）
//!
//! 入口：初始化日志、加载配置与场景、组装编排器，读取学员输入并驱动对话。
//! 命令：/mute 切换静音，/play 手动播放，/dismiss 关闭错误提示，/quit 退出。

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use rehearsal::config::{load_config, AppConfig};
use rehearsal::core::{spawn_probe, ConnectivityEvent, ExchangeOrchestrator, TrainerBuilder};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rehearsal::observability::init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let cfg = load_config(config_path).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        AppConfig::default()
    });

    let builder = TrainerBuilder::new(cfg.clone());
    let brief = builder.load_brief().await.context("Failed to load scenario")?;
    let orchestrator = Arc::new(
        builder
            .build(brief.clone())
            .await
            .context("Failed to build trainer")?,
    );

    let cancel = CancellationToken::new();
    let sweeper = Arc::clone(orchestrator.sessions()).spawn_sweeper(
        Duration::from_secs(cfg.app.sweep_interval_secs.max(1)),
        cancel.clone(),
    );

    // 连通性探测：状态变化时触发离线提示或补写
    let (event_tx, mut event_rx) = mpsc::channel::<ConnectivityEvent>(8);
    let probe_target = cfg.probe_target();
    if probe_target.is_none() && cfg.storage.backend == "http" {
        tracing::warn!("http storage has no usable base_url; connectivity probe disabled");
    }
    let probe = probe_target.map(|target| {
        tracing::info!(target = %target, "connectivity probe started");
        spawn_probe(
            target,
            Duration::from_secs(cfg.connectivity.probe_interval_secs.max(1)),
            event_tx.clone(),
            cancel.clone(),
        )
    });
    let replayer = {
        let orchestrator = Arc::clone(&orchestrator);
        tokio::spawn(async move {
            while let Some(event) = event_rx.recv().await {
                let report = orchestrator.on_connectivity(event).await;
                if report.persisted > 0 {
                    println!("[saved {} deferred message(s)]", report.persisted);
                }
            }
        })
    };

    println!("Scenario: {} (customer: {})", brief.scenario.title, brief.persona.name);
    println!("Type your reply. Commands: /mute /play /dismiss /quit");

    run_repl(&orchestrator).await?;

    cancel.cancel();
    drop(event_tx);
    let _ = sweeper.await;
    if let Some(probe) = probe {
        let _ = probe.await;
    }
    let _ = replayer.await;
    Ok(())
}

async fn run_repl(orchestrator: &ExchangeOrchestrator) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut conversation_id: Option<String> = None;

    while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
        match line.trim() {
            "/quit" => break,
            "/mute" => match orchestrator.audio() {
                Some(audio) => {
                    let muted = audio.toggle_mute();
                    println!("[audio {}]", if muted { "muted" } else { "unmuted" });
                }
                None => println!("[narration is not configured]"),
            },
            "/play" => {
                if let Some(audio) = orchestrator.audio() {
                    let played = audio.manual_play().await;
                    println!("[played {played} segment(s)]");
                }
            }
            "/dismiss" => orchestrator.dismiss_error(),
            text => match orchestrator.send_turn(text, conversation_id.as_deref()).await {
                Ok(outcome) => {
                    println!("customer> {}", outcome.assistant_text);
                    conversation_id = Some(outcome.conversation_id);
                }
                Err(e) => println!("[!] {}", orchestrator.state().error_message.unwrap_or_else(|| e.to_string())),
            },
        }

        let state = orchestrator.state();
        if let Some(notice) = state.offline_notice {
            println!("[offline] {notice}");
        }
        if let Some(audio) = orchestrator.audio() {
            if audio.snapshot().awaiting_gesture {
                println!("[audio ready, type /play to listen]");
            }
        }
    }
    Ok(())
}
