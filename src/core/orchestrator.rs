//! 对话编排器：一轮“学员 → 模拟客户”的状态机
//!
//! Idle → SendingUserMessage → AwaitingChatReply → PersistingReply → RequestingNarration → Idle，
//! 任一步失败进入 Failed。每次状态变化都投影为 UiState 推送给 UI。
//!
//! 编排器不合并、不去重并发的 `send_turn`；一轮进行中时由调用方（UI）禁止再次提交。

use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::watch;

use crate::audio::{AudioPlaybackQueue, AudioSegment};
use crate::core::connectivity::{ConnectivityEvent, ConnectivityMonitor, PendingExchange, ReplayReport, OFFLINE_NOTICE};
use crate::core::{ExchangePhase, LocalTranscript, RecoveryEngine, TrainerError, UiState};
use crate::llm::{classify_provider_error, LlmClient, RetryExecutor};
use crate::memory::{build_chat_request, Exchange, TranscriptStore};
use crate::narration::NarrationProvider;
use crate::scenario::TrainingBrief;
use crate::session::SessionStore;

/// 一轮对话的结果
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub conversation_id: String,
    pub assistant_text: String,
    /// 播报成功时的音频片段（已放入播放队列）
    pub audio: Option<AudioSegment>,
}

/// 编排器内部的本地视图
#[derive(Debug, Default)]
struct View {
    phase: ExchangePhase,
    conversation_id: Option<String>,
    transcript: LocalTranscript,
    error_message: Option<String>,
    offline_notice: Option<String>,
    input_locked: bool,
}

impl View {
    fn project(&self) -> UiState {
        UiState {
            phase: self.phase,
            conversation_id: self.conversation_id.clone(),
            history: self.transcript.entries().to_vec(),
            input_locked: self.input_locked,
            error_message: self.error_message.clone(),
            offline_notice: self.offline_notice.clone(),
        }
    }
}

/// 对话编排器
pub struct ExchangeOrchestrator {
    sessions: Arc<SessionStore>,
    chat: Arc<dyn LlmClient>,
    narrator: Option<Arc<dyn NarrationProvider>>,
    transcripts: Arc<dyn TranscriptStore>,
    connectivity: Arc<ConnectivityMonitor>,
    audio: Option<AudioPlaybackQueue>,
    brief: TrainingBrief,
    executor: RetryExecutor,
    recovery: RecoveryEngine,
    view: Mutex<View>,
    state_tx: watch::Sender<UiState>,
}

impl ExchangeOrchestrator {
    pub fn new(
        sessions: Arc<SessionStore>,
        chat: Arc<dyn LlmClient>,
        transcripts: Arc<dyn TranscriptStore>,
        brief: TrainingBrief,
    ) -> Self {
        let (state_tx, _) = watch::channel(UiState::default());
        Self {
            sessions,
            chat,
            narrator: None,
            connectivity: Arc::new(ConnectivityMonitor::new(transcripts.clone())),
            transcripts,
            audio: None,
            brief,
            executor: RetryExecutor::default(),
            recovery: RecoveryEngine::new(),
            view: Mutex::new(View::default()),
            state_tx,
        }
    }

    pub fn with_narrator(mut self, narrator: Arc<dyn NarrationProvider>) -> Self {
        self.narrator = Some(narrator);
        self
    }

    pub fn with_audio(mut self, audio: AudioPlaybackQueue) -> Self {
        self.audio = Some(audio);
        self
    }

    pub fn with_executor(mut self, executor: RetryExecutor) -> Self {
        self.executor = executor;
        self
    }

    /// 替换连通性监控（需与本编排器使用同一个对话记录存储）
    pub fn with_connectivity(mut self, connectivity: Arc<ConnectivityMonitor>) -> Self {
        self.connectivity = connectivity;
        self
    }

    pub fn audio(&self) -> Option<&AudioPlaybackQueue> {
        self.audio.as_ref()
    }

    pub fn connectivity(&self) -> &Arc<ConnectivityMonitor> {
        &self.connectivity
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    pub fn subscribe(&self) -> watch::Receiver<UiState> {
        self.state_tx.subscribe()
    }

    /// 当前 UI 状态
    pub fn state(&self) -> UiState {
        self.lock_view().project()
    }

    /// 执行一轮对话
    pub async fn send_turn(
        &self,
        trainee_text: &str,
        conversation_id: Option<&str>,
    ) -> Result<TurnOutcome, TrainerError> {
        let text = trainee_text.trim();
        if text.is_empty() {
            let err = TrainerError::EmptyMessage;
            self.fail(&err);
            return Err(err);
        }

        // 1. 学员发言：先显示，再持久化
        self.update(|v| {
            v.phase = ExchangePhase::SendingUserMessage;
            v.input_locked = true;
            v.error_message = None;
        });

        let session = self
            .sessions
            .resolve(conversation_id, || self.brief.instruction_context())
            .await;
        let conversation_id = session.id.clone();
        self.switch_view(&conversation_id, session.created).await;

        let trainee = Exchange::trainee(text);
        let trainee_local = self.update(|v| v.transcript.apply_tentative(trainee.clone()));
        self.persist(&conversation_id, trainee, trainee_local).await;

        // 2. 请求聊天服务：指令上下文 + 全部既往对话（含本轮）
        let messages = {
            let mut view = self.lock_view();
            view.phase = ExchangePhase::AwaitingChatReply;
            build_chat_request(&session.instruction_context, view.transcript.exchanges())
        };
        self.publish();

        let reply = match self
            .executor
            .execute("chat", || self.chat.complete(&messages), classify_provider_error)
            .await
        {
            Ok(reply) => reply,
            Err(failure) => {
                tracing::warn!(
                    conversation_id = %conversation_id,
                    attempts = failure.attempts(),
                    error = %failure.last_error(),
                    "chat call failed"
                );
                let err = TrainerError::from(failure);
                self.fail(&err);
                return Err(err);
            }
        };

        // 3. 持久化模拟客户的回复（只在调用成功后写一次）
        let assistant = Exchange::character(reply.clone());
        let assistant_local = self.update(|v| {
            v.phase = ExchangePhase::PersistingReply;
            v.transcript.apply_tentative(assistant.clone())
        });
        self.persist(&conversation_id, assistant, assistant_local).await;

        // 4. 可选播报；失败不影响本轮
        let audio = self.narrate(&conversation_id, &reply).await;

        self.update(|v| {
            v.phase = ExchangePhase::Idle;
            v.input_locked = false;
        });

        Ok(TurnOutcome {
            conversation_id,
            assistant_text: reply,
            audio,
        })
    }

    /// 处理网络状态事件，补写成功的条目在本地视图中确认
    pub async fn on_connectivity(&self, event: ConnectivityEvent) -> ReplayReport {
        let report = self.connectivity.handle(event).await;
        self.update(|v| {
            for id in &report.confirmed_local_ids {
                v.transcript.confirm(*id);
            }
            v.offline_notice = match event {
                ConnectivityEvent::Offline => Some(OFFLINE_NOTICE.to_string()),
                ConnectivityEvent::Online if report.remaining == 0 => None,
                ConnectivityEvent::Online => v.offline_notice.clone(),
            };
        });
        report
    }

    /// 关闭错误横幅
    pub fn dismiss_error(&self) {
        self.update(|v| {
            v.error_message = None;
            if v.phase == ExchangePhase::Failed {
                v.phase = ExchangePhase::Idle;
            }
        });
    }

    /// 切换到另一个对话时，用已持久化的记录重置本地视图
    async fn switch_view(&self, conversation_id: &str, created: bool) {
        let same = self.lock_view().conversation_id.as_deref() == Some(conversation_id);
        if same {
            return;
        }
        let persisted = if created {
            Vec::new()
        } else {
            self.transcripts
                .load(conversation_id)
                .await
                .unwrap_or_else(|e| {
                    tracing::warn!(conversation_id, error = %e, "could not load transcript");
                    Vec::new()
                })
        };
        self.update(|v| {
            v.conversation_id = Some(conversation_id.to_string());
            v.transcript.reset_with(persisted);
        });
    }

    /// 写入对话记录；失败时放入待写缓冲区，本轮继续
    ///
    /// 同一对话有积压时新条目不能越过积压：在线则先补写积压，仍有积压就排到末尾。
    async fn persist(&self, conversation_id: &str, exchange: Exchange, local_id: u64) {
        if self.connectivity.has_pending(conversation_id).await {
            if !self.connectivity.is_offline() {
                let report = self.connectivity.flush().await;
                self.update(|v| {
                    for id in &report.confirmed_local_ids {
                        v.transcript.confirm(*id);
                    }
                });
            }
            if self.connectivity.has_pending(conversation_id).await {
                tracing::debug!(conversation_id, "earlier exchanges still buffered, queueing behind them");
                self.defer(conversation_id, exchange, local_id).await;
                return;
            }
        }

        match self.transcripts.append(conversation_id, &exchange).await {
            Ok(()) => {
                self.update(|v| {
                    v.transcript.confirm(local_id);
                });
            }
            Err(e) => {
                if e.is_offline() {
                    if self.connectivity.mark_offline() {
                        tracing::info!(conversation_id, "storage unreachable, deferring writes");
                    }
                } else {
                    tracing::warn!(conversation_id, error = %e, "transcript write failed, deferring");
                }
                self.defer(conversation_id, exchange, local_id).await;
            }
        }
    }

    /// 放入待写缓冲区；只有确实离线时才显示离线横幅
    async fn defer(&self, conversation_id: &str, exchange: Exchange, local_id: u64) {
        self.connectivity
            .defer(PendingExchange {
                conversation_id: conversation_id.to_string(),
                exchange,
                local_id: Some(local_id),
            })
            .await;
        let offline = self.connectivity.is_offline();
        self.update(|v| {
            v.transcript.defer(local_id);
            if offline {
                v.offline_notice = Some(OFFLINE_NOTICE.to_string());
            }
        });
    }

    async fn narrate(&self, conversation_id: &str, reply: &str) -> Option<AudioSegment> {
        let narrator = self.narrator.as_ref()?;
        self.update(|v| v.phase = ExchangePhase::RequestingNarration);

        match self
            .executor
            .execute("narration", || narrator.synthesize(reply), classify_provider_error)
            .await
        {
            Ok(payload) => {
                let segment = AudioSegment::new(payload, narrator.mime_type());
                if let Some(audio) = &self.audio {
                    audio.enqueue(segment.clone());
                }
                Some(segment)
            }
            Err(failure) => {
                tracing::warn!(
                    conversation_id,
                    attempts = failure.attempts(),
                    error = %failure.last_error(),
                    "narration failed, continuing without audio"
                );
                None
            }
        }
    }

    fn fail(&self, err: &TrainerError) {
        let action = self.recovery.handle(err);
        self.update(|v| {
            v.phase = ExchangePhase::Failed;
            v.input_locked = false;
            v.error_message = Some(action.message().to_string());
        });
    }

    /// 修改本地视图并推送新的 UiState
    fn update<R>(&self, f: impl FnOnce(&mut View) -> R) -> R {
        let (result, state) = {
            let mut view = self.lock_view();
            let result = f(&mut view);
            (result, view.project())
        };
        self.state_tx.send_replace(state);
        result
    }

    fn publish(&self) {
        let state = self.lock_view().project();
        self.state_tx.send_replace(state);
    }

    fn lock_view(&self) -> MutexGuard<'_, View> {
        self.view.lock().unwrap_or_else(|e| e.into_inner())
    }
}
