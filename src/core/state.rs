//! 状态定义：UiState 投影与本地对话视图
//!
//! UI 只持有轻量的 UiState（阶段、历史、锁、错误）；本地视图由编排器维护并投影到 UiState。
//! 本地视图按命令模式更新：先放入“待确认”条目，持久化结果返回后再确认或标记延后。

use serde::Serialize;

use crate::memory::Exchange;

/// 一轮对话所处阶段（UI 投影用）
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub enum ExchangePhase {
    #[default]
    Idle,
    SendingUserMessage,
    AwaitingChatReply,
    PersistingReply,
    RequestingNarration,
    Failed,
}

/// 本地条目的持久化状态
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum EntryStatus {
    /// 已显示，持久化尚未返回
    Pending,
    Confirmed,
    /// 离线时写入失败，等待联网后补写
    Deferred,
}

#[derive(Clone, Debug, Serialize)]
pub struct LocalEntry {
    pub local_id: u64,
    pub exchange: Exchange,
    pub status: EntryStatus,
}

/// 本地对话视图
#[derive(Clone, Debug, Default, Serialize)]
pub struct LocalTranscript {
    entries: Vec<LocalEntry>,
    next_id: u64,
}

impl LocalTranscript {
    pub fn new() -> Self {
        Self::default()
    }

    /// 放入一条待确认的发言，返回本地 ID
    pub fn apply_tentative(&mut self, exchange: Exchange) -> u64 {
        self.next_id += 1;
        let local_id = self.next_id;
        self.entries.push(LocalEntry {
            local_id,
            exchange,
            status: EntryStatus::Pending,
        });
        local_id
    }

    pub fn confirm(&mut self, local_id: u64) -> bool {
        self.set_status(local_id, EntryStatus::Confirmed)
    }

    pub fn defer(&mut self, local_id: u64) -> bool {
        self.set_status(local_id, EntryStatus::Deferred)
    }

    fn set_status(&mut self, local_id: u64, status: EntryStatus) -> bool {
        match self.entries.iter_mut().find(|e| e.local_id == local_id) {
            Some(entry) => {
                entry.status = status;
                true
            }
            None => false,
        }
    }

    pub fn status(&self, local_id: u64) -> Option<EntryStatus> {
        self.entries
            .iter()
            .find(|e| e.local_id == local_id)
            .map(|e| e.status)
    }

    pub fn entries(&self) -> &[LocalEntry] {
        &self.entries
    }

    /// 所有已显示的发言（含待确认与延后），用于组装聊天请求
    pub fn exchanges(&self) -> impl Iterator<Item = &Exchange> {
        self.entries.iter().map(|e| &e.exchange)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// 用已持久化的记录重置视图（切换到另一个对话时）
    pub fn reset_with(&mut self, persisted: Vec<Exchange>) {
        self.entries.clear();
        for exchange in persisted {
            self.next_id += 1;
            self.entries.push(LocalEntry {
                local_id: self.next_id,
                exchange,
                status: EntryStatus::Confirmed,
            });
        }
    }
}

/// UI 看到的「投影」状态，轻量且易于渲染
#[derive(Clone, Debug, Serialize)]
pub struct UiState {
    pub phase: ExchangePhase,
    pub conversation_id: Option<String>,
    pub history: Vec<LocalEntry>,
    /// 一轮进行中时禁止再次提交
    pub input_locked: bool,
    /// 可关闭的错误横幅
    pub error_message: Option<String>,
    /// 离线提示（只显示一次性说明，不逐条报错）
    pub offline_notice: Option<String>,
}

impl Default for UiState {
    fn default() -> Self {
        Self {
            phase: ExchangePhase::default(),
            conversation_id: None,
            history: Vec::new(),
            input_locked: false,
            error_message: None,
            offline_notice: None,
        }
    }
}
