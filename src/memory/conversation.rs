//! 对话记录：Exchange（持久化单元）与 Message（发给 LLM 的消息）
//!
//! Exchange 是训练对话中的一轮发言（学员或模拟角色），创建后不可变；
//! 调用聊天服务时再转换为 Message（与 LLM API 的 role/content 一致）。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 消息角色（与 LLM API 一致）
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    User,
    Assistant,
    System,
}

/// 发给聊天服务的单条消息
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }
}

/// 发言方：学员 / 模拟角色
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Speaker {
    Trainee,
    Character,
}

impl Speaker {
    pub fn as_str(&self) -> &'static str {
        match self {
            Speaker::Trainee => "trainee",
            Speaker::Character => "character",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "trainee" => Some(Speaker::Trainee),
            "character" => Some(Speaker::Character),
            _ => None,
        }
    }
}

/// 一轮发言；追加到对话记录后不再修改
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Exchange {
    pub role: Speaker,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl Exchange {
    pub fn trainee(content: impl Into<String>) -> Self {
        Self {
            role: Speaker::Trainee,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn character(content: impl Into<String>) -> Self {
        Self {
            role: Speaker::Character,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    /// 转为 LLM 消息：学员 → user，模拟角色 → assistant
    pub fn to_message(&self) -> Message {
        match self.role {
            Speaker::Trainee => Message::user(self.content.clone()),
            Speaker::Character => Message::assistant(self.content.clone()),
        }
    }
}

/// 组装一次聊天请求：系统指令 + 既往对话 + 本轮学员输入
pub fn build_chat_request<'a>(
    instruction_context: &str,
    history: impl IntoIterator<Item = &'a Exchange>,
) -> Vec<Message> {
    std::iter::once(Message::system(instruction_context))
        .chain(history.into_iter().map(Exchange::to_message))
        .collect()
}
