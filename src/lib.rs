//! Rehearsal - 客服角色扮演训练的对话管线
//!
//! 模块划分：
//! - **audio**: 语音播放队列与输出端（静音、自动播放能力探测）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 一轮对话的编排、状态投影、错误恢复、网络恢复补写
//! - **llm**: 聊天客户端抽象与实现（OpenAI 兼容 / DeepSeek / Mock），带退避的调用执行器
//! - **memory**: 发言模型与只追加的对话记录存储（内存 / SQLite / HTTP）
//! - **narration**: 语音合成（OpenAI TTS / Mock）
//! - **observability**: 日志
//! - **scenario**: 场景与人设加载，生成指令上下文
//! - **session**: 会话存储与空闲清理

pub mod audio;
pub mod config;
pub mod core;
pub mod llm;
pub mod memory;
pub mod narration;
pub mod observability;
pub mod scenario;
pub mod session;
