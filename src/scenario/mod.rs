//! 场景系统
//!
//! 场景（Scenario）+ 人设（Persona）组成训练简报（TrainingBrief），用于生成模拟客户的指令上下文。
//! 每个新会话只读取一次。
//!
//! 目录结构：
//! ```text
//! config/scenarios/
//! ├── late_delivery.toml   # [scenario] + [persona]
//! └── ...
//! ```

mod loader;

pub use loader::{Persona, Scenario, ScenarioCache, ScenarioError, ScenarioLoader, TrainingBrief};
