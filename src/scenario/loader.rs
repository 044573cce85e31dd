//! 场景加载器
//!
//! 从 config/scenarios/ 目录加载 *.toml 场景文件并缓存；每个文件包含 [scenario] 与 [persona] 两段。

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;
use thiserror::Error;
use tokio::sync::RwLock;

/// 场景加载错误
#[derive(Error, Debug)]
pub enum ScenarioError {
    #[error("failed to read scenario file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid scenario file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("scenario not found: {0}")]
    NotFound(String),
}

/// 训练场景：学员要处理的情境
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct Scenario {
    pub id: String,
    pub title: String,
    /// 情境描述（发生了什么）
    pub situation: String,
    /// 客户此次想达成的目标
    pub customer_goal: String,
    #[serde(default)]
    pub difficulty: Option<String>,
    /// 客户会主动提出的要点
    #[serde(default)]
    pub talking_points: Vec<String>,
}

/// 模拟客户的人设
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct Persona {
    pub name: String,
    #[serde(default)]
    pub age: Option<u32>,
    #[serde(default)]
    pub occupation: Option<String>,
    /// 性格与情绪基调
    pub temperament: String,
    #[serde(default)]
    pub background: Option<String>,
    #[serde(default)]
    pub quirks: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ScenarioToml {
    scenario: Scenario,
    persona: Persona,
}

/// 场景 + 人设：生成指令上下文的唯一输入
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingBrief {
    pub scenario: Scenario,
    pub persona: Persona,
}

impl TrainingBrief {
    pub fn new(scenario: Scenario, persona: Persona) -> Self {
        Self { scenario, persona }
    }

    /// 从 TOML 文本解析
    pub fn from_toml_str(content: &str) -> Result<Self, toml::de::Error> {
        let data: ScenarioToml = toml::from_str(content)?;
        Ok(Self::new(data.scenario, data.persona))
    }

    pub fn id(&self) -> &str {
        &self.scenario.id
    }

    /// 生成发给聊天服务的指令上下文（角色设定）
    pub fn instruction_context(&self) -> String {
        let p = &self.persona;
        let s = &self.scenario;

        let mut who = p.name.clone();
        if let Some(age) = p.age {
            who.push_str(&format!(", {age} years old"));
        }
        if let Some(occupation) = &p.occupation {
            who.push_str(&format!(", {occupation}"));
        }

        let mut out = format!(
            "You are role-playing a customer named {who} in a customer-service training exercise.\n\
             Temperament: {}.\n",
            p.temperament
        );
        if let Some(background) = &p.background {
            out.push_str(&format!("Background: {background}\n"));
        }
        if !p.quirks.is_empty() {
            out.push_str(&format!("Habits: {}.\n", p.quirks.join("; ")));
        }

        out.push_str(&format!(
            "\nScenario: {}\nSituation: {}\nWhat you want: {}\n",
            s.title, s.situation, s.customer_goal
        ));
        if let Some(difficulty) = &s.difficulty {
            out.push_str(&format!("Difficulty: {difficulty}\n"));
        }
        if !s.talking_points.is_empty() {
            out.push_str("Raise these points naturally over the conversation:\n");
            for point in &s.talking_points {
                out.push_str(&format!("- {point}\n"));
            }
        }

        out.push_str(
            "\nStay in character for the whole conversation. The other person is a trainee agent; \
             react to how well they handle you. Never mention that you are an AI or that this is training. \
             Keep each reply to a few sentences, as spoken dialogue.",
        );
        out
    }
}

/// 场景缓存
pub type ScenarioCache = Arc<RwLock<HashMap<String, TrainingBrief>>>;

/// 场景加载器（只读数据源）
pub struct ScenarioLoader {
    dir: PathBuf,
    cache: ScenarioCache,
}

impl ScenarioLoader {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            cache: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// 从默认位置创建
    pub fn from_default() -> Self {
        let dirs = [
            PathBuf::from("config/scenarios"),
            PathBuf::from("../config/scenarios"),
        ];
        let dir = dirs
            .into_iter()
            .find(|d| d.exists())
            .unwrap_or_else(|| PathBuf::from("config/scenarios"));
        Self::new(dir)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// 加载目录下所有 *.toml 并缓存；单个文件损坏只记警告并跳过
    pub async fn load_all(&self) -> Result<Vec<TrainingBrief>, ScenarioError> {
        let mut briefs = Vec::new();

        if !self.dir.exists() {
            tracing::warn!(dir = %self.dir.display(), "scenario directory not found");
            return Ok(briefs);
        }

        let entries = std::fs::read_dir(&self.dir).map_err(|source| ScenarioError::Io {
            path: self.dir.clone(),
            source,
        })?;
        let mut paths: Vec<PathBuf> = entries
            .flatten()
            .map(|e| e.path())
            .filter(|p| p.extension().is_some_and(|ext| ext == "toml"))
            .collect();
        paths.sort();

        for path in paths {
            match Self::load_file(&path) {
                Ok(brief) => briefs.push(brief),
                Err(e) => tracing::warn!("skipping scenario: {}", e),
            }
        }

        let mut cache = self.cache.write().await;
        for brief in &briefs {
            cache.insert(brief.id().to_string(), brief.clone());
        }

        tracing::info!("Loaded {} scenarios", briefs.len());
        Ok(briefs)
    }

    /// 加载单个场景文件
    pub fn load_file(path: &Path) -> Result<TrainingBrief, ScenarioError> {
        let content = std::fs::read_to_string(path).map_err(|source| ScenarioError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        TrainingBrief::from_toml_str(&content).map_err(|source| ScenarioError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// 根据 ID 获取场景
    pub async fn get(&self, id: &str) -> Result<TrainingBrief, ScenarioError> {
        self.cache
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| ScenarioError::NotFound(id.to_string()))
    }

    /// 获取所有场景 ID（排序）
    pub async fn list_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.cache.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }
}
