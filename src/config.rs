//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `REHEARSAL__*` 覆盖（双下划线表示嵌套，如 `REHEARSAL__LLM__PROVIDER=mock`）。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::llm::RetryConfig;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub retry: RetrySection,
    pub narration: NarrationSection,
    pub audio: AudioSection,
    pub storage: StorageSection,
    pub scenario: ScenarioSection,
    pub connectivity: ConnectivitySection,
}

/// [app] 段：数据目录、会话空闲窗口与清理周期
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSection {
    pub name: Option<String>,
    /// 数据目录，未设置时用 ./data
    pub data_dir: Option<PathBuf>,
    /// 会话空闲多久后被清理（秒）
    pub idle_window_secs: u64,
    /// 清理任务的执行周期（秒）
    pub sweep_interval_secs: u64,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: None,
            data_dir: None,
            idle_window_secs: 3600,
            sweep_interval_secs: 3600,
        }
    }
}

impl AppSection {
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(|| PathBuf::from("data"))
    }
}

/// [llm] 段：后端选择与超时
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    /// 后端：openai / deepseek / mock
    pub provider: String,
    pub model: String,
    pub base_url: Option<String>,
    pub deepseek: LlmDeepSeekSection,
    pub openai: LlmOpenAiSection,
    pub timeouts: LlmTimeoutsSection,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-4o-mini".to_string(),
            base_url: None,
            deepseek: LlmDeepSeekSection::default(),
            openai: LlmOpenAiSection::default(),
            timeouts: LlmTimeoutsSection::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct LlmDeepSeekSection {
    pub model: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct LlmOpenAiSection {
    pub model: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmTimeoutsSection {
    /// 单次请求超时（秒）；超时按可重试错误计入重试次数
    #[serde(default = "default_request_timeout")]
    pub request: u64,
}

impl Default for LlmTimeoutsSection {
    fn default() -> Self {
        Self {
            request: default_request_timeout(),
        }
    }
}

fn default_request_timeout() -> u64 {
    30
}

/// [retry] 段：外部调用重试策略
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrySection {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub multiplier: u32,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
            multiplier: 2,
        }
    }
}

impl RetrySection {
    pub fn to_retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.base_delay_ms),
            multiplier: self.multiplier,
        }
    }
}

/// [narration] 段：语音合成（TTS）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NarrationSection {
    pub enabled: bool,
    /// 后端：openai / mock
    pub provider: String,
    pub model: String,
    pub voice: String,
    /// 音频格式：mp3 / wav / opus ...
    pub format: String,
    pub base_url: Option<String>,
}

impl Default for NarrationSection {
    fn default() -> Self {
        Self {
            enabled: true,
            provider: "openai".to_string(),
            model: "tts-1".to_string(),
            voice: "alloy".to_string(),
            format: "mp3".to_string(),
            base_url: None,
        }
    }
}

/// [audio] 段：播放队列与输出端
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AudioSection {
    /// 启动时是否静音
    pub start_muted: bool,
    /// 输出端：auto / rodio / spool / null；auto 在启用 playback 特性且能打开声卡时用 rodio，否则 spool
    pub sink: String,
    /// spool 输出端的落盘目录，未设置时用 <data_dir>/audio
    pub spool_dir: Option<PathBuf>,
}

impl Default for AudioSection {
    fn default() -> Self {
        Self {
            start_muted: false,
            sink: "auto".to_string(),
            spool_dir: None,
        }
    }
}

/// [storage] 段：对话记录存储后端
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageSection {
    /// 后端：memory / sqlite / http
    pub backend: String,
    /// sqlite 文件路径，未设置时用 <data_dir>/transcripts.db
    pub path: Option<PathBuf>,
    /// http 后端的基础地址
    pub base_url: Option<String>,
    pub timeout_secs: u64,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            backend: "sqlite".to_string(),
            path: None,
            base_url: None,
            timeout_secs: 10,
        }
    }
}

/// [scenario] 段：场景文件目录与默认场景
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ScenarioSection {
    /// 未设置时依次查找 config/scenarios、../config/scenarios
    pub dir: Option<PathBuf>,
    pub default_id: Option<String>,
}

/// [connectivity] 段：连通性探测
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConnectivitySection {
    pub probe_interval_secs: u64,
    /// host:port；未设置时取 http 存储地址，其次聊天服务地址（见 AppConfig::probe_target）
    pub probe_target: Option<String>,
}

impl Default for ConnectivitySection {
    fn default() -> Self {
        Self {
            probe_interval_secs: 15,
            probe_target: None,
        }
    }
}

impl AppConfig {
    /// 连通性探测目标：显式配置 > http 存储的 base_url > 聊天服务的 base_url
    pub fn probe_target(&self) -> Option<String> {
        if let Some(target) = &self.connectivity.probe_target {
            return Some(target.clone());
        }
        let storage = (self.storage.backend == "http")
            .then(|| self.storage.base_url.as_deref())
            .flatten();
        let chat = (self.llm.provider != "mock")
            .then(|| self.llm.base_url.as_deref())
            .flatten();
        storage.or(chat).and_then(host_port)
    }
}

/// URL → host:port，缺省端口按协议补齐
fn host_port(url: &str) -> Option<String> {
    let parsed = reqwest::Url::parse(url).ok()?;
    let host = parsed.host_str()?;
    let port = parsed.port_or_known_default()?;
    Some(format!("{host}:{port}"))
}

/// 从 config 目录加载配置，环境变量 REHEARSAL__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 REHEARSAL__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("REHEARSAL")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_pipeline_constants() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.app.idle_window_secs, 3600);
        assert_eq!(cfg.llm.timeouts.request, 30);
        assert_eq!(cfg.retry.to_retry_config(), RetryConfig::default());
        assert_eq!(cfg.storage.backend, "sqlite");
        assert!(!cfg.audio.start_muted);
        assert_eq!(cfg.audio.sink, "auto");
    }

    #[test]
    fn test_partial_toml_keeps_other_defaults() {
        let cfg: AppConfig = toml::from_str(
            r#"
            [llm]
            provider = "mock"

            [retry]
            max_attempts = 5
            "#,
        )
        .unwrap();
        assert_eq!(cfg.llm.provider, "mock");
        assert_eq!(cfg.llm.model, "gpt-4o-mini");
        assert_eq!(cfg.retry.max_attempts, 5);
        assert_eq!(cfg.retry.base_delay_ms, 1000);
        assert!(cfg.narration.enabled);
    }

    #[test]
    fn test_probe_target_derived_from_backends() {
        let mut cfg = AppConfig::default();
        assert_eq!(cfg.probe_target(), None);

        cfg.llm.base_url = Some("https://llm.example.com/v1".to_string());
        assert_eq!(cfg.probe_target().as_deref(), Some("llm.example.com:443"));

        cfg.storage.backend = "http".to_string();
        cfg.storage.base_url = Some("http://10.0.0.5:8080/api".to_string());
        assert_eq!(cfg.probe_target().as_deref(), Some("10.0.0.5:8080"));

        cfg.connectivity.probe_target = Some("gateway.local:53".to_string());
        assert_eq!(cfg.probe_target().as_deref(), Some("gateway.local:53"));
    }

    #[test]
    fn test_probe_target_ignores_unparseable_url() {
        let mut cfg = AppConfig::default();
        cfg.storage.backend = "http".to_string();
        cfg.storage.base_url = Some("not a url".to_string());
        assert_eq!(cfg.probe_target(), None);
    }

    #[test]
    fn test_load_config_reads_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(&path, "[audio]\nstart_muted = true\n").unwrap();
        let cfg = load_config(Some(path)).unwrap();
        assert!(cfg.audio.start_muted);
    }
}
