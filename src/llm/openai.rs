//! OpenAI 兼容 API 客户端
//!
//! 通过 async_openai 调用任意 OpenAI 兼容端点（可配置 base_url）；支持 DeepSeek、OpenAI、自建代理等。
//! 底层 HTTP 客户端带单次请求超时，超时按可重试错误处理并计入重试次数。

use std::time::Duration;

use async_openai::config::OpenAIConfig;
use async_openai::error::OpenAIError;
use async_openai::types::chat::{
    ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
    ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
    CreateChatCompletionRequestArgs,
};
use async_openai::Client;
use async_trait::async_trait;
use backoff::ExponentialBackoffBuilder;

use crate::llm::{LlmClient, ProviderError};
use crate::memory::{Message, Role};

/// OpenAI 兼容客户端；api_key 缺失时 complete 直接返回 NotConfigured，不发起请求
pub struct OpenAiClient {
    client: Option<Client<OpenAIConfig>>,
    model: String,
}

/// 把 async_openai 的错误映射为统一的 ProviderError（决定是否重试）
fn map_openai_error(e: OpenAIError) -> ProviderError {
    let text = e.to_string();
    match e {
        OpenAIError::Reqwest(inner) => ProviderError::from(inner),
        OpenAIError::ApiError(api) => {
            classify_api_error(api.r#type.as_deref(), api.code.as_deref(), &api.message)
        }
        OpenAIError::JSONDeserialize(..) => ProviderError::MalformedResponse(text),
        OpenAIError::InvalidArgument(message) => ProviderError::Rejected {
            status: None,
            message,
        },
        _ => ProviderError::Transport(text),
    }
}

/// API 错误体不带 HTTP 状态码，按 error.type / error.code 与消息内容归类。
/// 5xx 响应体不保证是 JSON，async_openai 原样放进 message，type 与 code 都为空。
fn classify_api_error(kind: Option<&str>, code: Option<&str>, message: &str) -> ProviderError {
    let lower = message.to_lowercase();
    let code = code.unwrap_or_default();

    let Some(kind) = kind else {
        if code.contains("rate_limit") || lower.contains("rate limit") {
            return ProviderError::RateLimited;
        }
        return match code {
            "" => ProviderError::Server {
                status: 500,
                message: message.to_string(),
            },
            _ => ProviderError::Rejected {
                status: None,
                message: message.to_string(),
            },
        };
    };

    if kind == "insufficient_quota" || code == "insufficient_quota" {
        return ProviderError::Rejected {
            status: Some(429),
            message: message.to_string(),
        };
    }
    if kind.contains("rate_limit") || code.contains("rate_limit") || lower.contains("rate limit") {
        return ProviderError::RateLimited;
    }
    if matches!(kind, "server_error" | "service_unavailable") || lower.contains("overloaded") {
        return ProviderError::Server {
            status: 503,
            message: message.to_string(),
        };
    }
    ProviderError::Rejected {
        status: None,
        message: message.to_string(),
    }
}

impl OpenAiClient {
    pub fn new(
        base_url: Option<&str>,
        model: &str,
        api_key: Option<&str>,
        request_timeout_secs: u64,
    ) -> Self {
        let api_key = api_key
            .map(String::from)
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .filter(|k| !k.trim().is_empty());

        let client = api_key.map(|key| {
            let config = match base_url {
                Some(url) => OpenAIConfig::new().with_api_base(url).with_api_key(key),
                None => OpenAIConfig::new().with_api_key(key),
            };
            // 重试只由 RetryExecutor 负责，关闭 async_openai 自带的 5xx/429 退避
            let client = Client::with_config(config).with_backoff(
                ExponentialBackoffBuilder::new()
                    .with_max_elapsed_time(Some(Duration::ZERO))
                    .build(),
            );
            match reqwest::Client::builder()
                .timeout(Duration::from_secs(request_timeout_secs))
                .build()
            {
                Ok(http) => client.with_http_client(http),
                Err(e) => {
                    tracing::warn!("Failed to build HTTP client with timeout, using default: {}", e);
                    client
                }
            }
        });

        if client.is_none() {
            tracing::warn!(model, "chat provider has no API key; turns will fail as not configured");
        }

        Self {
            client,
            model: model.to_string(),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.client.is_some()
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn to_openai_messages(
        &self,
        messages: &[Message],
    ) -> Result<Vec<ChatCompletionRequestMessage>, OpenAIError> {
        messages
            .iter()
            .map(|m| {
                Ok(match m.role {
                    Role::System => ChatCompletionRequestMessage::System(
                        ChatCompletionRequestSystemMessageArgs::default()
                            .content(m.content.clone())
                            .build()?,
                    ),
                    Role::User => ChatCompletionRequestMessage::User(
                        ChatCompletionRequestUserMessageArgs::default()
                            .content(m.content.clone())
                            .build()?,
                    ),
                    Role::Assistant => ChatCompletionRequestMessage::Assistant(
                        ChatCompletionRequestAssistantMessageArgs::default()
                            .content(m.content.clone())
                            .build()?,
                    ),
                })
            })
            .collect()
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, ProviderError> {
        let client = self
            .client
            .as_ref()
            .ok_or(ProviderError::NotConfigured("chat"))?;

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(self.to_openai_messages(messages).map_err(map_openai_error)?)
            .build()
            .map_err(map_openai_error)?;

        let response = client
            .chat()
            .create(request)
            .await
            .map_err(map_openai_error)?;

        response
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| ProviderError::MalformedResponse("completion has no content".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ErrorClass;

    #[test]
    fn test_api_error_classification() {
        assert!(matches!(
            classify_api_error(Some("rate_limit_exceeded"), None, "slow down"),
            ProviderError::RateLimited
        ));
        assert!(matches!(
            classify_api_error(Some("requests"), Some("rate_limit_exceeded"), "Too many requests"),
            ProviderError::RateLimited
        ));
        assert_eq!(
            classify_api_error(Some("server_error"), None, "boom").class(),
            ErrorClass::Retryable
        );
        assert_eq!(
            classify_api_error(Some("invalid_request_error"), None, "bad model").class(),
            ErrorClass::Terminal
        );
        assert_eq!(
            classify_api_error(Some("insufficient_quota"), None, "no credit").class(),
            ErrorClass::Terminal
        );
        assert_eq!(
            classify_api_error(None, None, "The engine is currently overloaded").class(),
            ErrorClass::Retryable
        );
    }

    #[test]
    fn test_raw_server_error_body_is_retryable() {
        let err = classify_api_error(None, None, "Service Unavailable");
        assert!(matches!(err, ProviderError::Server { .. }));
        assert_eq!(err.class(), ErrorClass::Retryable);

        // 有 code 的错误体来自 4xx JSON
        assert_eq!(
            classify_api_error(None, Some("model_not_found"), "no such model").class(),
            ErrorClass::Terminal
        );
    }

    #[tokio::test]
    async fn test_missing_key_is_not_configured_without_io() {
        let client = OpenAiClient {
            client: None,
            model: "gpt-4o-mini".into(),
        };
        let err = client.complete(&[Message::user("hi")]).await.unwrap_err();
        assert_eq!(err, ProviderError::NotConfigured("chat"));
        assert!(!client.is_configured());
    }
}
