//! 远程文档存储（REST）
//!
//! 形如 `{base_url}/conversations/{id}/exchanges` 的子集合：POST 追加一条，GET 读取全部。
//! 连接失败 / 超时视为离线（PersistError::Offline），由连接恢复监视器稍后重放。

use std::time::Duration;

use async_trait::async_trait;

use crate::memory::{Exchange, PersistError, TranscriptStore};

/// HTTP 文档存储客户端
#[derive(Debug, Clone)]
pub struct HttpTranscriptStore {
    client: reqwest::Client,
    base_url: String,
}

fn map_transport(e: reqwest::Error) -> PersistError {
    if e.is_connect() || e.is_timeout() {
        PersistError::Offline
    } else {
        PersistError::Backend(e.to_string())
    }
}

impl HttpTranscriptStore {
    pub fn new(base_url: &str, timeout_secs: u64) -> Result<Self, PersistError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| PersistError::Backend(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn exchanges_url(&self, conversation_id: &str) -> String {
        format!("{}/conversations/{}/exchanges", self.base_url, conversation_id)
    }
}

#[async_trait]
impl TranscriptStore for HttpTranscriptStore {
    async fn append(&self, conversation_id: &str, exchange: &Exchange) -> Result<(), PersistError> {
        let resp = self
            .client
            .post(self.exchanges_url(conversation_id))
            .json(exchange)
            .send()
            .await
            .map_err(map_transport)?;

        if !resp.status().is_success() {
            return Err(PersistError::Backend(format!(
                "append rejected with status {}",
                resp.status()
            )));
        }
        Ok(())
    }

    async fn load(&self, conversation_id: &str) -> Result<Vec<Exchange>, PersistError> {
        let resp = self
            .client
            .get(self.exchanges_url(conversation_id))
            .send()
            .await
            .map_err(map_transport)?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        if !resp.status().is_success() {
            return Err(PersistError::Backend(format!(
                "load rejected with status {}",
                resp.status()
            )));
        }
        resp.json::<Vec<Exchange>>()
            .await
            .map_err(|e| PersistError::Backend(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exchanges_url_trims_trailing_slash() {
        let store = HttpTranscriptStore::new("http://db.local/api/", 5).unwrap();
        assert_eq!(
            store.exchanges_url("conv_1"),
            "http://db.local/api/conversations/conv_1/exchanges"
        );
    }

    #[tokio::test]
    async fn test_unreachable_backend_reports_offline() {
        // 端口 9（discard）通常无监听，连接被拒绝
        let store = HttpTranscriptStore::new("http://127.0.0.1:9", 2).unwrap();
        let err = store
            .append("conv_1", &Exchange::trainee("hi"))
            .await
            .unwrap_err();
        assert!(err.is_offline());
    }
}
