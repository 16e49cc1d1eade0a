use async_trait::async_trait;
use findmy_device::{codec, DeviceRecord, KeyValueStore, Relay};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::message::{ApiResponse, SendMessage, Update};
use crate::source::RelaySource;
use crate::{RelayError, Result};

fn build_client(timeout: Duration) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder().timeout(timeout).build()?)
}

// ============================================================================
// Telegram 中继
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    pub api_base: String,
    pub bot_token: String,
    pub chat_id: String,
}

/// getUpdates offset 的存储条目
pub const TELEGRAM_OFFSET_ENTRY: &str = "telegram_offset";

#[derive(Debug, Default)]
struct OffsetState {
    /// 下一次 getUpdates 的 offset
    next: Option<i64>,
    /// 是否已从存储读取
    loaded: bool,
}

/// 通过 Telegram 机器人转发设备记录
///
/// 发布：`sendMessage`，消息文本为记录的 JSON。
/// 拉取：`getUpdates`，每条消息文本都是候选载荷。
///
/// offset 默认只保存在内存中，进程重启后会重新拉取未确认的消息。
/// 通过 [`TelegramRelay::with_offset_store`] 持久化后，单次同步也不会重复处理。
pub struct TelegramRelay {
    config: TelegramConfig,
    client: reqwest::Client,
    offset: Mutex<OffsetState>,
    offset_store: Option<Arc<dyn KeyValueStore>>,
}

impl TelegramRelay {
    pub fn new(config: TelegramConfig, timeout: Duration) -> Result<Self> {
        if config.bot_token.trim().is_empty() || config.chat_id.trim().is_empty() {
            return Err(RelayError::InvalidConfig(
                "telegram bot_token and chat_id must be set".to_string(),
            ));
        }
        Ok(Self {
            config,
            client: build_client(timeout)?,
            offset: Mutex::new(OffsetState::default()),
            offset_store: None,
        })
    }

    /// 把 offset 持久化到存储
    pub fn with_offset_store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.offset_store = Some(store);
        self
    }

    async fn load_offset(&self, state: &mut OffsetState) {
        if state.loaded {
            return;
        }
        state.loaded = true;

        let Some(store) = &self.offset_store else {
            return;
        };
        match store.get(TELEGRAM_OFFSET_ENTRY).await {
            Ok(Some(raw)) => match serde_json::from_str::<i64>(&raw) {
                Ok(next) => state.next = Some(next),
                Err(e) => warn!(error = %e, "Stored telegram offset is invalid, ignoring"),
            },
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Failed to read telegram offset"),
        }
    }

    async fn save_offset(&self, next: i64) -> Result<()> {
        let Some(store) = &self.offset_store else {
            return Ok(());
        };
        let raw = serde_json::to_string(&next)?;
        if let Err(e) = store.set(TELEGRAM_OFFSET_ENTRY, &raw).await {
            warn!(error = %e, "Failed to persist telegram offset");
        }
        Ok(())
    }

    fn endpoint(&self, method: &str) -> String {
        format!(
            "{}/bot{}/{}",
            self.config.api_base.trim_end_matches('/'),
            self.config.bot_token,
            method
        )
    }

    /// 发送文本消息
    pub async fn send_text(&self, text: &str) -> Result<()> {
        let body = SendMessage {
            chat_id: self.config.chat_id.clone(),
            text: text.to_string(),
        };

        let response = self
            .client
            .post(self.endpoint("sendMessage"))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(RelayError::Status {
                relay: "telegram".to_string(),
                status: status.as_u16(),
            });
        }
        debug!(status = %status, "Telegram message sent");
        Ok(())
    }

    /// 拉取新消息
    pub async fn fetch_updates(&self) -> Result<Vec<Update>> {
        let mut offset = self.offset.lock().await;
        self.load_offset(&mut offset).await;

        let mut request = self.client.get(self.endpoint("getUpdates"));
        if let Some(next) = offset.next {
            request = request.query(&[("offset", next)]);
        }
        let response = request.send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(RelayError::Status {
                relay: "telegram".to_string(),
                status: status.as_u16(),
            });
        }

        let body: ApiResponse<Vec<Update>> = response.json().await?;
        if !body.ok {
            return Err(RelayError::Api(
                body.description.unwrap_or_else(|| "getUpdates failed".to_string()),
            ));
        }

        let updates = body.result.unwrap_or_default();
        if let Some(last) = updates.iter().map(|u| u.update_id).max() {
            offset.next = Some(last + 1);
            self.save_offset(last + 1).await?;
        }
        debug!(count = updates.len(), offset = ?offset.next, "Telegram updates fetched");
        Ok(updates)
    }
}

#[async_trait]
impl Relay for TelegramRelay {
    async fn publish(&self, record: &DeviceRecord) -> findmy_device::Result<()> {
        let text = codec::encode(record)?;
        Ok(self.send_text(&text).await?)
    }

    fn name(&self) -> &str {
        "telegram"
    }
}

#[async_trait]
impl RelaySource for TelegramRelay {
    async fn fetch(&self) -> Result<Vec<String>> {
        let updates = self.fetch_updates().await?;
        Ok(updates
            .iter()
            .filter_map(Update::text)
            .map(str::to_string)
            .collect())
    }

    fn name(&self) -> &str {
        "telegram"
    }
}

// ============================================================================
// Webhook 中继
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WebhookConfig {
    pub url: String,
    #[serde(default)]
    pub headers: Option<HashMap<String, String>>,
}

/// 把设备记录 JSON POST 到任意地址
pub struct WebhookRelay {
    config: WebhookConfig,
    client: reqwest::Client,
}

impl WebhookRelay {
    pub fn new(config: WebhookConfig, timeout: Duration) -> Result<Self> {
        if config.url.trim().is_empty() {
            return Err(RelayError::InvalidConfig("webhook url must be set".to_string()));
        }
        Ok(Self {
            config,
            client: build_client(timeout)?,
        })
    }
}

#[async_trait]
impl Relay for WebhookRelay {
    async fn publish(&self, record: &DeviceRecord) -> findmy_device::Result<()> {
        let mut request = self.client.post(&self.config.url);

        if let Some(headers) = &self.config.headers {
            for (key, value) in headers {
                request = request.header(key, value);
            }
        }

        let response = request.json(record).send().await.map_err(RelayError::from)?;

        let status = response.status();
        if !status.is_success() {
            return Err(RelayError::Status {
                relay: "webhook".to_string(),
                status: status.as_u16(),
            }
            .into());
        }
        debug!(status = %status, "Webhook delivered");
        Ok(())
    }

    fn name(&self) -> &str {
        "webhook"
    }
}
