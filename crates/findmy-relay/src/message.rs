//! Telegram Bot API 报文

use serde::{Deserialize, Serialize};

/// `sendMessage` 请求体
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendMessage {
    pub chat_id: String,
    pub text: String,
}

/// 通用响应包装
#[derive(Debug, Clone, Deserialize)]
pub struct ApiResponse<T> {
    pub ok: bool,

    #[serde(default)]
    pub description: Option<String>,

    pub result: Option<T>,
}

/// `getUpdates` 中的单条更新
#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,

    #[serde(default)]
    pub message: Option<Message>,

    #[serde(default)]
    pub channel_post: Option<Message>,
}

impl Update {
    /// 更新中的消息文本
    pub fn text(&self) -> Option<&str> {
        self.message
            .as_ref()
            .or(self.channel_post.as_ref())
            .and_then(|m| m.text.as_deref())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    #[serde(default)]
    pub text: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_updates() {
        let raw = r#"{
            "ok": true,
            "result": [
                {"update_id": 1, "message": {"message_id": 5, "text": "{\"id\":\"a\"}"}},
                {"update_id": 2, "message": {"message_id": 6, "photo": []}},
                {"update_id": 3, "channel_post": {"text": "hi"}},
                {"update_id": 4, "edited_message": {"text": "ignored"}}
            ]
        }"#;
        let response: ApiResponse<Vec<Update>> = serde_json::from_str(raw).unwrap();

        assert!(response.ok);
        let texts: Vec<Option<&str>> = response.result.as_ref().unwrap().iter().map(Update::text).collect();
        assert_eq!(texts, vec![Some(r#"{"id":"a"}"#), None, Some("hi"), None]);
    }

    #[test]
    fn test_parse_error_response() {
        let raw = r#"{"ok":false,"error_code":401,"description":"Unauthorized"}"#;
        let response: ApiResponse<Vec<Update>> = serde_json::from_str(raw).unwrap();

        assert!(!response.ok);
        assert_eq!(response.description.as_deref(), Some("Unauthorized"));
        assert!(response.result.is_none());
    }
}
