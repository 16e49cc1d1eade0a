//! 设备记录编解码
//!
//! 所有入口（扫码、分享链接、中继拉取、本地存储）的原始载荷都经过
//! [`normalize`] 校验并转换为 [`DeviceRecord`]。该转换是纯函数。

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::model::{default_name, Battery, DeviceRecord, Location};

/// 载荷解析错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// 无法解析为 JSON 对象，或缺少 id
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),
}

impl DecodeError {
    fn malformed(msg: impl Into<String>) -> Self {
        DecodeError::MalformedPayload(msg.into())
    }
}

/// 将 JSON 文本规范化为设备记录
pub fn normalize(raw: &str) -> Result<DeviceRecord, DecodeError> {
    let value: Value = serde_json::from_str(raw)
        .map_err(|e| DecodeError::malformed(format!("invalid JSON: {}", e)))?;
    normalize_value(&value)
}

/// 将已解析的 JSON 值规范化为设备记录
pub fn normalize_value(value: &Value) -> Result<DeviceRecord, DecodeError> {
    let obj = value
        .as_object()
        .ok_or_else(|| DecodeError::malformed("payload is not a JSON object"))?;

    let id = parse_id(obj)?;
    let name = obj
        .get("name")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| default_name(&id));

    let mut record = DeviceRecord::new(id, name)
        .with_battery(obj.get("battery").map(parse_battery).unwrap_or_default())
        .with_location(obj.get("location").and_then(parse_location));
    record.last_updated = obj.get("lastUpdated").and_then(parse_timestamp);

    Ok(record)
}

/// 编码为 JSON 文本（中继消息、分享链接、二维码内容）
pub fn encode(record: &DeviceRecord) -> Result<String, serde_json::Error> {
    serde_json::to_string(record)
}

fn parse_id(obj: &Map<String, Value>) -> Result<String, DecodeError> {
    match obj.get("id") {
        Some(Value::String(id)) if !id.trim().is_empty() => Ok(id.trim().to_string()),
        Some(Value::String(_)) => Err(DecodeError::malformed("id is empty")),
        Some(_) => Err(DecodeError::malformed("id is not a string")),
        None => Err(DecodeError::malformed("missing id")),
    }
}

// 兼容 80、79.6、"80"、"80%"；其余一律视为不可用
fn parse_battery(value: &Value) -> Battery {
    match value {
        Value::Number(n) => n.as_f64().map(Battery::from_f64).unwrap_or_default(),
        Value::String(s) => s
            .trim()
            .trim_end_matches('%')
            .trim()
            .parse::<f64>()
            .map(Battery::from_f64)
            .unwrap_or_default(),
        _ => Battery::Unavailable,
    }
}

fn parse_location(value: &Value) -> Option<Location> {
    let obj = value.as_object()?;
    let lat = obj.get("lat").or_else(|| obj.get("latitude"))?.as_f64()?;
    let lng = obj.get("lng").or_else(|| obj.get("longitude"))?.as_f64()?;
    Location::new(lat, lng)
}

fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    let s = value.as_str()?;
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}
