//! 分享链接与二维码载荷

use serde_json::json;
use tracing::{debug, warn};
use url::Url;

use crate::codec;
use crate::ingest::{IngestHandle, IngestReport, Payload, Source};
use crate::{DeviceRecord, Result};

/// 携带设备记录的查询参数名
pub const SHARE_PARAM: &str = "device";

/// 导入分享链接的结果
#[derive(Debug)]
pub struct LinkImport {
    /// 去掉 `device` 参数后的链接
    pub url: Url,

    /// 链接不含 `device` 参数时为 `None`
    pub outcome: Option<Result<IngestReport>>,
}

/// 取出链接中的设备载荷，返回载荷与去掉该参数后的链接
pub fn take_shared_payload(url: &Url) -> Option<(String, Url)> {
    let payload = url
        .query_pairs()
        .find(|(key, _)| key == SHARE_PARAM)
        .map(|(_, value)| value.into_owned())?;
    Some((payload, strip_param(url, SHARE_PARAM)))
}

/// 删除指定查询参数，其余参数保持原顺序
pub fn strip_param(url: &Url, param: &str) -> Url {
    let rest: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| key != param)
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();

    let mut stripped = url.clone();
    if rest.is_empty() {
        stripped.set_query(None);
    } else {
        stripped.query_pairs_mut().clear().extend_pairs(rest);
    }
    stripped
}

/// 生成分享链接
pub fn share_link(base: &Url, record: &DeviceRecord) -> Result<Url> {
    let payload = codec::encode(record)?;
    let mut link = strip_param(base, SHARE_PARAM);
    link.query_pairs_mut().append_pair(SHARE_PARAM, &payload);
    Ok(link)
}

/// 生成二维码内容
pub fn scan_payload(record: &DeviceRecord) -> Result<String> {
    Ok(codec::encode(record)?)
}

/// 手动输入编码为 `{"id", "name"}` 载荷
pub fn manual_payload(id: &str, name: Option<&str>) -> Payload {
    let value = match name {
        Some(name) => json!({ "id": id, "name": name }),
        None => json!({ "id": id }),
    };
    Payload::Value(value)
}

/// 导入分享链接
///
/// 无论载荷是否有效，返回的链接都不再包含 `device` 参数。
pub async fn import_link(ingest: &IngestHandle, url: &Url) -> LinkImport {
    let Some((payload, stripped)) = take_shared_payload(url) else {
        debug!(url = %url, "Link carries no device payload");
        return LinkImport {
            url: url.clone(),
            outcome: None,
        };
    };

    let outcome = ingest.ingest(Payload::Raw(payload), Source::Link).await;
    if let Err(e) = &outcome {
        warn!(error = %e, "Shared link rejected");
    }

    LinkImport {
        url: stripped,
        outcome: Some(outcome),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::normalize;
    use crate::ingest::Ingestor;
    use crate::registry::{MergeMode, Registry, UpsertOutcome};
    use crate::store::MemoryStore;
    use crate::{Battery, Location};
    use std::sync::Arc;

    #[test]
    fn test_take_shared_payload() {
        let url = Url::parse(
            "https://example.com/?device=%7B%22id%22%3A%22b%22%2C%22name%22%3A%22X%22%7D",
        )
        .unwrap();

        let (payload, stripped) = take_shared_payload(&url).unwrap();
        assert_eq!(payload, r#"{"id":"b","name":"X"}"#);
        assert_eq!(stripped.as_str(), "https://example.com/");
    }

    #[test]
    fn test_strip_keeps_other_params() {
        let url = Url::parse("https://example.com/app?lang=id&device=%7B%7D&tab=map").unwrap();
        let stripped = strip_param(&url, SHARE_PARAM);
        assert_eq!(stripped.as_str(), "https://example.com/app?lang=id&tab=map");

        let plain = Url::parse("https://example.com/?lang=id").unwrap();
        assert!(take_shared_payload(&plain).is_none());
    }

    #[test]
    fn test_share_link_is_importable() {
        let record = DeviceRecord::new("a1", "Tablet & Co")
            .with_battery(Battery::Level(12))
            .with_location(Location::new(-6.2, 106.8));
        let base = Url::parse("https://example.com/find?device=old&lang=en").unwrap();

        let link = share_link(&base, &record).unwrap();
        let (payload, stripped) = take_shared_payload(&link).unwrap();

        assert_eq!(normalize(&payload).unwrap(), record);
        assert_eq!(stripped.as_str(), "https://example.com/find?lang=en");
    }

    #[test]
    fn test_manual_payload() {
        let Payload::Value(value) = manual_payload("x", None) else {
            panic!("expected a JSON value");
        };
        assert_eq!(codec::normalize_value(&value).unwrap().name, "Device x");

        let Payload::Value(value) = manual_payload("x", Some("Keys")) else {
            panic!("expected a JSON value");
        };
        assert_eq!(codec::normalize_value(&value).unwrap().name, "Keys");
    }

    #[tokio::test]
    async fn test_import_link_upserts_and_strips() {
        let registry = Arc::new(
            Registry::open(Arc::new(MemoryStore::new()), MergeMode::Replace)
                .await
                .unwrap(),
        );
        let (ingest, _task) = Ingestor::spawn(registry.clone(), 8);
        let url = Url::parse(
            "https://example.com/?device=%7B%22id%22%3A%22b%22%2C%22name%22%3A%22X%22%7D",
        )
        .unwrap();

        let import = import_link(&ingest, &url).await;

        assert_eq!(import.url.as_str(), "https://example.com/");
        let report = import.outcome.unwrap().unwrap();
        assert_eq!(report.outcome, UpsertOutcome::Inserted);
        assert_eq!(report.source, Source::Link);
        let stored = registry.find_by_id("b").await.unwrap();
        assert_eq!(stored.name, "X");
    }

    #[tokio::test]
    async fn test_import_bad_link_still_strips() {
        let registry = Arc::new(
            Registry::open(Arc::new(MemoryStore::new()), MergeMode::Replace)
                .await
                .unwrap(),
        );
        let (ingest, _task) = Ingestor::spawn(registry.clone(), 8);
        let url = Url::parse("https://example.com/?device=not-json&lang=id").unwrap();

        let import = import_link(&ingest, &url).await;

        assert_eq!(import.url.as_str(), "https://example.com/?lang=id");
        assert!(import.outcome.unwrap().unwrap_err().is_decode());
        assert!(registry.is_empty().await);
    }
}
