use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::fs;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::{DeviceError, Result};

/// 已连接设备列表的存储条目
pub const DEVICES_ENTRY: &str = "connected_devices";

/// 本机设备 ID 的存储条目
pub const DEVICE_ID_ENTRY: &str = "device_id";

/// 持久化键值存储
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// 读取条目，不存在或已损坏时返回 `None`
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// 写入条目，写入完成后才返回
    async fn set(&self, key: &str, value: &str) -> Result<()>;

    /// 删除条目
    async fn remove(&self, key: &str) -> Result<()>;
}

fn validate_key(key: &str) -> Result<()> {
    let valid = !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(DeviceError::validation(format!("invalid storage key: {:?}", key)))
    }
}

/// 基于目录的文件存储
///
/// 每个条目对应 `<dir>/<key>.json`，写入时先写临时文件再原子重命名。
pub struct FileStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl FileStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }
}

#[async_trait]
impl KeyValueStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        validate_key(key)?;
        let bytes = match fs::read(self.path_for(key)).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        match String::from_utf8(bytes) {
            Ok(content) => Ok(Some(content)),
            Err(e) => {
                warn!(key = %key, error = %e, "Storage entry is not valid UTF-8, treating as missing");
                Ok(None)
            }
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        validate_key(key)?;
        let _guard = self.write_lock.lock().await;

        fs::create_dir_all(&self.dir).await?;

        let path = self.path_for(key);
        let temp_path = path.with_extension("json.tmp");
        fs::write(&temp_path, value).await?;
        fs::rename(&temp_path, &path).await?;

        debug!(key = %key, bytes = value.len(), "Storage entry written");
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        validate_key(key)?;
        let _guard = self.write_lock.lock().await;

        match fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// 内存存储（用于测试）
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, String>>,
    writes: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 累计写入次数
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        validate_key(key)?;
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        validate_key(key)?;
        self.entries
            .write()
            .await
            .insert(key.to_string(), value.to_string());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        validate_key(key)?;
        self.entries.write().await.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_file_store_roundtrip() {
        let temp_dir = tempdir().unwrap();
        let store = FileStore::new(temp_dir.path().join("nested"));

        assert_eq!(store.get(DEVICES_ENTRY).await.unwrap(), None);

        store.set(DEVICES_ENTRY, "[]").await.unwrap();
        assert_eq!(store.get(DEVICES_ENTRY).await.unwrap().as_deref(), Some("[]"));
        assert!(temp_dir.path().join("nested/connected_devices.json").exists());
        assert!(!temp_dir.path().join("nested/connected_devices.json.tmp").exists());

        store.set(DEVICES_ENTRY, "[1]").await.unwrap();
        assert_eq!(store.get(DEVICES_ENTRY).await.unwrap().as_deref(), Some("[1]"));

        store.remove(DEVICES_ENTRY).await.unwrap();
        assert_eq!(store.get(DEVICES_ENTRY).await.unwrap(), None);
        // 删除不存在的条目不报错
        store.remove(DEVICES_ENTRY).await.unwrap();
    }

    #[tokio::test]
    async fn test_non_utf8_entry_reads_as_missing() {
        let temp_dir = tempdir().unwrap();
        std::fs::write(
            temp_dir.path().join("connected_devices.json"),
            [0xff, 0xfe, b'[', b']'],
        )
        .unwrap();

        let store = FileStore::new(temp_dir.path());
        assert_eq!(store.get(DEVICES_ENTRY).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_rejects_path_like_keys() {
        let temp_dir = tempdir().unwrap();
        let store = FileStore::new(temp_dir.path());

        assert!(store.set("../escape", "x").await.is_err());
        assert!(store.get("").await.is_err());
    }

    #[test]
    fn test_memory_store_counts_writes() {
        tokio_test::block_on(async {
            let store = MemoryStore::new();
            store.set(DEVICE_ID_ENTRY, "abc").await.unwrap();
            store.set(DEVICE_ID_ENTRY, "def").await.unwrap();

            assert_eq!(store.write_count(), 2);
            assert_eq!(store.get(DEVICE_ID_ENTRY).await.unwrap().as_deref(), Some("def"));
        });
    }
}
