use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::{Battery, DeviceError, Location, Result};

/// 位置传感器
#[async_trait]
pub trait LocationSensor: Send + Sync {
    /// 获取当前位置
    ///
    /// # 错误
    /// * `SensorUnavailable` - 不支持或权限被拒绝
    async fn locate(&self) -> Result<Location>;

    fn name(&self) -> &str;
}

/// 电量传感器
#[async_trait]
pub trait BatterySensor: Send + Sync {
    /// 获取当前电量百分比
    ///
    /// # 错误
    /// * `SensorUnavailable` - 不支持或读取失败
    async fn level(&self) -> Result<u8>;

    fn name(&self) -> &str;
}

/// 单次传感器读数
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SensorReading {
    /// `None` 表示位置不可用
    Location(Option<Location>),
    Battery(Battery),
}

/// 读取位置，失败或超时均降级为 `None`
pub async fn read_location(sensor: &dyn LocationSensor, limit: Duration) -> Option<Location> {
    match timeout(limit, sensor.locate()).await {
        Ok(Ok(location)) => Some(location),
        Ok(Err(e)) => {
            warn!(sensor = sensor.name(), error = %e, "Location unavailable");
            None
        }
        Err(_) => {
            warn!(sensor = sensor.name(), timeout = ?limit, "Location request timed out");
            None
        }
    }
}

/// 读取电量，失败或超时均降级为不可用
pub async fn read_battery(sensor: &dyn BatterySensor, limit: Duration) -> Battery {
    match timeout(limit, sensor.level()).await {
        Ok(Ok(level)) => Battery::from_percent(level),
        Ok(Err(e)) => {
            warn!(sensor = sensor.name(), error = %e, "Battery unavailable");
            Battery::Unavailable
        }
        Err(_) => {
            warn!(sensor = sensor.name(), timeout = ?limit, "Battery request timed out");
            Battery::Unavailable
        }
    }
}

/// 配置文件中给定的固定位置
pub struct FixedLocation {
    location: Location,
}

impl FixedLocation {
    pub fn new(location: Location) -> Self {
        Self { location }
    }
}

#[async_trait]
impl LocationSensor for FixedLocation {
    async fn locate(&self) -> Result<Location> {
        Ok(self.location)
    }

    fn name(&self) -> &str {
        "fixed"
    }
}

/// 不支持定位
pub struct NoLocation;

#[async_trait]
impl LocationSensor for NoLocation {
    async fn locate(&self) -> Result<Location> {
        Err(DeviceError::sensor_unavailable("location is not supported"))
    }

    fn name(&self) -> &str {
        "none"
    }
}

/// 不支持电量读取
pub struct NoBattery;

#[async_trait]
impl BatterySensor for NoBattery {
    async fn level(&self) -> Result<u8> {
        Err(DeviceError::sensor_unavailable("battery status is not supported"))
    }

    fn name(&self) -> &str {
        "none"
    }
}

/// Linux sysfs 电量
///
/// 在 `root`（通常为 `/sys/class/power_supply`）下查找 `type` 为
/// `Battery` 的电源并读取其 `capacity`。
pub struct SysfsBattery {
    root: PathBuf,
}

impl SysfsBattery {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    async fn find_capacity(&self) -> std::io::Result<Option<u8>> {
        let mut supplies = Vec::new();
        let mut entries = fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            supplies.push(entry.path());
        }
        supplies.sort();

        for supply in supplies {
            let kind = match fs::read_to_string(supply.join("type")).await {
                Ok(kind) => kind,
                Err(_) => continue,
            };
            if kind.trim() != "Battery" {
                continue;
            }
            let capacity = match fs::read_to_string(supply.join("capacity")).await {
                Ok(capacity) => capacity,
                Err(_) => continue,
            };
            if let Ok(level) = capacity.trim().parse::<u8>() {
                debug!(supply = %supply.display(), level, "Battery capacity read");
                return Ok(Some(level.min(100)));
            }
        }
        Ok(None)
    }
}

impl Default for SysfsBattery {
    fn default() -> Self {
        Self::new("/sys/class/power_supply")
    }
}

#[async_trait]
impl BatterySensor for SysfsBattery {
    async fn level(&self) -> Result<u8> {
        match self.find_capacity().await {
            Ok(Some(level)) => Ok(level),
            Ok(None) => Err(DeviceError::sensor_unavailable(format!(
                "no battery under {}",
                self.root.display()
            ))),
            Err(e) => Err(DeviceError::sensor_unavailable(format!(
                "cannot read {}: {}",
                self.root.display(),
                e
            ))),
        }
    }

    fn name(&self) -> &str {
        "sysfs"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs as std_fs;
    use tempfile::tempdir;

    struct HangingLocation;

    #[async_trait]
    impl LocationSensor for HangingLocation {
        async fn locate(&self) -> Result<Location> {
            std::future::pending().await
        }

        fn name(&self) -> &str {
            "hanging"
        }
    }

    #[tokio::test]
    async fn test_sysfs_battery() {
        let temp_dir = tempdir().unwrap();
        let ac = temp_dir.path().join("AC");
        let bat = temp_dir.path().join("BAT0");
        std_fs::create_dir_all(&ac).unwrap();
        std_fs::create_dir_all(&bat).unwrap();
        std_fs::write(ac.join("type"), "Mains\n").unwrap();
        std_fs::write(bat.join("type"), "Battery\n").unwrap();
        std_fs::write(bat.join("capacity"), "57\n").unwrap();

        let sensor = SysfsBattery::new(temp_dir.path());
        assert_eq!(sensor.level().await.unwrap(), 57);
    }

    #[tokio::test]
    async fn test_sysfs_without_battery() {
        let temp_dir = tempdir().unwrap();
        let sensor = SysfsBattery::new(temp_dir.path());
        assert!(matches!(
            sensor.level().await,
            Err(DeviceError::SensorUnavailable(_))
        ));

        let missing = SysfsBattery::new(temp_dir.path().join("missing"));
        assert!(missing.level().await.is_err());
    }

    #[tokio::test]
    async fn test_failures_degrade_to_sentinels() {
        let limit = Duration::from_millis(50);
        assert_eq!(read_location(&NoLocation, limit).await, None);
        assert_eq!(read_battery(&NoBattery, limit).await, Battery::Unavailable);

        let fixed = FixedLocation::new(Location::new(1.0, 2.0).unwrap());
        assert_eq!(read_location(&fixed, limit).await, Location::new(1.0, 2.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_sensor_times_out() {
        let location = read_location(&HangingLocation, Duration::from_secs(10)).await;
        assert!(location.is_none());
    }
}
