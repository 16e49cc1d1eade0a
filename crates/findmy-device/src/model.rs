use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// 设备记录
///
/// 一台设备的规范描述：标识、名称、电量、位置。
/// `id` 在创建时确定，之后不可修改。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceRecord {
    /// 设备 ID（注册表内唯一）
    id: String,

    /// 显示名称
    pub name: String,

    /// 电量
    #[serde(default)]
    pub battery: Battery,

    /// 地理位置，`None` 表示位置未知
    #[serde(default)]
    pub location: Option<Location>,

    /// 最后更新时间
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
}

impl DeviceRecord {
    /// 创建新记录，电量不可用、位置未知
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            battery: Battery::Unavailable,
            location: None,
            last_updated: None,
        }
    }

    /// 使用默认名称模板创建记录
    pub fn with_default_name(id: impl Into<String>) -> Self {
        let id = id.into();
        let name = default_name(&id);
        Self::new(id, name)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn with_battery(mut self, battery: Battery) -> Self {
        self.battery = battery;
        self
    }

    pub fn with_location(mut self, location: Option<Location>) -> Self {
        self.location = location;
        self
    }

    pub fn with_last_updated(mut self, at: DateTime<Utc>) -> Self {
        self.last_updated = Some(at);
        self
    }

    /// 更新时间戳
    pub fn touch(&mut self) {
        self.last_updated = Some(Utc::now());
    }

    /// 名称是否仍为默认模板
    pub fn has_default_name(&self) -> bool {
        self.name == default_name(&self.id)
    }
}

/// 默认名称模板
pub fn default_name(id: &str) -> String {
    format!("Device {}", id)
}

/// 电量
///
/// 序列化为 `0..=100` 的整数，不可用时为 `null`。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "Option<u8>", into = "Option<u8>")]
pub enum Battery {
    /// 电量百分比
    Level(u8),
    /// 不支持或被拒绝
    #[default]
    Unavailable,
}

impl Battery {
    /// 由百分比构造，超出 0..=100 视为不可用
    pub fn from_percent(percent: u8) -> Self {
        if percent <= 100 {
            Battery::Level(percent)
        } else {
            Battery::Unavailable
        }
    }

    /// 由浮点百分比构造（四舍五入）
    pub fn from_f64(value: f64) -> Self {
        if value.is_finite() && (0.0..=100.0).contains(&value) {
            Battery::Level(value.round() as u8)
        } else {
            Battery::Unavailable
        }
    }

    pub fn level(&self) -> Option<u8> {
        match self {
            Battery::Level(level) => Some(*level),
            Battery::Unavailable => None,
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, Battery::Level(_))
    }
}

impl From<Option<u8>> for Battery {
    fn from(value: Option<u8>) -> Self {
        value.map(Battery::from_percent).unwrap_or_default()
    }
}

impl From<Battery> for Option<u8> {
    fn from(value: Battery) -> Self {
        value.level()
    }
}

impl fmt::Display for Battery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Battery::Level(level) => write!(f, "{}%", level),
            Battery::Unavailable => write!(f, "unavailable"),
        }
    }
}

/// 地理位置（度）
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    /// 纬度
    pub lat: f64,
    /// 经度
    pub lng: f64,
}

impl Location {
    /// 创建位置，坐标越界或非有限值时返回 `None`
    pub fn new(lat: f64, lng: f64) -> Option<Self> {
        let location = Self { lat, lng };
        location.is_valid().then_some(location)
    }

    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lng)
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.4}, {:.4}", self.lat, self.lng)
    }
}
