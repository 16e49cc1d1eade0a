use anyhow::{anyhow, Context, Result};
use config::{Config, Environment, File, FileFormat};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::AppConfig;

/// 配置文件名
pub const CONFIG_FILE: &str = "findmy.toml";

/// 环境变量前缀，如 `FINDMY__SENSORS__POLL_INTERVAL_SECS=30`
pub const ENV_PREFIX: &str = "FINDMY";

/// 配置加载器
///
/// 读取 `<config_dir>/findmy.toml`，再叠加 `FINDMY__*` 环境变量。
/// 配置文件不存在时使用默认值。
pub struct ConfigLoader {
    config_dir: PathBuf,

    /// 替代进程环境变量（测试用）
    env: Option<HashMap<String, String>>,
}

impl ConfigLoader {
    /// 创建配置加载器
    pub fn new<P: AsRef<Path>>(config_dir: P) -> Self {
        Self {
            config_dir: config_dir.as_ref().to_path_buf(),
            env: None,
        }
    }

    /// 使用给定的变量代替进程环境变量
    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.env = Some(env);
        self
    }

    pub fn config_path(&self) -> PathBuf {
        self.config_dir.join(CONFIG_FILE)
    }

    /// 加载并验证配置
    pub fn load(&self) -> Result<AppConfig> {
        let config = self.load_unvalidated()?;
        config.validate()?;
        Ok(config)
    }

    /// 加载配置，不做验证
    pub fn load_unvalidated(&self) -> Result<AppConfig> {
        let config_path = self.config_path();
        let mut builder = Config::builder();

        if config_path.exists() {
            builder = builder.add_source(File::new(
                config_path.to_str().ok_or_else(|| anyhow!("Invalid config path"))?,
                FileFormat::Toml,
            ));
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true)
                .source(self.env.clone()),
        );

        let config = builder
            .build()
            .with_context(|| format!("Failed to read {}", config_path.display()))?;

        config
            .try_deserialize()
            .with_context(|| format!("Invalid configuration in {}", config_path.display()))
    }
}
