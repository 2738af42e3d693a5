use anyhow::{Context, Result};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

use crate::state::ensure_questline_home;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub user: UserSection,
    #[serde(default)]
    pub log: LogSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserSection {
    /// Id every command acts as.
    pub id: String,
    /// IANA name; decides where "today" starts and ends.
    pub timezone: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSection {
    /// EnvFilter directive used when RUST_LOG is unset.
    pub level: String,
}

impl Default for UserSection {
    fn default() -> Self {
        Self {
            id: "local".to_string(),
            timezone: "UTC".to_string(),
        }
    }
}

impl Default for LogSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Config {
    pub fn timezone(&self) -> Result<Tz> {
        questline_core::time::parse_timezone(&self.user.timezone)
            .context("config.toml [user].timezone")
    }
}

pub fn config_path() -> Result<PathBuf> {
    Ok(ensure_questline_home()?.join("config.toml"))
}

pub fn load_config() -> Result<Config> {
    let p = config_path()?;
    if !p.exists() {
        return Ok(Config::default());
    }
    let s = fs::read_to_string(&p).with_context(|| format!("read {}", p.display()))?;
    toml::from_str(&s).context("parse config.toml")
}

pub fn save_config(cfg: &Config) -> Result<()> {
    let p = config_path()?;
    let s = toml::to_string_pretty(cfg).context("serialize config")?;
    fs::write(&p, s).with_context(|| format!("write {}", p.display()))?;
    Ok(())
}

pub fn init_config(user_id: Option<String>, timezone: Option<String>) -> Result<()> {
    let p = config_path()?;
    if p.exists() {
        println!("Config already exists: {}", p.display());
        return Ok(());
    }
    let mut cfg = Config::default();
    if let Some(id) = user_id {
        cfg.user.id = id;
    }
    if let Some(tz) = timezone {
        cfg.user.timezone = tz;
    }
    cfg.timezone()?;
    save_config(&cfg)?;
    println!("Wrote {}", p.display());
    Ok(())
}
