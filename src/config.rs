//! Scheduler configuration: the TOML file layout, CLI overrides, validation.
//!
//! ```toml
//! [main]
//! hashlists_by_alg_loader_delay_per_try = 10
//! tmp_dir = "/var/lib/hbs/tmp"
//! stale_parsing_after_secs = 3600
//! ```
//!
//! Precedence is CLI/env override, then file, then built-in default.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_DELAY_SECS: u64 = 10;
pub const DEFAULT_STALE_PARSING_SECS: u64 = 3600;
/// Largest stale-parsing threshold the store accepts.
pub const MAX_STALE_PARSING_SECS: u64 = i32::MAX as u64;

/// Everything the scheduler needs, passed in at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Sleep between cycles, whether or not a list was built.
    pub delay: Duration,
    /// Directory new export files are created in.
    pub tmp_dir: PathBuf,
    /// Age after which a `parsing` common list is considered abandoned.
    /// `None` disables the startup sweep.
    pub stale_parsing_after: Option<Duration>,
}

impl SchedulerConfig {
    pub fn new(delay: Duration, tmp_dir: impl Into<PathBuf>) -> Self {
        SchedulerConfig {
            delay,
            tmp_dir: tmp_dir.into(),
            stale_parsing_after: Some(Duration::from_secs(DEFAULT_STALE_PARSING_SECS)),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.delay.is_zero() {
            bail!("delay between checks must be greater than zero");
        }
        if self.tmp_dir.as_os_str().is_empty() {
            bail!("tmp_dir must not be empty");
        }
        if let Some(after) = self.stale_parsing_after {
            if after.as_secs() > MAX_STALE_PARSING_SECS {
                bail!(
                    "stale parsing threshold {}s exceeds the maximum of {}s",
                    after.as_secs(),
                    MAX_STALE_PARSING_SECS
                );
            }
        }
        Ok(())
    }
}

/// On-disk configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub main: MainSection,
}

/// The `[main]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MainSection {
    pub hashlists_by_alg_loader_delay_per_try: Option<u64>,
    pub tmp_dir: Option<PathBuf>,
    pub stale_parsing_after_secs: Option<u64>,
}

impl ConfigFile {
    pub fn parse(toml_str: &str) -> Result<Self> {
        let config: ConfigFile = toml::from_str(toml_str)?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("parsing config file {}", path.display()))
    }
}

/// Values given on the command line or through the environment.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub delay_secs: Option<u64>,
    pub tmp_dir: Option<PathBuf>,
    pub stale_parsing_secs: Option<u64>,
}

/// Merge overrides over the file over defaults, then validate.
pub fn resolve(file: Option<&ConfigFile>, overrides: &Overrides) -> Result<SchedulerConfig> {
    let main = file.map(|f| f.main.clone()).unwrap_or_default();

    let delay_secs = overrides
        .delay_secs
        .or(main.hashlists_by_alg_loader_delay_per_try)
        .unwrap_or(DEFAULT_DELAY_SECS);
    let tmp_dir = overrides
        .tmp_dir
        .clone()
        .or(main.tmp_dir)
        .unwrap_or_else(|| std::env::temp_dir().join("hashlist-consolidator"));
    let stale_secs = overrides
        .stale_parsing_secs
        .or(main.stale_parsing_after_secs)
        .unwrap_or(DEFAULT_STALE_PARSING_SECS);

    let config = SchedulerConfig {
        delay: Duration::from_secs(delay_secs),
        tmp_dir,
        stale_parsing_after: (stale_secs > 0).then(|| Duration::from_secs(stale_secs)),
    };
    config.validate()?;
    Ok(config)
}
