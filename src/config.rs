use crate::commandline::PortArgs;
use anyhow::{Context, Result};
use enginemon_lib::channel::{ChannelSpec, ChannelTable};
use enginemon_lib::persistence;
use enginemon_lib::settings::PortSettings;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    pub port: PortSettings,
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    pub csv_file: PathBuf,
    #[serde(with = "humantime_serde")]
    pub flush_interval: Duration,
    /// Replaces the built-in engine channel table when present.
    pub channels: Option<Vec<ChannelSpec>>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: PortSettings::default(),
            timeout: Duration::from_millis(100),
            csv_file: PathBuf::from(persistence::DEFAULT_FILE_NAME),
            flush_interval: Duration::from_secs(1),
            channels: None,
        }
    }
}

impl Config {
    pub const DEFAULT_CONFIG_FILE: &str = "enginemon.yaml";

    pub fn load(config_file_path: impl AsRef<Path>) -> Result<Self> {
        let config_file_path = config_file_path.as_ref();
        log::debug!("Loading config file from {config_file_path:?}");
        let config_file = std::fs::File::open(config_file_path)
            .with_context(|| format!("Cannot open config file {config_file_path:?}"))?;
        let config: Self = serde_yaml::from_reader(&config_file)
            .with_context(|| format!("Cannot read config from file: {config_file_path:?}"))?;
        Ok(config)
    }

    /// Loads [`Config::DEFAULT_CONFIG_FILE`] if it exists, the defaults otherwise.
    pub fn load_default() -> Result<Self> {
        if Path::new(Self::DEFAULT_CONFIG_FILE).exists() {
            Self::load(Self::DEFAULT_CONFIG_FILE)
        } else {
            log::debug!("No {} found, using defaults", Self::DEFAULT_CONFIG_FILE);
            Ok(Self::default())
        }
    }

    pub fn apply_port_args(&mut self, args: &PortArgs) {
        if let Some(device) = &args.device {
            self.port.device = device.clone();
        }
        if let Some(baud_rate) = args.baud_rate {
            self.port.baud_rate = baud_rate;
        }
        if let Some(parity) = args.parity {
            self.port.parity = parity.into();
        }
        if let Some(stop_bits) = args.stop_bits {
            self.port.stop_bits = stop_bits.into();
        }
    }

    pub fn channel_table(&self) -> ChannelTable {
        match &self.channels {
            Some(channels) => ChannelTable::new(channels.iter().cloned()),
            None => ChannelTable::default(),
        }
    }
}
