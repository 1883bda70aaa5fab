use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use replay_sdk::znc::timestamp::DEFAULT_PATTERN;
use serde::Deserialize;

/// Replay a captured ZNC session transcript as a timestamped event log.
#[derive(Parser, Debug, Clone)]
#[command(name = "znc-replay", version, about)]
pub struct ReplayConfig {
    /// Transcript file with one raw inbound IRC line per line.
    /// Reads stdin when not set.
    #[arg(long)]
    pub input: Option<PathBuf>,

    /// Our nick on the bouncer. Taken from the welcome numeric when the
    /// transcript has one; channels are only tracked once it is known.
    #[arg(long)]
    pub nick: Option<String>,

    /// Timestamp format ZNC prepends to replayed lines (Qt date pattern).
    #[arg(long)]
    pub timestamp_format: Option<String>,

    /// Capabilities the simulated server offers in CAP LS.
    /// Comma-separated. No negotiation is simulated when empty.
    #[arg(long, value_delimiter = ',')]
    pub caps: Vec<String>,

    /// TOML file with a [playback] section. Command-line flags win.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Also print every raw inbound line.
    #[arg(long)]
    pub raw: bool,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            input: None,
            nick: None,
            timestamp_format: None,
            caps: vec![],
            config: None,
            raw: false,
        }
    }
}

/// On-disk configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub playback: PlaybackSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PlaybackSection {
    pub timestamp_format: Option<String>,
    pub nick: Option<String>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("parsing config {}", path.display()))
    }
}

/// Settings after merging the config file under the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub nick: Option<String>,
    pub timestamp_format: String,
    pub caps: Vec<String>,
    pub raw: bool,
}

impl ReplayConfig {
    pub fn resolve(&self) -> Result<Settings> {
        let file = match &self.config {
            Some(path) => FileConfig::load(path)?,
            None => FileConfig::default(),
        };
        Ok(self.merge(file))
    }

    fn merge(&self, file: FileConfig) -> Settings {
        Settings {
            nick: self.nick.clone().or(file.playback.nick),
            timestamp_format: self
                .timestamp_format
                .clone()
                .or(file.playback.timestamp_format)
                .unwrap_or_else(|| DEFAULT_PATTERN.to_string()),
            caps: self.caps.clone(),
            raw: self.raw,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_without_file() {
        let settings = ReplayConfig::default().resolve().unwrap();
        assert_eq!(settings.timestamp_format, "[hh:mm:ss]");
        assert_eq!(settings.nick, None);
        assert!(settings.caps.is_empty());
    }

    #[test]
    fn caps_are_comma_separated() {
        let config = ReplayConfig::parse_from(["znc-replay", "--caps", "communi,server-time"]);
        assert_eq!(config.caps, vec!["communi", "server-time"]);
    }

    #[test]
    fn file_values_fill_gaps() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[playback]\ntimestamp_format = \"(HH:mm)\"\nnick = \"filenick\"").unwrap();

        let config = ReplayConfig {
            config: Some(file.path().to_path_buf()),
            nick: Some("cli".to_string()),
            ..Default::default()
        };
        let settings = config.resolve().unwrap();
        assert_eq!(settings.nick.as_deref(), Some("cli"));
        assert_eq!(settings.timestamp_format, "(HH:mm)");
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[playback]\nclock = 5").unwrap();

        let config = ReplayConfig {
            config: Some(file.path().to_path_buf()),
            ..Default::default()
        };
        assert!(config.resolve().is_err());
    }

    #[test]
    fn missing_file_is_an_error() {
        let config = ReplayConfig {
            config: Some(PathBuf::from("/nonexistent/znc-replay.toml")),
            ..Default::default()
        };
        let err = config.resolve().unwrap_err();
        assert!(err.to_string().contains("reading config"));
    }
}
