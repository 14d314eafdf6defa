//! TOML configuration for the command-line receiver.
//!
//! The file carries the core pipeline sections ([sdr], [demod],
//! [decoder], [image]) plus the CLI-only [input] section selecting a
//! recorded IQ file. Every field has a default so a partial file (or
//! none at all) works; CLI flags override the loaded values.

use std::path::{Path, PathBuf};

use color_eyre::eyre::{Context, Result};
use lrpt_core::Config;
use serde::Deserialize;

/// Sample layout of a raw IQ recording.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum IqFileFormat {
    /// Decide from the file extension (.wav, else 8-bit raw).
    #[default]
    Auto,
    U8,
    I16,
    Wav,
}

/// Where the session's samples come from.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct InputConfig {
    /// Recorded IQ file to play back. Without it the CLI expects a
    /// live SDR, which this build treats as an external collaborator.
    pub iq_file: Option<PathBuf>,
    pub format: IqFileFormat,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct CliConfig {
    pub input: InputConfig,
    #[serde(flatten)]
    pub core: Config,
}

/// Sections the configuration schema understands.
const KNOWN_SECTIONS: [&str; 5] = ["input", "sdr", "demod", "decoder", "image"];

impl CliConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .wrap_err_with(|| format!("failed to read config file {}", path.display()))?;

        // Unknown keys are ignored, but loudly.
        if let Ok(value) = toml::from_str::<toml::Value>(&content) {
            if let Some(table) = value.as_table() {
                for key in table.keys() {
                    if !KNOWN_SECTIONS.contains(&key.as_str()) {
                        tracing::warn!(key = key.as_str(), "ignoring unknown config key");
                    }
                }
            }
        }

        toml::from_str(&content)
            .wrap_err_with(|| format!("failed to parse config file {}", path.display()))
    }

    /// Load the given file, or the default `~/.lrptrc.toml` when it
    /// exists, or built-in defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }
        if let Some(home) = std::env::var_os("HOME") {
            let default_path = PathBuf::from(home).join(".lrptrc.toml");
            if default_path.is_file() {
                return Self::from_file(&default_path);
            }
        }
        Ok(Self::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let config: CliConfig = toml::from_str("").unwrap();
        assert!(config.input.iq_file.is_none());
        assert_eq!(config.core.demod.symbol_rate, 72_000);
        assert!(config.core.validate().is_ok());
    }

    #[test]
    fn partial_sections_override_defaults() {
        let config: CliConfig = toml::from_str(
            r#"
            [input]
            iq_file = "/tmp/pass.wav"
            format = "wav"

            [sdr]
            sample_rate = 2048000

            [demod]
            psk_mode = "DOQPSK"

            [decoder]
            apids = [68, 65, 64]

            [image]
            colorize = false
            "#,
        )
        .unwrap();

        assert_eq!(config.input.format, IqFileFormat::Wav);
        assert_eq!(config.core.sdr.sample_rate, 2_048_000);
        assert_eq!(config.core.demod.psk_mode, lrpt_core::PskMode::Doqpsk);
        assert_eq!(config.core.decoder.apids, [68, 65, 64]);
        assert!(!config.core.image.colorize);
    }

    #[test]
    fn unknown_keys_are_tolerated() {
        let config: CliConfig = toml::from_str("unrelated_key = 5\n").unwrap();
        assert!(config.core.validate().is_ok());
    }
}
