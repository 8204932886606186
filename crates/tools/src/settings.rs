//! TOML 設定ファイル
//!
//! ```toml
//! [model]
//! hidden_size = 64
//! input_mode = "hybrid"
//! pooling_mode = "attention"
//!
//! [training]
//! epochs = 20
//! batch_size = 32
//! ```
//!
//! 省略した項目は既定値になる。

use std::path::Path;

use aimrnn_core::RnnConfig;
use aimrnn_core::config::DEFAULT_BATCH_SIZE;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub const DEFAULT_EPOCHS: usize = 10;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingSettings {
    pub epochs: usize,
    pub batch_size: usize,
}

impl Default for TrainingSettings {
    fn default() -> Self {
        Self {
            epochs: DEFAULT_EPOCHS,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub model: RnnConfig,
    pub training: TrainingSettings,
}

impl Settings {
    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).context("Failed to parse settings")
    }

    /// ファイルから読む（None なら既定値）
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::from_toml(&text).with_context(|| format!("Invalid settings file {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aimrnn_core::{InputMode, PoolingMode};

    #[test]
    fn test_partial_settings_use_defaults() {
        let s = Settings::from_toml(
            r#"
            [model]
            hidden_size = 32
            input_mode = "raw_sequence"
            pooling_mode = "max_pooling"

            [training]
            epochs = 3
            "#,
        )
        .unwrap();
        assert_eq!(s.model.hidden_size, 32);
        assert_eq!(s.model.input_mode, InputMode::RawSequence);
        assert_eq!(s.model.pooling_mode, PoolingMode::MaxPooling);
        assert_eq!(s.model.num_layers, RnnConfig::default().num_layers);
        assert_eq!(s.training.epochs, 3);
        assert_eq!(s.training.batch_size, DEFAULT_BATCH_SIZE);
    }

    #[test]
    fn test_empty_and_missing() {
        assert_eq!(Settings::from_toml("").unwrap(), Settings::default());
        assert_eq!(Settings::load(None).unwrap(), Settings::default());
        assert!(Settings::from_toml("[model]\nhidden_size = \"big\"").is_err());
    }
}
