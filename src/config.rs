//! TOML configuration file for engine and device settings.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::audio::Quantize;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_max_loops")]
    pub max_loops: usize,

    #[serde(default = "default_max_lookback_bars")]
    pub max_lookback_bars: u32,

    /// Slowest tempo the lookback ring must hold; sizes the ring buffer.
    #[serde(default = "default_min_bpm")]
    pub min_bpm: f64,

    #[serde(default = "default_bpm")]
    pub bpm: f64,

    #[serde(default = "default_beats_per_bar")]
    pub beats_per_bar: u32,

    #[serde(default = "default_num_input_channels")]
    pub num_input_channels: usize,

    /// Peak threshold for live-channel detection; 0 disables.
    #[serde(default)]
    pub live_threshold: f32,

    #[serde(default = "default_live_window_ms")]
    pub live_window_ms: u32,

    /// "free", "beat", or "bar"
    #[serde(default = "default_quantize")]
    pub default_quantize: String,

    #[serde(default = "default_lookback_bars")]
    pub lookback_bars: u32,

    #[serde(default = "default_crossfade_samples")]
    pub crossfade_samples: u32,

    #[serde(default)]
    pub latency_compensation_samples: u64,

    #[serde(default)]
    pub input_monitoring: bool,

    #[serde(default = "default_true")]
    pub click_enabled: bool,

    #[serde(default = "default_click_volume")]
    pub click_volume: f32,

    #[serde(default)]
    pub midi_sync_enabled: bool,

    /// MIDI output port to send clock to; first available when unset.
    #[serde(default)]
    pub midi_port: Option<String>,

    #[serde(default)]
    pub input_device: Option<String>,

    #[serde(default)]
    pub output_device: Option<String>,
}

fn default_max_loops() -> usize {
    8
}
fn default_max_lookback_bars() -> u32 {
    8
}
fn default_min_bpm() -> f64 {
    60.0
}
fn default_bpm() -> f64 {
    120.0
}
fn default_beats_per_bar() -> u32 {
    4
}
fn default_num_input_channels() -> usize {
    1
}
fn default_live_window_ms() -> u32 {
    500
}
fn default_quantize() -> String {
    "bar".to_string()
}
fn default_lookback_bars() -> u32 {
    1
}
fn default_crossfade_samples() -> u32 {
    256
}
fn default_true() -> bool {
    true
}
fn default_click_volume() -> f32 {
    0.5
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_loops: default_max_loops(),
            max_lookback_bars: default_max_lookback_bars(),
            min_bpm: default_min_bpm(),
            bpm: default_bpm(),
            beats_per_bar: default_beats_per_bar(),
            num_input_channels: default_num_input_channels(),
            live_threshold: 0.0,
            live_window_ms: default_live_window_ms(),
            default_quantize: default_quantize(),
            lookback_bars: default_lookback_bars(),
            crossfade_samples: default_crossfade_samples(),
            latency_compensation_samples: 0,
            input_monitoring: false,
            click_enabled: true,
            click_volume: default_click_volume(),
            midi_sync_enabled: false,
            midi_port: None,
            input_device: None,
            output_device: None,
        }
    }
}

impl Config {
    /// Default location: `$XDG_CONFIG_HOME/retroloop/config.toml`, or
    /// `~/.config/retroloop/config.toml`.
    pub fn default_path() -> Option<PathBuf> {
        if let Ok(dir) = std::env::var("XDG_CONFIG_HOME") {
            return Some(PathBuf::from(dir).join("retroloop").join("config.toml"));
        }
        std::env::var("HOME").ok().map(|home| {
            PathBuf::from(home)
                .join(".config")
                .join("retroloop")
                .join("config.toml")
        })
    }

    /// Load from an explicit path, or from the default location. A missing
    /// file yields the defaults; a malformed file is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => match Self::default_path() {
                Some(p) if p.exists() => p,
                _ => return Ok(Self::default()),
            },
        };

        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        let config: Config = toml::from_str(&text)
            .with_context(|| format!("parsing config file {}", path.display()))?;
        Ok(config)
    }

    pub fn parsed_quantize(&self) -> Quantize {
        match self.default_quantize.to_ascii_lowercase().as_str() {
            "free" => Quantize::Free,
            "beat" => Quantize::Beat,
            _ => Quantize::Bar,
        }
    }
}
