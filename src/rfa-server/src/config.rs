// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Configuration file support for rfa-server.
//!
//! Config is loaded from the `[rfa-server]` section of `rfa.toml`.
//! Default search order:
//! 1. Path specified via `--config` CLI argument
//! 2. `./rfa.toml`
//! 3. `~/.config/rfa/rfa.toml`
//! 4. `/etc/rfa/rfa.toml`

use std::path::PathBuf;
use std::time::Duration;

use rfa_app::ConfigFile;
use rfa_core::{DemodulationMode, WaterfallSpeed, AUDIO_RATE, MIN_INPUT_RATE};
use rfa_pipeline::{PipelineOptions, SampleFormat};
use serde::{Deserialize, Serialize};

/// Top-level server configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub general: GeneralConfig,
    /// I/Q input
    pub source: SourceConfig,
    pub demod: DemodConfig,
    /// Spectrum / waterfall settings
    pub fft: FftConfig,
    pub squelch: SquelchConfig,
    /// Raw I/Q recording
    pub recording: RecordingConfig,
    pub audio: AudioConfig,
    /// Event and load reporting
    pub report: ReportConfig,
}

/// General application settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log level (trace, debug, info, warn, error)
    pub log_level: Option<String>,
}

/// Where samples come from.
///
/// Without a `path` the server runs a synthetic tone at `tone_offset_hz`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Raw interleaved I/Q capture file
    pub path: Option<PathBuf>,
    /// Sample layout: "s16le", "u8" or "s8"
    pub format: String,
    pub sample_rate: u32,
    pub center_frequency_hz: i64,
    /// Bytes per packet read from the capture
    pub packet_size: usize,
    /// Rewind at end of file
    pub repeat: bool,
    /// Deliver at the capture's real-time rate
    pub throttle: bool,
    /// Offset of the synthetic tone from the centre frequency
    pub tone_offset_hz: f64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            path: None,
            format: SampleFormat::S16Le.as_str().to_string(),
            sample_rate: 2_048_000,
            center_frequency_hz: 100_000_000,
            packet_size: 65_536,
            repeat: false,
            throttle: true,
            tone_offset_hz: 100_000.0,
        }
    }
}

impl SourceConfig {
    pub fn sample_format(&self) -> Result<SampleFormat, String> {
        self.format.parse()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DemodConfig {
    pub enabled: bool,
    pub mode: DemodulationMode,
    /// Absolute channel frequency; defaults to the source centre
    pub channel_frequency_hz: Option<i64>,
    /// Channel width; defaults to the mode's default width
    pub channel_width_hz: Option<u32>,
    pub volume: f32,
}

impl Default for DemodConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            mode: DemodulationMode::Nfm,
            channel_frequency_hz: None,
            channel_width_hz: None,
            volume: 1.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FftConfig {
    pub size: usize,
    pub waterfall_speed: WaterfallSpeed,
    pub peak_hold: bool,
}

impl Default for FftConfig {
    fn default() -> Self {
        Self {
            size: 4096,
            waterfall_speed: WaterfallSpeed::Normal,
            peak_hold: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SquelchConfig {
    pub enabled: bool,
    pub threshold_db: f32,
}

impl Default for SquelchConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            threshold_db: -60.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingConfig {
    /// Start recording as soon as the pipeline runs
    pub enabled: bool,
    pub directory: PathBuf,
    pub only_when_squelch_satisfied: bool,
    pub max_duration_secs: Option<u64>,
    pub max_size_bytes: Option<u64>,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            directory: PathBuf::from("."),
            only_when_squelch_satisfied: false,
            max_duration_secs: None,
            max_size_bytes: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Rate written into the WAV header; demodulated audio is always
    /// produced at [`AUDIO_RATE`], so no other value is accepted
    pub sample_rate: u32,
    /// Write demodulated audio here when set
    pub wav_path: Option<PathBuf>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: AUDIO_RATE,
            wav_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    /// Interval of the stage load log line; 0 disables it
    pub load_interval_ms: u64,
    /// Print every pipeline event as a JSON line on stdout
    pub events_json: bool,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            load_interval_ms: 5_000,
            events_json: false,
        }
    }
}

impl ServerConfig {
    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), String> {
        validate_log_level(self.general.log_level.as_deref())?;

        let format = self
            .source
            .sample_format()
            .map_err(|e| format!("[source].format: {}", e))?;
        if self.source.sample_rate == 0 {
            return Err("[source].sample_rate must be > 0".to_string());
        }
        if self.source.packet_size < format.bytes_per_sample() {
            return Err(format!(
                "[source].packet_size must hold at least one {} sample ({} bytes)",
                format,
                format.bytes_per_sample()
            ));
        }

        if self.demod.enabled && self.demod.mode.is_active() {
            if self.source.sample_rate < MIN_INPUT_RATE {
                return Err(format!(
                    "[demod] needs [source].sample_rate >= {} (got {})",
                    MIN_INPUT_RATE, self.source.sample_rate
                ));
            }
            if let Some(channel) = self.demod.channel_frequency_hz {
                let half = self.source.sample_rate as i64 / 2;
                let offset = (channel - self.source.center_frequency_hz).abs();
                if offset > half {
                    return Err(format!(
                        "[demod].channel_frequency_hz {} is outside the {} Hz wide band around {}",
                        channel, self.source.sample_rate, self.source.center_frequency_hz
                    ));
                }
            }
        }
        if !self.demod.volume.is_finite() || self.demod.volume < 0.0 {
            return Err("[demod].volume must be a finite value >= 0".to_string());
        }

        if self.fft.size < 2 {
            return Err("[fft].size must be >= 2".to_string());
        }
        if !self.squelch.threshold_db.is_finite() {
            return Err("[squelch].threshold_db must be finite".to_string());
        }
        if self.recording.max_duration_secs == Some(0) {
            return Err("[recording].max_duration_secs must be > 0 when set".to_string());
        }
        if self.recording.max_size_bytes == Some(0) {
            return Err("[recording].max_size_bytes must be > 0 when set".to_string());
        }
        if self.audio.sample_rate != AUDIO_RATE {
            return Err(format!(
                "[audio].sample_rate must be {} (got {})",
                AUDIO_RATE, self.audio.sample_rate
            ));
        }
        Ok(())
    }

    /// Pipeline settings derived from the config.
    pub fn pipeline_options(&self) -> PipelineOptions {
        PipelineOptions {
            fft_size: self.fft.size,
            mode: if self.demod.enabled {
                self.demod.mode
            } else {
                DemodulationMode::Off
            },
            channel_frequency: self.demod.channel_frequency_hz,
            channel_width: self.demod.channel_width_hz,
            volume: self.demod.volume,
            waterfall_speed: self.fft.waterfall_speed,
            peak_hold: self.fft.peak_hold,
            squelch_threshold_db: self.squelch.enabled.then_some(self.squelch.threshold_db),
        }
    }

    pub fn max_recording_duration(&self) -> Option<Duration> {
        self.recording.max_duration_secs.map(Duration::from_secs)
    }

    /// Generate an example configuration as a TOML string.
    pub fn example_toml() -> String {
        let example = ServerConfig {
            general: GeneralConfig {
                log_level: Some("info".to_string()),
            },
            source: SourceConfig {
                path: Some(PathBuf::from("capture.cu8")),
                format: SampleFormat::U8.as_str().to_string(),
                ..SourceConfig::default()
            },
            demod: DemodConfig {
                enabled: true,
                channel_frequency_hz: Some(100_100_000),
                ..DemodConfig::default()
            },
            recording: RecordingConfig {
                max_duration_secs: Some(600),
                ..RecordingConfig::default()
            },
            audio: AudioConfig {
                wav_path: Some(PathBuf::from("audio.wav")),
                ..AudioConfig::default()
            },
            ..ServerConfig::default()
        };

        let mut wrapper = toml::Table::new();
        if let Ok(toml::Value::Table(section)) = toml::Value::try_from(&example) {
            wrapper.insert(
                <Self as ConfigFile>::section_key().to_string(),
                toml::Value::Table(section),
            );
        }
        toml::to_string_pretty(&wrapper).unwrap_or_default()
    }
}

fn validate_log_level(level: Option<&str>) -> Result<(), String> {
    if let Some(level) = level {
        match level {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => {
                return Err(format!(
                    "[general].log_level '{}' is invalid (expected one of: trace, debug, info, warn, error)",
                    level
                ))
            }
        }
    }
    Ok(())
}

impl ConfigFile for ServerConfig {
    fn section_key() -> &'static str {
        "rfa-server"
    }

    fn validate(&self) -> Result<(), String> {
        ServerConfig::validate(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert!(config.general.log_level.is_none());
        assert!(config.source.path.is_none());
        assert_eq!(config.source.sample_format(), Ok(SampleFormat::S16Le));
        assert!(!config.demod.enabled);
        assert_eq!(config.fft.size, 4096);
        assert_eq!(config.fft.waterfall_speed, WaterfallSpeed::Normal);
        assert_eq!(config.audio.sample_rate, 48_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_minimal_section() {
        let toml_str = r#"
[rfa-server.source]
path = "/tmp/capture.cu8"
format = "u8"
sample_rate = 2400000
center_frequency_hz = 145000000
"#;
        let config = ServerConfig::load_from_str(toml_str, Path::new("mem")).unwrap();
        assert_eq!(config.source.path, Some(PathBuf::from("/tmp/capture.cu8")));
        assert_eq!(config.source.sample_format(), Ok(SampleFormat::U8));
        assert_eq!(config.source.sample_rate, 2_400_000);
        assert_eq!(config.source.packet_size, 65_536);
        assert!(config.source.throttle);
    }

    #[test]
    fn test_parse_full_config() {
        let toml_str = r#"
[rfa-server.general]
log_level = "debug"

[rfa-server.source]
sample_rate = 1000000
center_frequency_hz = 50000000
repeat = true

[rfa-server.demod]
enabled = true
mode = "WFM"
channel_frequency_hz = 50200000
channel_width_hz = 120000
volume = 0.5

[rfa-server.fft]
size = 2048
waterfall_speed = "fast"
peak_hold = true

[rfa-server.squelch]
enabled = true
threshold_db = -45.5

[rfa-server.recording]
enabled = true
directory = "/var/lib/rfa"
only_when_squelch_satisfied = true
max_duration_secs = 30

[rfa-server.audio]
wav_path = "out.wav"

[rfa-server.report]
load_interval_ms = 0
events_json = true
"#;
        let config = ServerConfig::load_from_str(toml_str, Path::new("mem")).unwrap();
        assert_eq!(config.general.log_level.as_deref(), Some("debug"));
        assert!(config.source.repeat);
        assert_eq!(config.demod.mode, DemodulationMode::Wfm);
        assert_eq!(config.fft.waterfall_speed, WaterfallSpeed::Fast);
        assert_eq!(config.recording.directory, PathBuf::from("/var/lib/rfa"));
        assert_eq!(config.max_recording_duration(), Some(Duration::from_secs(30)));
        assert!(config.report.events_json);

        let options = config.pipeline_options();
        assert_eq!(options.fft_size, 2048);
        assert_eq!(options.mode, DemodulationMode::Wfm);
        assert_eq!(options.channel_frequency, Some(50_200_000));
        assert_eq!(options.channel_width, Some(120_000));
        assert_eq!(options.squelch_threshold_db, Some(-45.5));
        assert!(options.peak_hold);
    }

    #[test]
    fn test_disabled_demod_and_squelch_map_to_off() {
        let options = ServerConfig::default().pipeline_options();
        assert_eq!(options.mode, DemodulationMode::Off);
        assert!(options.squelch_threshold_db.is_none());
    }

    #[test]
    fn test_validate_rejects_unknown_format() {
        let mut config = ServerConfig::default();
        config.source.format = "f32".to_string();
        assert!(config.validate().unwrap_err().contains("[source].format"));
    }

    #[test]
    fn test_validate_rejects_bad_log_level() {
        let mut config = ServerConfig::default();
        config.general.log_level = Some("loud".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_low_rate_demodulation() {
        let mut config = ServerConfig::default();
        config.demod.enabled = true;
        config.source.sample_rate = 250_000;
        assert!(config.validate().unwrap_err().contains("sample_rate"));

        config.demod.mode = DemodulationMode::Off;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_channel_outside_band() {
        let mut config = ServerConfig::default();
        config.demod.enabled = true;
        config.demod.channel_frequency_hz = Some(config.source.center_frequency_hz + 2_000_000);
        assert!(config.validate().unwrap_err().contains("channel_frequency_hz"));
    }

    #[test]
    fn test_validate_rejects_zero_limits() {
        let mut config = ServerConfig::default();
        config.recording.max_size_bytes = Some(0);
        assert!(config.validate().is_err());

        let mut config = ServerConfig::default();
        config.source.packet_size = 3;
        assert!(config.validate().is_err());

        let mut config = ServerConfig::default();
        config.fft.size = 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_audio_rate_other_than_output_rate() {
        let mut config = ServerConfig::default();
        assert!(config.validate().is_ok());

        config.audio.sample_rate = 44_100;
        assert!(config.validate().unwrap_err().contains("[audio].sample_rate"));

        config.audio.sample_rate = 0;
        assert!(config.validate().is_err());

        config.audio.sample_rate = AUDIO_RATE;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_example_toml_round_trips() {
        let example = ServerConfig::example_toml();
        assert!(example.contains("rfa-server"));
        let config = ServerConfig::load_from_str(&example, Path::new("example")).unwrap();
        assert!(config.demod.enabled);
        assert_eq!(config.source.sample_format(), Ok(SampleFormat::U8));
        assert_eq!(config.audio.wav_path, Some(PathBuf::from("audio.wav")));
    }
}
