// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Audio output rate in Hz. Every quadrature rate is a multiple of it.
pub const AUDIO_RATE: u32 = 48_000;

/// Audio pitch in Hz of a CW carrier sitting exactly on the channel frequency.
pub const CW_TONE_HZ: i64 = 750;

/// Lowest source rate that can feed every demodulation mode.
pub const MIN_INPUT_RATE: u32 = DemodulationMode::Wfm.params().quadrature_rate;

/// Static parameters of a demodulation mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModeParams {
    /// Sample rate the demodulation math runs at.
    pub quadrature_rate: u32,
    pub min_channel_width: u32,
    pub max_channel_width: u32,
    pub default_channel_width: u32,
    /// Tuning granularity in Hz.
    pub tune_step: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DemodulationMode {
    #[default]
    Off,
    Am,
    Nfm,
    Wfm,
    Lsb,
    Usb,
    Cw,
}

impl DemodulationMode {
    pub const ALL: [DemodulationMode; 7] = [
        DemodulationMode::Off,
        DemodulationMode::Am,
        DemodulationMode::Nfm,
        DemodulationMode::Wfm,
        DemodulationMode::Lsb,
        DemodulationMode::Usb,
        DemodulationMode::Cw,
    ];

    pub const fn params(self) -> ModeParams {
        // (quadrature multiple, min, max, default, step)
        let (multiple, min, max, default, step) = match self {
            // OFF never produces audio; its rate only keeps the resampler valid.
            DemodulationMode::Off => (2, 0, 50_000, 0, 0),
            DemodulationMode::Am => (2, 3_000, 15_000, 8_000, 1_000),
            DemodulationMode::Nfm => (2, 3_000, 15_000, 10_000, 1_000),
            DemodulationMode::Wfm => (8, 30_000, 125_000, 65_000, 100_000),
            DemodulationMode::Lsb => (2, 1_500, 5_000, 2_800, 100),
            DemodulationMode::Usb => (2, 1_500, 5_000, 2_800, 100),
            DemodulationMode::Cw => (1, 150, 800, 300, 50),
        };
        ModeParams {
            quadrature_rate: multiple * AUDIO_RATE,
            min_channel_width: min,
            max_channel_width: max,
            default_channel_width: default,
            tune_step: step,
        }
    }

    pub const fn quadrature_rate(self) -> u32 {
        self.params().quadrature_rate
    }

    /// Amount the mixer tunes below the channel frequency, so the channel
    /// lands at this offset in baseband.
    pub const fn audio_offset_hz(self) -> i64 {
        match self {
            DemodulationMode::Cw => CW_TONE_HZ,
            _ => 0,
        }
    }

    pub fn is_active(self) -> bool {
        self != DemodulationMode::Off
    }

    /// Clamp a channel width into this mode's bounds.
    pub fn clamp_width(self, width: u32) -> u32 {
        let params = self.params();
        width.clamp(params.min_channel_width, params.max_channel_width)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DemodulationMode::Off => "OFF",
            DemodulationMode::Am => "AM",
            DemodulationMode::Nfm => "NFM",
            DemodulationMode::Wfm => "WFM",
            DemodulationMode::Lsb => "LSB",
            DemodulationMode::Usb => "USB",
            DemodulationMode::Cw => "CW",
        }
    }
}

impl fmt::Display for DemodulationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DemodulationMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DemodulationMode::ALL
            .into_iter()
            .find(|mode| mode.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| {
                format!(
                    "unknown demodulation mode '{}' (expected one of: off, am, nfm, wfm, lsb, usb, cw)",
                    s
                )
            })
    }
}
