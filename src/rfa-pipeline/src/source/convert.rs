// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Raw capture bytes to normalised complex samples.

use std::f64::consts::PI;
use std::fmt;
use std::str::FromStr;

use rfa_core::SamplePacket;
use tracing::debug;

/// Upper bound on the mixer table length.
const MAX_MIXER_LENGTH: usize = 500;

/// Native I/Q byte layout of a capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SampleFormat {
    /// Interleaved signed 16-bit little-endian I, Q.
    #[default]
    S16Le,
    /// Interleaved unsigned 8-bit (RTL-SDR).
    U8,
    /// Interleaved signed 8-bit (HackRF).
    S8,
}

impl SampleFormat {
    /// Bytes per complex sample.
    pub fn bytes_per_sample(self) -> usize {
        match self {
            SampleFormat::S16Le => 4,
            SampleFormat::U8 | SampleFormat::S8 => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SampleFormat::S16Le => "s16le",
            SampleFormat::U8 => "u8",
            SampleFormat::S8 => "s8",
        }
    }

    fn lookup_table(self) -> Vec<f32> {
        match self {
            SampleFormat::S16Le => (0..=u16::MAX).map(|u| u as i16 as f32 / 32768.0).collect(),
            SampleFormat::U8 => (0..=u8::MAX).map(|b| (b as f32 - 127.4) / 128.0).collect(),
            SampleFormat::S8 => (0..=u8::MAX).map(|b| b as i8 as f32 / 128.0).collect(),
        }
    }
}

impl fmt::Display for SampleFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SampleFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "s16le" | "s16" | "cs16" => Ok(SampleFormat::S16Le),
            "u8" | "cu8" => Ok(SampleFormat::U8),
            "s8" | "cs8" => Ok(SampleFormat::S8),
            other => Err(format!("unknown sample format '{}'", other)),
        }
    }
}

/// Cosine/sine table holding a whole number of mixer cycles.
#[derive(Debug, Clone)]
struct MixerTable {
    frequency: i64,
    sample_rate: u32,
    cos: Vec<f32>,
    sin: Vec<f32>,
    index: usize,
}

impl MixerTable {
    fn new(frequency: i64, sample_rate: u32) -> Self {
        let len = optimal_mixer_length(frequency, sample_rate);
        let step = 2.0 * PI * frequency as f64 / sample_rate.max(1) as f64;
        let (cos, sin) = (0..len)
            .map(|t| {
                let angle = step * t as f64;
                (angle.cos() as f32, angle.sin() as f32)
            })
            .unzip();
        Self {
            frequency,
            sample_rate,
            cos,
            sin,
            index: 0,
        }
    }
}

/// Table length (at most [`MAX_MIXER_LENGTH`]) whose end lines up best with
/// a cycle boundary, so wrapping the index keeps the phase continuous.
fn optimal_mixer_length(frequency: i64, sample_rate: u32) -> usize {
    if frequency == 0 {
        return 1;
    }
    let cycle = sample_rate as f64 / (frequency as f64).abs();
    let mut best = cycle.floor();
    let mut best_err = (cycle - best).abs();
    let mut i = 1.0;
    while i * cycle < MAX_MIXER_LENGTH as f64 {
        let len = i * cycle;
        let err = (len - len.floor()).abs();
        if err < best_err {
            best = len.floor();
            best_err = err;
        }
        i += 1.0;
    }
    (best as usize).max(1)
}

/// Converts one capture format and optionally down-mixes a channel to 0 Hz.
#[derive(Debug, Clone)]
pub struct IqConverter {
    format: SampleFormat,
    lookup: Vec<f32>,
    sample_rate: u32,
    frequency: i64,
    mixer: Option<MixerTable>,
}

impl IqConverter {
    pub fn new(format: SampleFormat, sample_rate: u32, frequency: i64) -> Self {
        Self {
            format,
            lookup: format.lookup_table(),
            sample_rate,
            frequency,
            mixer: None,
        }
    }

    pub fn format(&self) -> SampleFormat {
        self.format
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn set_sample_rate(&mut self, sample_rate: u32) {
        if self.sample_rate != sample_rate {
            self.sample_rate = sample_rate;
            self.mixer = None;
        }
    }

    pub fn frequency(&self) -> i64 {
        self.frequency
    }

    pub fn set_frequency(&mut self, frequency: i64) {
        self.frequency = frequency;
    }

    #[inline]
    fn decode(&self, sample: &[u8]) -> (f32, f32) {
        match self.format {
            SampleFormat::S16Le => (
                self.lookup[u16::from_le_bytes([sample[0], sample[1]]) as usize],
                self.lookup[u16::from_le_bytes([sample[2], sample[3]]) as usize],
            ),
            SampleFormat::U8 | SampleFormat::S8 => {
                (self.lookup[sample[0] as usize], self.lookup[sample[1] as usize])
            }
        }
    }

    /// Append the samples of `raw` to `dest` until it is full.
    ///
    /// Returns the number of samples written. A trailing partial sample is
    /// ignored.
    pub fn fill(&self, raw: &[u8], dest: &mut SamplePacket) -> usize {
        let start = dest.len();
        let capacity = dest.capacity();
        if start >= capacity {
            return 0;
        }
        let mut count = 0;
        {
            let (re, im) = dest.buffers_mut();
            for (out, sample) in (start..capacity).zip(raw.chunks_exact(self.format.bytes_per_sample())) {
                let (i, q) = self.decode(sample);
                re[out] = i;
                im[out] = q;
                count += 1;
            }
        }
        if count == 0 {
            return 0;
        }
        dest.set_len(start + count);
        dest.set_sample_rate(self.sample_rate);
        dest.set_frequency(self.frequency);
        count
    }

    /// Like [`IqConverter::fill`], but shifts `channel_frequency` to 0 Hz.
    ///
    /// The mixer phase carries across calls while the shift stays the same.
    pub fn mix(&mut self, raw: &[u8], dest: &mut SamplePacket, channel_frequency: i64) -> usize {
        let mut mix_frequency = self.frequency - channel_frequency;
        let rate = self.sample_rate as i64;
        if mix_frequency == 0 || rate / mix_frequency.abs() > MAX_MIXER_LENGTH as i64 {
            // The sampled spectrum is periodic in the sample rate.
            mix_frequency += rate;
        }
        let stale = self
            .mixer
            .as_ref()
            .map_or(true, |m| m.frequency != mix_frequency || m.sample_rate != self.sample_rate);
        if stale {
            let table = MixerTable::new(mix_frequency, self.sample_rate);
            debug!(
                "mixer table rebuilt: shift {} Hz, {} entries",
                mix_frequency,
                table.cos.len()
            );
            self.mixer = Some(table);
        }

        let start = dest.len();
        let capacity = dest.capacity();
        if start >= capacity {
            return 0;
        }
        let Some(mut mixer) = self.mixer.take() else {
            return 0;
        };
        let table_len = mixer.cos.len();
        let mut index = if mixer.index >= table_len { 0 } else { mixer.index };
        let mut count = 0;
        {
            let (re, im) = dest.buffers_mut();
            for (out, sample) in (start..capacity).zip(raw.chunks_exact(self.format.bytes_per_sample())) {
                let (i, q) = self.decode(sample);
                let (c, s) = (mixer.cos[index], mixer.sin[index]);
                re[out] = i * c - q * s;
                im[out] = q * c + i * s;
                index += 1;
                if index == table_len {
                    index = 0;
                }
                count += 1;
            }
        }
        mixer.index = index;
        self.mixer = Some(mixer);

        if count == 0 {
            return 0;
        }
        dest.set_len(start + count);
        dest.set_sample_rate(self.sample_rate);
        dest.set_frequency(channel_frequency);
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_approx_eq(a: f32, b: f32, tol: f32, label: &str) {
        assert!(
            (a - b).abs() <= tol,
            "{}: expected {} ~ {} (tol {})",
            label,
            a,
            b,
            tol
        );
    }

    #[test]
    fn formats_parse_case_insensitively() {
        assert_eq!("S16LE".parse::<SampleFormat>(), Ok(SampleFormat::S16Le));
        assert_eq!("cu8".parse::<SampleFormat>(), Ok(SampleFormat::U8));
        assert_eq!("s8".parse::<SampleFormat>(), Ok(SampleFormat::S8));
        assert!("f32".parse::<SampleFormat>().is_err());
        assert_eq!(SampleFormat::U8.to_string(), "u8");
    }

    #[test]
    fn s16_samples_are_scaled() {
        let conv = IqConverter::new(SampleFormat::S16Le, 1_000_000, 100_000_000);
        let mut raw = Vec::new();
        for (i, q) in [(i16::MIN, i16::MAX), (16384, -16384)] {
            raw.extend_from_slice(&i.to_le_bytes());
            raw.extend_from_slice(&q.to_le_bytes());
        }
        let mut packet = SamplePacket::new(4);
        assert_eq!(conv.fill(&raw, &mut packet), 2);
        assert_eq!(packet.re(), &[-1.0, 0.5]);
        assert_approx_eq(packet.im()[0], 32767.0 / 32768.0, 1e-7, "max");
        assert_eq!(packet.im()[1], -0.5);
        assert_eq!(packet.sample_rate(), 1_000_000);
        assert_eq!(packet.frequency(), 100_000_000);
    }

    #[test]
    fn eight_bit_formats_are_scaled() {
        let mut packet = SamplePacket::new(1);
        IqConverter::new(SampleFormat::U8, 1, 0).fill(&[255, 0], &mut packet);
        assert_approx_eq(packet.re()[0], 127.6 / 128.0, 1e-6, "u8 max");
        assert_approx_eq(packet.im()[0], -127.4 / 128.0, 1e-6, "u8 min");

        let mut packet = SamplePacket::new(1);
        IqConverter::new(SampleFormat::S8, 1, 0).fill(&[0x80, 0x40], &mut packet);
        assert_eq!(packet.re()[0], -1.0);
        assert_eq!(packet.im()[0], 0.5);
    }

    #[test]
    fn fill_appends_until_capacity() {
        let conv = IqConverter::new(SampleFormat::S8, 8, 0);
        let raw = [10u8; 2 * 5];
        let mut packet = SamplePacket::new(8);
        assert_eq!(conv.fill(&raw, &mut packet), 5);
        assert_eq!(conv.fill(&raw, &mut packet), 3);
        assert!(packet.is_full());
        assert_eq!(conv.fill(&raw, &mut packet), 0);
    }

    #[test]
    fn partial_trailing_sample_is_ignored() {
        let conv = IqConverter::new(SampleFormat::S16Le, 8, 0);
        let mut packet = SamplePacket::new(8);
        assert_eq!(conv.fill(&[0, 0, 0, 0, 1, 2, 3], &mut packet), 1);
    }

    #[test]
    fn mixer_length_holds_whole_cycles() {
        assert_eq!(optimal_mixer_length(250_000, 1_000_000), 4);
        assert_eq!(optimal_mixer_length(-250_000, 1_000_000), 4);
        // cycle of 3.333 samples: only multiples of 10 hold whole cycles.
        assert_eq!(optimal_mixer_length(300_000, 1_000_000) % 10, 0);
        assert!(optimal_mixer_length(7_777, 1_000_000) <= MAX_MIXER_LENGTH);
    }

    #[test]
    fn mix_moves_channel_to_baseband() {
        let rate = 1_000_000;
        let centre = 100_000_000;
        let channel = centre + 250_000;
        let mut conv = IqConverter::new(SampleFormat::S16Le, rate, centre);

        // Complex tone at +250 kHz relative to the centre frequency.
        let mut raw = Vec::new();
        for n in 0..64 {
            let phase = 2.0 * std::f32::consts::PI * 0.25 * n as f32;
            let i = (phase.cos() * 16384.0).round() as i16;
            let q = (phase.sin() * 16384.0).round() as i16;
            raw.extend_from_slice(&i.to_le_bytes());
            raw.extend_from_slice(&q.to_le_bytes());
        }

        let mut first = SamplePacket::new(32);
        let mut second = SamplePacket::new(32);
        assert_eq!(conv.mix(&raw[..128], &mut first, channel), 32);
        assert_eq!(conv.mix(&raw[128..], &mut second, channel), 32);
        assert_eq!(first.frequency(), channel);

        for packet in [&first, &second] {
            for (re, im) in packet.re().iter().zip(packet.im()) {
                assert_approx_eq(*re, 0.5, 1e-3, "re at dc");
                assert_approx_eq(*im, 0.0, 1e-3, "im at dc");
            }
        }
    }

    #[test]
    fn zero_shift_uses_a_full_rate_table() {
        let mut conv = IqConverter::new(SampleFormat::S8, 48_000, 0);
        let mut packet = SamplePacket::new(2);
        conv.mix(&[64, 0, 64, 0], &mut packet, 0);
        assert_eq!(packet.re(), &[0.5, 0.5]);
    }
}
