// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use std::f64::consts::TAU;
use std::time::Duration;

use rfa_core::{PipelineError, SamplePacket};

use super::{IqConverter, IqSource, Pacer, RawPool, SampleFormat};

/// Synthetic source emitting a complex exponential as signed 16-bit I/Q.
///
/// Without a packet limit the source never runs dry.
pub struct ToneIqSource {
    sample_rate: u32,
    frequency: i64,
    tone_offset_hz: f64,
    amplitude: f64,
    samples_per_packet: usize,
    remaining: Option<usize>,
    throttle: bool,
    phase: f64,
    sampling: bool,
    converter: IqConverter,
    pool: RawPool,
    pacer: Pacer,
}

impl ToneIqSource {
    /// `tone_offset_hz` is relative to the centre `frequency`. `amplitude`
    /// is clamped to full scale.
    pub fn new(
        sample_rate: u32,
        frequency: i64,
        tone_offset_hz: f64,
        amplitude: f64,
        samples_per_packet: usize,
    ) -> Self {
        let format = SampleFormat::S16Le;
        Self {
            sample_rate,
            frequency,
            tone_offset_hz,
            amplitude: amplitude.clamp(0.0, 1.0),
            samples_per_packet: samples_per_packet.max(1),
            remaining: None,
            throttle: false,
            phase: 0.0,
            sampling: false,
            converter: IqConverter::new(format, sample_rate, frequency),
            pool: RawPool::new(samples_per_packet.max(1) * format.bytes_per_sample()),
            pacer: Pacer::new(sample_rate),
        }
    }

    /// Stop after `packets` packets.
    pub fn with_packet_limit(mut self, packets: usize) -> Self {
        self.remaining = Some(packets);
        self
    }

    pub fn with_throttle(mut self, throttle: bool) -> Self {
        self.throttle = throttle;
        self
    }

    fn synthesize(&mut self, buf: &mut Vec<u8>) {
        let step = TAU * self.tone_offset_hz / self.sample_rate.max(1) as f64;
        let scale = self.amplitude * i16::MAX as f64;
        for _ in 0..self.samples_per_packet {
            let i = (self.phase.cos() * scale).round() as i16;
            let q = (self.phase.sin() * scale).round() as i16;
            buf.extend_from_slice(&i.to_le_bytes());
            buf.extend_from_slice(&q.to_le_bytes());
            self.phase = (self.phase + step) % TAU;
        }
    }
}

impl IqSource for ToneIqSource {
    fn start_sampling(&mut self) -> Result<(), PipelineError> {
        self.sampling = true;
        self.pacer.reset();
        Ok(())
    }

    fn stop_sampling(&mut self) {
        self.sampling = false;
    }

    fn get_packet(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>, PipelineError> {
        if !self.sampling {
            return Err(PipelineError::SourceIo("tone source is not sampling".to_string()));
        }
        if let Some(remaining) = self.remaining.as_mut() {
            if *remaining == 0 {
                return Ok(None);
            }
            *remaining -= 1;
        }
        let mut buf = self.pool.take();
        self.synthesize(&mut buf);
        if self.throttle {
            self.pacer.wait(self.samples_per_packet, timeout);
        }
        Ok(Some(buf))
    }

    fn return_packet(&mut self, packet: Vec<u8>) {
        self.pool.give(packet);
    }

    fn fill_into(&mut self, raw: &[u8], dest: &mut SamplePacket) -> usize {
        self.converter.fill(raw, dest)
    }

    fn mix_into(&mut self, raw: &[u8], dest: &mut SamplePacket, channel_frequency: i64) -> usize {
        self.converter.mix(raw, dest, channel_frequency)
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn frequency(&self) -> i64 {
        self.frequency
    }

    fn packet_size(&self) -> usize {
        self.samples_per_packet * SampleFormat::S16Le.bytes_per_sample()
    }

    fn bytes_per_sample(&self) -> usize {
        SampleFormat::S16Le.bytes_per_sample()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packet_limit_exhausts_source() {
        let mut source = ToneIqSource::new(48_000, 0, 1_000.0, 0.5, 16).with_packet_limit(2);
        source.start_sampling().unwrap();
        let timeout = Duration::from_millis(1);
        let first = source.get_packet(timeout).unwrap().unwrap();
        assert_eq!(first.len(), 64);
        source.return_packet(first);
        assert!(source.get_packet(timeout).unwrap().is_some());
        assert!(source.get_packet(timeout).unwrap().is_none());
    }

    #[test]
    fn tone_has_requested_amplitude() {
        let mut source = ToneIqSource::new(48_000, 0, 3_000.0, 0.5, 64);
        source.start_sampling().unwrap();
        let raw = source.get_packet(Duration::from_millis(1)).unwrap().unwrap();
        let mut packet = SamplePacket::new(64);
        source.fill_into(&raw, &mut packet);
        for (re, im) in packet.re().iter().zip(packet.im()) {
            let magnitude = (re * re + im * im).sqrt();
            assert!((magnitude - 0.5).abs() < 1e-3, "magnitude {}", magnitude);
        }
    }

    #[test]
    fn stopped_source_refuses_packets() {
        let mut source = ToneIqSource::new(48_000, 0, 0.0, 1.0, 8);
        assert!(source.get_packet(Duration::from_millis(1)).is_err());
        source.start_sampling().unwrap();
        source.stop_sampling();
        assert!(source.get_packet(Duration::from_millis(1)).is_err());
    }
}
