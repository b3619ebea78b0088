// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Rate conversion from the source rate to the active quadrature rate.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rfa_core::load::RESAMPLER;
use rfa_core::{edge, EdgeConsumer, EdgeProducer, LoadMonitor, SamplePacket};
use rfa_dsp::{limit_denominator, RationalResampler};
use tracing::{debug, info, warn};

use crate::worker::StopFlag;

/// Double buffering towards the demodulator.
pub const OUTPUT_QUEUE_SIZE: usize = 2;
/// Largest decimation factor considered for the rational ratio.
pub const MAX_DECIMATION: u32 = 10_000;
/// Cap on taps per polyphase branch.
pub const MAX_TAPS_PER_PHASE: usize = 500;
pub const QUEUE_TIMEOUT: Duration = Duration::from_millis(1000);

struct Kernel {
    resampler: RationalResampler,
    input_rate: u32,
    target_rate: u32,
}

pub struct Resampler {
    input: EdgeConsumer<SamplePacket>,
    output: EdgeProducer<SamplePacket>,
    output_consumer: EdgeConsumer<SamplePacket>,
    target_rate: Arc<AtomicU32>,
    kernel: Option<Kernel>,
    loads: LoadMonitor,
    stop: StopFlag,
    free_timeout: Duration,
}

impl Resampler {
    /// `input` is the edge the scheduler feeds; output buffers hold
    /// `packet_capacity` samples until an upsampling ratio needs more.
    pub fn new(
        input: EdgeConsumer<SamplePacket>,
        packet_capacity: usize,
        target_rate: Arc<AtomicU32>,
        loads: LoadMonitor,
        stop: StopFlag,
    ) -> Self {
        let (output, output_consumer) = edge("resampled", OUTPUT_QUEUE_SIZE, || {
            SamplePacket::new(packet_capacity)
        });
        Self {
            input,
            output,
            output_consumer,
            target_rate,
            kernel: None,
            loads,
            stop,
            free_timeout: QUEUE_TIMEOUT,
        }
    }

    pub fn output(&self) -> EdgeConsumer<SamplePacket> {
        self.output_consumer.clone()
    }

    pub fn run(mut self) {
        info!("resampler started");
        while !self.stop.is_stopped() {
            self.step(QUEUE_TIMEOUT);
        }
        info!("resampler stopped");
    }

    /// Handle at most one input packet.
    fn step(&mut self, recv_timeout: Duration) {
        let Some(input) = self.input.recv(recv_timeout) else {
            return;
        };
        let Some(output) = self.output.take_free(self.free_timeout) else {
            debug!("demodulator too slow; dropping {} samples", input.len());
            self.input.give_back(input);
            return;
        };

        let started = Instant::now();
        match self.process(&input, output) {
            Some(output) => {
                let ns = input.duration_ns();
                self.input.give_back(input);
                self.loads.update_elapsed(RESAMPLER, started.elapsed(), ns);
                self.output.submit(output);
            }
            None => self.input.give_back(input),
        }
    }

    /// Resample one packet. Returns `None` when the packet was dropped; the
    /// output buffer is then back in the pool.
    fn process(&mut self, input: &SamplePacket, mut output: SamplePacket) -> Option<SamplePacket> {
        output.clear();
        let target_rate = self.target_rate.load(Ordering::Relaxed);
        let input_rate = input.sample_rate();

        if !self.ensure_kernel(input_rate, target_rate) {
            self.output.recycle(output);
            return None;
        }
        let kernel = self.kernel.as_mut()?;
        let (interpolation, decimation) =
            (kernel.resampler.interpolation(), kernel.resampler.decimation());

        if interpolation > decimation {
            let needed = (input.len() * interpolation).div_ceil(decimation) + 1;
            output = output.with_min_capacity(needed);
        }

        let consumed = kernel.resampler.resample(input, &mut output);
        if consumed < input.len() {
            warn!(
                "resampler output full; {} of {} samples unused",
                input.len() - consumed,
                input.len()
            );
        }
        output.set_sample_rate(target_rate);
        Some(output)
    }

    /// Rebuild the kernel when either rate changed. Returns `false` if no
    /// usable kernel exists for the rates.
    fn ensure_kernel(&mut self, input_rate: u32, target_rate: u32) -> bool {
        let current = self
            .kernel
            .as_ref()
            .is_some_and(|k| k.input_rate == input_rate && k.target_rate == target_rate);
        if current {
            return true;
        }
        self.kernel = None;
        if input_rate == 0 || target_rate == 0 {
            warn!(
                "cannot resample {} Sps to {} Sps; dropping packet",
                input_rate, target_rate
            );
            return false;
        }

        let (interpolation, decimation) = limit_denominator(target_rate, input_rate, MAX_DECIMATION);
        let achieved = input_rate as f64 * interpolation as f64 / decimation as f64;
        debug!(
            "resampler {} -> {} Sps as {}/{} (error {:.3} Sps)",
            input_rate,
            target_rate,
            interpolation,
            decimation,
            achieved - target_rate as f64
        );

        match RationalResampler::new(interpolation, decimation, MAX_TAPS_PER_PHASE) {
            Ok(resampler) => {
                self.kernel = Some(Kernel {
                    resampler,
                    input_rate,
                    target_rate,
                });
                true
            }
            Err(e) => {
                warn!("resampler design failed: {}", e);
                false
            }
        }
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

    fn tone(len: usize, rate: u32, offset_hz: f32, start: usize) -> SamplePacket {
        let mut packet = SamplePacket::new(len);
        for n in start..start + len {
            let phase = std::f32::consts::TAU * offset_hz * n as f32 / rate as f32;
            packet.push(phase.cos(), phase.sin());
        }
        packet.set_sample_rate(rate);
        packet
    }

    fn resampler(capacity: usize, target: u32) -> (Resampler, EdgeProducer<SamplePacket>) {
        let (producer, consumer) = edge("demod", 4, || SamplePacket::new(capacity));
        let mut resampler = Resampler::new(
            consumer,
            capacity,
            Arc::new(AtomicU32::new(target)),
            LoadMonitor::new(),
            StopFlag::new(),
        );
        resampler.free_timeout = Duration::from_millis(10);
        (resampler, producer)
    }

    #[test]
    fn unity_ratio_preserves_the_signal() {
        let (mut resampler, _) = resampler(1_024, 96_000);
        let mut last = None;
        for i in 0..4 {
            let input = tone(1_024, 96_000, 1_000.0, i * 1_024);
            let output = resampler
                .process(&input, SamplePacket::new(1_024))
                .unwrap();
            assert_eq!(output.len(), 1_024);
            last = Some(output);
        }
        let output = last.unwrap();
        for i in (0..output.len()).step_by(97) {
            let magnitude = (output.re()[i].powi(2) + output.im()[i].powi(2)).sqrt();
            assert_approx_eq(magnitude, 1.0, 0.01, "unity magnitude");
        }
    }

    #[test]
    fn output_rate_is_forced_to_target() {
        let (mut resampler, _) = resampler(4_096, 48_000);
        let input = tone(4_096, 1_000_000, 0.0, 0);
        let output = resampler.process(&input, SamplePacket::new(4_096)).unwrap();
        assert_eq!(output.sample_rate(), 48_000);
        let kernel = resampler.kernel.as_ref().unwrap();
        assert_eq!(
            (kernel.resampler.interpolation(), kernel.resampler.decimation()),
            (6, 125)
        );
        assert!(output.len() >= 196 && output.len() <= 197);
    }

    #[test]
    fn upsampling_enlarges_the_output() {
        let (mut resampler, _) = resampler(100, 192_000);
        let input = tone(100, 48_000, 0.0, 0);
        let output = resampler.process(&input, SamplePacket::new(100)).unwrap();
        assert!(output.capacity() >= 401);
        assert_eq!(output.len(), 400);
    }

    #[test]
    fn kernel_is_rebuilt_on_target_change() {
        let (mut resampler, _) = resampler(1_000, 96_000);
        let input = tone(1_000, 384_000, 0.0, 0);
        resampler.process(&input, SamplePacket::new(1_000)).unwrap();
        assert_eq!(resampler.kernel.as_ref().unwrap().resampler.decimation(), 4);

        resampler.target_rate.store(48_000, Ordering::Relaxed);
        let output = resampler.process(&input, SamplePacket::new(1_000)).unwrap();
        assert_eq!(resampler.kernel.as_ref().unwrap().resampler.decimation(), 8);
        assert_eq!(output.sample_rate(), 48_000);
    }

    #[test]
    fn zero_rate_drops_the_packet() {
        let (mut resampler, _) = resampler(64, 0);
        let input = tone(64, 96_000, 0.0, 0);
        assert!(resampler.process(&input, SamplePacket::new(64)).is_none());
        assert!(resampler.kernel.is_none());
    }

    #[test]
    fn input_is_dropped_without_free_output() {
        let (mut resampler, producer) = resampler(64, 48_000);
        let held: Vec<_> = (0..OUTPUT_QUEUE_SIZE)
            .map(|_| resampler.output.try_take_free().unwrap())
            .collect();

        let mut input = producer.try_take_free().unwrap();
        input.set_sample_rate(96_000);
        input.push(1.0, 0.0);
        producer.submit(input);
        let free_before = producer.free();

        resampler.step(Duration::from_millis(10));
        assert_eq!(producer.free(), free_before + 1);
        assert_eq!(resampler.output_consumer.pending(), 0);
        drop(held);
    }

    #[test]
    fn resampled_packet_is_delivered_and_input_returned() {
        let (mut resampler, producer) = resampler(256, 48_000);
        let mut input = producer.try_take_free().unwrap();
        input.clear();
        input.set_sample_rate(96_000);
        for _ in 0..256 {
            input.push(0.5, 0.0);
        }
        producer.submit(input);

        resampler.step(Duration::from_millis(10));
        let output = resampler.output().try_recv().unwrap();
        assert_eq!(output.sample_rate(), 48_000);
        assert_eq!(output.len(), 128);
        assert_eq!(producer.free(), 4);
    }
}
