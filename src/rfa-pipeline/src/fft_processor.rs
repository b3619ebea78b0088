// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Spectrum rows for the waterfall plus the signal strength of the
//! demodulated channel.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rfa_core::load::FFT_PROCESSOR;
use rfa_core::{
    EdgeConsumer, EventSender, LoadMonitor, PipelineEvent, SamplePacket, SharedWaterfall,
    WaterfallSpeed,
};
use rfa_dsp::WindowedFft;
use tracing::{error, info};

use crate::worker::StopFlag;

/// About one display frame.
pub const FRAME_TIMEOUT: Duration = Duration::from_millis(16);

/// Absolute `[low, high]` range in Hz of the demodulated channel, if any.
pub type ChannelRange = Box<dyn Fn() -> Option<(i64, i64)> + Send>;

/// Display settings shared with the orchestration layer.
#[derive(Debug, Clone)]
pub struct FftControls {
    speed: Arc<AtomicU8>,
    peak_hold: Arc<AtomicBool>,
}

impl Default for FftControls {
    fn default() -> Self {
        Self {
            speed: Arc::new(AtomicU8::new(WaterfallSpeed::default().as_u8())),
            peak_hold: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl FftControls {
    pub fn waterfall_speed(&self) -> WaterfallSpeed {
        WaterfallSpeed::from_u8(self.speed.load(Ordering::Relaxed))
    }

    pub fn set_waterfall_speed(&self, speed: WaterfallSpeed) {
        self.speed.store(speed.as_u8(), Ordering::Relaxed);
    }

    pub fn peak_hold(&self) -> bool {
        self.peak_hold.load(Ordering::Relaxed)
    }

    pub fn set_peak_hold(&self, enabled: bool) {
        self.peak_hold.store(enabled, Ordering::Relaxed);
    }
}

/// Mean of `magnitudes` over the bins covering `[low, high]` Hz.
///
/// Bin `i` sits at `frequency - sample_rate / 2 + i / samples_per_hz`.
/// Returns `None` when the clamped range is empty.
pub fn channel_strength(
    magnitudes: &[f32],
    frequency: i64,
    sample_rate: u32,
    low: i64,
    high: i64,
) -> Option<f32> {
    let bins = magnitudes.len();
    if bins == 0 || sample_rate == 0 {
        return None;
    }
    let samples_per_hz = bins as f64 / sample_rate as f64;
    let first_bin_hz = frequency - sample_rate as i64 / 2;
    let index = |hz: i64| {
        let bin = ((hz - first_bin_hz) as f64 * samples_per_hz) as i64;
        bin.clamp(0, bins as i64) as usize
    };
    let (start, end) = (index(low), index(high));
    if end <= start {
        return None;
    }
    let range = &magnitudes[start..end];
    Some(range.iter().sum::<f32>() / range.len() as f32)
}

pub struct FftProcessor {
    input: EdgeConsumer<SamplePacket>,
    waterfall: SharedWaterfall,
    controls: FftControls,
    channel_range: ChannelRange,
    events: EventSender,
    loads: LoadMonitor,
    stop: StopFlag,
    fft: WindowedFft,
    magnitudes: Vec<f32>,
}

impl FftProcessor {
    pub fn new(
        input: EdgeConsumer<SamplePacket>,
        waterfall: SharedWaterfall,
        channel_range: ChannelRange,
        events: EventSender,
        loads: LoadMonitor,
        stop: StopFlag,
    ) -> Self {
        Self {
            input,
            waterfall,
            controls: FftControls::default(),
            channel_range,
            events,
            loads,
            stop,
            fft: WindowedFft::new(1),
            magnitudes: Vec::new(),
        }
    }

    pub fn controls(&self) -> FftControls {
        self.controls.clone()
    }

    pub fn run(mut self) {
        info!("fft processor started");
        while !self.stop.is_stopped() {
            let Some(packet) = self.input.recv(FRAME_TIMEOUT) else {
                continue;
            };
            self.process(packet);
        }
        info!("fft processor stopped");
    }

    fn process(&mut self, packet: SamplePacket) {
        let started = Instant::now();
        let (frequency, sample_rate, ns) =
            (packet.frequency(), packet.sample_rate(), packet.duration_ns());
        if self.fft.size() != packet.len() {
            self.fft.resize(packet.len());
        }
        self.fft
            .magnitude_db(packet.re(), packet.im(), &mut self.magnitudes);
        self.input.give_back(packet);

        if let Some((low, high)) = (self.channel_range)() {
            if let Some(db) = channel_strength(&self.magnitudes, frequency, sample_rate, low, high) {
                let _ = self.events.send(PipelineEvent::SignalStrength { db });
            }
        }

        let depth = self.controls.waterfall_speed().history_rows();
        let peak_hold = self.controls.peak_hold();
        match self.waterfall.write() {
            Ok(mut state) => {
                state.push_row(&self.magnitudes, frequency, sample_rate, depth, peak_hold)
            }
            Err(e) => error!("waterfall lock poisoned: {}", e),
        }
        self.loads
            .update_elapsed(FFT_PROCESSOR, started.elapsed(), ns);
    }
}
