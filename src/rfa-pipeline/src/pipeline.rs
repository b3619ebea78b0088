// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Wiring and lifecycle of the whole processing graph.

use std::thread::JoinHandle;

use rfa_core::{
    DemodulationMode, EventSender, LoadMonitor, PipelineError, PipelineEvent, SharedWaterfall,
    WaterfallSpeed, WaterfallState,
};
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::audio::AudioFrame;
use crate::demodulator::{Demodulator, DemodulatorHandle};
use crate::fft_processor::{FftControls, FftProcessor};
use crate::recording::RecordingOptions;
use crate::scheduler::{Scheduler, SchedulerHandle, SchedulerState};
use crate::source::IqSource;
use crate::worker::{join_worker, spawn_worker, StopFlag};

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineOptions {
    pub fft_size: usize,
    pub mode: DemodulationMode,
    /// Absolute channel frequency; defaults to the source centre.
    pub channel_frequency: Option<i64>,
    /// Defaults to the mode's default width.
    pub channel_width: Option<u32>,
    pub volume: f32,
    pub waterfall_speed: WaterfallSpeed,
    pub peak_hold: bool,
    /// `None` keeps the squelch permanently open.
    pub squelch_threshold_db: Option<f32>,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            fft_size: 4096,
            mode: DemodulationMode::Off,
            channel_frequency: None,
            channel_width: None,
            volume: 1.0,
            waterfall_speed: WaterfallSpeed::default(),
            peak_hold: false,
            squelch_threshold_db: None,
        }
    }
}

/// A running scheduler, FFT processor and demodulator (with its resampler
/// and audio sink).
pub struct Pipeline {
    scheduler: SchedulerHandle,
    demodulator: DemodulatorHandle,
    fft: FftControls,
    fft_stop: StopFlag,
    waterfall: SharedWaterfall,
    loads: LoadMonitor,
    events: EventSender,
    squelch_threshold_db: Option<f32>,
    sample_rate: u32,
    frequency: i64,
    /// Innermost stage first.
    threads: Vec<(&'static str, JoinHandle<()>)>,
}

impl Pipeline {
    pub fn start(
        source: Box<dyn IqSource>,
        options: &PipelineOptions,
        events: EventSender,
    ) -> Result<Self, PipelineError> {
        let loads = LoadMonitor::new();
        let waterfall = WaterfallState::shared();
        let sample_rate = source.sample_rate();
        let frequency = source.frequency();

        let scheduler = Scheduler::new(source, options.fft_size, events.clone(), loads.clone());
        let scheduler_handle = scheduler.handle();
        if let Some(channel) = options.channel_frequency {
            scheduler_handle.set_channel_frequency(channel);
        }
        scheduler_handle.set_squelch_satisfied(options.squelch_threshold_db.is_none());

        let demodulator = Demodulator::new(
            scheduler.demod_consumer(),
            sample_rate,
            scheduler.samples_per_packet(),
            loads.clone(),
        )?;
        let demod_handle = demodulator.handle();

        let range_scheduler = scheduler_handle.clone();
        let range_demod = demod_handle.clone();
        let fft_stop = StopFlag::new();
        let fft = FftProcessor::new(
            scheduler.fft_consumer(),
            waterfall.clone(),
            Box::new(move || {
                if !range_scheduler.is_demodulation_active() {
                    return None;
                }
                let centre = range_scheduler.channel_frequency();
                let half = range_demod.channel_width() as i64 / 2;
                Some((centre - half, centre + half))
            }),
            events.clone(),
            loads.clone(),
            fft_stop.clone(),
        );
        let fft_controls = fft.controls();
        fft_controls.set_waterfall_speed(options.waterfall_speed);
        fft_controls.set_peak_hold(options.peak_hold);

        let mut pipeline = Self {
            scheduler: scheduler_handle,
            demodulator: demod_handle,
            fft: fft_controls,
            fft_stop,
            waterfall,
            loads,
            events,
            squelch_threshold_db: options.squelch_threshold_db,
            sample_rate,
            frequency,
            threads: Vec::new(),
        };

        if pipeline.set_demodulation_mode(options.mode).is_ok() {
            if let Some(width) = options.channel_width {
                pipeline.set_channel_width(width);
            }
        }
        pipeline.set_volume(options.volume);

        if let Err(e) = pipeline.spawn_stages(fft, demodulator, scheduler) {
            pipeline.stop();
            return Err(e);
        }

        info!(
            "pipeline running at {} Sps around {} Hz",
            sample_rate, frequency
        );
        Ok(pipeline)
    }

    fn spawn_stages(
        &mut self,
        fft: FftProcessor,
        demodulator: Demodulator,
        scheduler: Scheduler,
    ) -> Result<(), PipelineError> {
        self.threads
            .push(("fft", spawn_worker("fft", move || fft.run())?));
        self.threads.push(("demodulator", demodulator.spawn()?));
        self.threads.push(("scheduler", scheduler.spawn()?));
        Ok(())
    }

    /// Signal every stage, then join them innermost first. Idempotent.
    pub fn stop(&mut self) {
        self.scheduler.stop();
        self.fft_stop.stop();
        self.demodulator.stop();
        if self.threads.is_empty() {
            return;
        }
        for (name, thread) in self.threads.drain(..) {
            join_worker(name, thread);
        }
        info!("pipeline stopped");
    }

    pub fn state(&self) -> SchedulerState {
        self.scheduler.state()
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn frequency(&self) -> i64 {
        self.frequency
    }

    /// Apply `mode` to the demodulator and gate the demodulation path
    /// accordingly. A rejected mode is reported as
    /// [`PipelineEvent::ConfigRejected`] and leaves the current one active.
    pub fn set_demodulation_mode(&self, mode: DemodulationMode) -> Result<(), PipelineError> {
        match self.demodulator.set_mode(mode) {
            Ok(()) => {
                self.scheduler.set_mix_offset(mode.audio_offset_hz());
                self.scheduler.set_demodulation_active(mode.is_active());
                Ok(())
            }
            Err(e) => {
                let _ = self.events.send(PipelineEvent::ConfigRejected {
                    message: e.to_string(),
                });
                Err(e)
            }
        }
    }

    pub fn demodulation_mode(&self) -> DemodulationMode {
        self.demodulator.mode()
    }

    pub fn set_channel_frequency(&self, frequency: i64) {
        self.scheduler.set_channel_frequency(frequency);
    }

    pub fn channel_frequency(&self) -> i64 {
        self.scheduler.channel_frequency()
    }

    pub fn set_channel_width(&self, width: u32) -> u32 {
        self.demodulator.set_channel_width(width)
    }

    pub fn set_volume(&self, volume: f32) {
        self.demodulator.set_volume(volume);
    }

    pub fn set_fft_size(&self, fft_size: usize) {
        self.scheduler.set_fft_size(fft_size);
    }

    pub fn set_waterfall_speed(&self, speed: WaterfallSpeed) {
        self.fft.set_waterfall_speed(speed);
    }

    pub fn set_peak_hold(&self, enabled: bool) {
        self.fft.set_peak_hold(enabled);
    }

    pub fn set_squelch_threshold(&mut self, threshold_db: Option<f32>) {
        self.squelch_threshold_db = threshold_db;
        if threshold_db.is_none() {
            self.scheduler.set_squelch_satisfied(true);
        }
    }

    /// Feed a channel strength report into the squelch. Returns whether the
    /// squelch is now satisfied.
    pub fn apply_signal_strength(&self, db: f32) -> bool {
        let satisfied = self.squelch_threshold_db.map_or(true, |threshold| db >= threshold);
        self.scheduler.set_squelch_satisfied(satisfied);
        satisfied
    }

    pub fn squelch_satisfied(&self) -> bool {
        self.scheduler.squelch_satisfied()
    }

    pub fn start_recording(&self, options: &RecordingOptions) -> Result<(), PipelineError> {
        self.scheduler.start_recording(options)
    }

    pub fn stop_recording(&self) {
        self.scheduler.stop_recording();
    }

    pub fn subscribe_audio(&self) -> broadcast::Receiver<AudioFrame> {
        self.demodulator.subscribe_audio()
    }

    /// Shared waterfall; take the read lock to render it.
    pub fn waterfall(&self) -> SharedWaterfall {
        self.waterfall.clone()
    }

    pub fn loads(&self) -> &LoadMonitor {
        &self.loads
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        if !self.threads.is_empty() {
            warn!("pipeline dropped while running; stopping");
            self.stop();
        }
    }
}
