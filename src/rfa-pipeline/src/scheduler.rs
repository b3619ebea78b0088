// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Source-driven dispatcher: pulls raw packets and fans them out to the
//! spectrum path, the demodulation path and the recorder.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, Sender};
use rfa_core::load::SCHEDULER;
use rfa_core::{
    edge, EdgeConsumer, EdgeProducer, EventSender, LoadMonitor, PipelineError, PipelineEvent,
    RecordingStopReason, SamplePacket,
};
use tracing::{debug, error, info, trace, warn};

use crate::recording::{Recorder, RecordingOptions};
use crate::source::IqSource;
use crate::worker::spawn_worker;

/// Double buffering towards the FFT processor.
pub const FFT_QUEUE_SIZE: usize = 2;
pub const DEMOD_QUEUE_SIZE: usize = 20;
/// Iterations the squelch stays open after the signal drops.
pub const SQUELCH_DEBOUNCE_COUNT: u32 = 50;
/// Longest wait for a source packet before the session is considered dead.
pub const PACKET_TIMEOUT: Duration = Duration::from_millis(1000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SchedulerState {
    Idle = 0,
    Running = 1,
    Stopping = 2,
    Stopped = 3,
}

impl SchedulerState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => SchedulerState::Idle,
            1 => SchedulerState::Running,
            2 => SchedulerState::Stopping,
            _ => SchedulerState::Stopped,
        }
    }
}

/// Hangover for the squelch gate.
///
/// While the raw squelch is closed the gate stays open for
/// `ceiling` more iterations. Opening the raw squelch resets the count.
#[derive(Debug, Clone)]
pub struct SquelchDebounce {
    counter: u32,
    ceiling: u32,
}

impl SquelchDebounce {
    pub fn new(ceiling: u32) -> Self {
        Self { counter: 0, ceiling }
    }

    /// Advance by one iteration and return the effective gate state.
    pub fn tick(&mut self, satisfied: bool) -> bool {
        if satisfied {
            self.counter = 0;
            return true;
        }
        let open = self.counter < self.ceiling;
        if self.counter < self.ceiling {
            self.counter += 1;
        }
        open
    }

    pub fn is_open(&self) -> bool {
        self.counter < self.ceiling
    }
}

impl Default for SquelchDebounce {
    fn default() -> Self {
        Self::new(SQUELCH_DEBOUNCE_COUNT)
    }
}

enum RecordingCommand {
    Start(Box<Recorder>),
    Stop,
}

/// Settings shared between the scheduler thread and its handles.
#[derive(Debug)]
struct SchedulerControl {
    channel_frequency: AtomicI64,
    /// Subtracted from the channel frequency before mixing.
    mix_offset: AtomicI64,
    demodulation_active: AtomicBool,
    squelch_satisfied: AtomicBool,
    fft_size: AtomicUsize,
    stop: AtomicBool,
    state: AtomicU8,
}

impl SchedulerControl {
    fn set_state(&self, state: SchedulerState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }
}

/// Cloneable remote control for a [`Scheduler`].
#[derive(Clone)]
pub struct SchedulerHandle {
    control: Arc<SchedulerControl>,
    commands: Sender<RecordingCommand>,
}

impl SchedulerHandle {
    pub fn state(&self) -> SchedulerState {
        SchedulerState::from_u8(self.control.state.load(Ordering::SeqCst))
    }

    /// Ask the loop to exit after the packet it is waiting for. Idempotent.
    pub fn stop(&self) {
        self.control.stop.store(true, Ordering::SeqCst);
        let _ = self.control.state.compare_exchange(
            SchedulerState::Running as u8,
            SchedulerState::Stopping as u8,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
        let _ = self.control.state.compare_exchange(
            SchedulerState::Idle as u8,
            SchedulerState::Stopped as u8,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
    }

    pub fn channel_frequency(&self) -> i64 {
        self.control.channel_frequency.load(Ordering::Relaxed)
    }

    pub fn set_channel_frequency(&self, frequency: i64) {
        self.control.channel_frequency.store(frequency, Ordering::Relaxed);
    }

    /// Frequency the demodulation path is mixed down from, relative to the
    /// channel. CW uses this to place the carrier at an audible pitch.
    pub fn set_mix_offset(&self, offset_hz: i64) {
        self.control.mix_offset.store(offset_hz, Ordering::Relaxed);
    }

    pub fn mix_offset(&self) -> i64 {
        self.control.mix_offset.load(Ordering::Relaxed)
    }

    pub fn is_demodulation_active(&self) -> bool {
        self.control.demodulation_active.load(Ordering::Relaxed)
    }

    pub fn set_demodulation_active(&self, active: bool) {
        self.control.demodulation_active.store(active, Ordering::Relaxed);
    }

    pub fn squelch_satisfied(&self) -> bool {
        self.control.squelch_satisfied.load(Ordering::Relaxed)
    }

    pub fn set_squelch_satisfied(&self, satisfied: bool) {
        self.control.squelch_satisfied.store(satisfied, Ordering::Relaxed);
    }

    pub fn fft_size(&self) -> usize {
        self.control.fft_size.load(Ordering::Relaxed)
    }

    /// Takes effect with the next FFT buffer drawn from the pool.
    pub fn set_fft_size(&self, fft_size: usize) {
        self.control.fft_size.store(fft_size.max(1), Ordering::Relaxed);
    }

    /// Open the recording file now and hand it to the scheduler thread.
    pub fn start_recording(&self, options: &RecordingOptions) -> Result<(), PipelineError> {
        let recorder = Recorder::create(options)?;
        self.start_recording_with(recorder)
    }

    pub fn start_recording_with(&self, recorder: Recorder) -> Result<(), PipelineError> {
        self.commands
            .send(RecordingCommand::Start(Box::new(recorder)))
            .map_err(|_| PipelineError::InvalidConfig("scheduler is gone".to_string()))
    }

    pub fn stop_recording(&self) {
        let _ = self.commands.send(RecordingCommand::Stop);
    }
}

pub struct Scheduler {
    source: Box<dyn IqSource>,
    control: Arc<SchedulerControl>,
    command_tx: Sender<RecordingCommand>,
    command_rx: Receiver<RecordingCommand>,
    fft: EdgeProducer<SamplePacket>,
    fft_consumer: EdgeConsumer<SamplePacket>,
    demod: EdgeProducer<SamplePacket>,
    demod_consumer: EdgeConsumer<SamplePacket>,
    events: EventSender,
    loads: LoadMonitor,
    debounce: SquelchDebounce,
    recording: Option<Recorder>,
    fft_buffer: Option<SamplePacket>,
}

impl Scheduler {
    pub fn new(
        source: Box<dyn IqSource>,
        fft_size: usize,
        events: EventSender,
        loads: LoadMonitor,
    ) -> Self {
        let fft_size = fft_size.max(1);
        let demod_capacity = source.samples_per_packet();
        let (fft, fft_consumer) = edge("fft", FFT_QUEUE_SIZE, || SamplePacket::new(fft_size));
        let (demod, demod_consumer) =
            edge("demod", DEMOD_QUEUE_SIZE, || SamplePacket::new(demod_capacity));
        let (command_tx, command_rx) = channel::unbounded();
        let control = Arc::new(SchedulerControl {
            channel_frequency: AtomicI64::new(source.frequency()),
            mix_offset: AtomicI64::new(0),
            demodulation_active: AtomicBool::new(false),
            squelch_satisfied: AtomicBool::new(false),
            fft_size: AtomicUsize::new(fft_size),
            stop: AtomicBool::new(false),
            state: AtomicU8::new(SchedulerState::Idle as u8),
        });
        Self {
            source,
            control,
            command_tx,
            command_rx,
            fft,
            fft_consumer,
            demod,
            demod_consumer,
            events,
            loads,
            debounce: SquelchDebounce::default(),
            recording: None,
            fft_buffer: None,
        }
    }

    pub fn handle(&self) -> SchedulerHandle {
        SchedulerHandle {
            control: self.control.clone(),
            commands: self.command_tx.clone(),
        }
    }

    /// Consumer side of the spectrum edge.
    pub fn fft_consumer(&self) -> EdgeConsumer<SamplePacket> {
        self.fft_consumer.clone()
    }

    /// Consumer side of the demodulation edge.
    pub fn demod_consumer(&self) -> EdgeConsumer<SamplePacket> {
        self.demod_consumer.clone()
    }

    pub fn sample_rate(&self) -> u32 {
        self.source.sample_rate()
    }

    pub fn source_frequency(&self) -> i64 {
        self.source.frequency()
    }

    pub fn samples_per_packet(&self) -> usize {
        self.source.samples_per_packet()
    }

    /// Run the dispatch loop on a dedicated thread.
    pub fn spawn(self) -> Result<JoinHandle<()>, PipelineError> {
        spawn_worker("scheduler", move || self.run())
    }

    /// Dispatch loop. Returns once stopped or the source has failed.
    pub fn run(mut self) {
        if self.control.stop.load(Ordering::SeqCst) {
            self.control.set_state(SchedulerState::Stopped);
            return;
        }
        self.control.set_state(SchedulerState::Running);
        info!(
            "scheduler started ({} Sps, {} bytes per packet)",
            self.source.sample_rate(),
            self.source.packet_size()
        );

        match self.source.start_sampling() {
            Ok(()) => self.dispatch_loop(),
            Err(e) => self.fail(e),
        }

        self.control.set_state(SchedulerState::Stopping);
        self.source.stop_sampling();
        if let Some(recorder) = self.recording.take() {
            self.close_recording(recorder, RecordingStopReason::Shutdown);
        }
        if let Some(buffer) = self.fft_buffer.take() {
            self.fft.recycle(buffer);
        }
        self.control.set_state(SchedulerState::Stopped);
        info!("scheduler stopped");
    }

    fn dispatch_loop(&mut self) {
        let samples_per_packet = self.source.samples_per_packet();
        let sample_rate = self.source.sample_rate();
        let ns_per_packet = if sample_rate > 0 {
            samples_per_packet as f32 * 1_000_000_000.0 / sample_rate as f32
        } else {
            0.0
        };

        while !self.control.stop.load(Ordering::SeqCst) {
            self.apply_commands();

            let raw = match self.source.get_packet(PACKET_TIMEOUT) {
                Ok(Some(raw)) => raw,
                Ok(None) => {
                    self.fail(PipelineError::SourceExhausted(PACKET_TIMEOUT));
                    break;
                }
                Err(e) => {
                    self.fail(e);
                    break;
                }
            };
            let started = Instant::now();

            let squelch_open = self
                .debounce
                .tick(self.control.squelch_satisfied.load(Ordering::Relaxed));

            self.record(&raw, squelch_open);
            self.dispatch_demod(&raw, squelch_open);
            self.dispatch_fft(&raw);

            self.source.return_packet(raw);
            self.loads
                .update_elapsed(SCHEDULER, started.elapsed(), ns_per_packet);
        }
    }

    /// Terminal failure: stop and tell the orchestration layer once.
    fn fail(&mut self, err: PipelineError) {
        error!("scheduler: {}; shutting down", err);
        self.control.stop.store(true, Ordering::SeqCst);
        let _ = self.events.send(PipelineEvent::Stopped {
            reason: err.to_string(),
        });
    }

    fn apply_commands(&mut self) {
        while let Ok(command) = self.command_rx.try_recv() {
            match command {
                RecordingCommand::Start(recorder) => {
                    if let Some(previous) = self.recording.take() {
                        warn!("new recording replaces {}", previous.path_label());
                        self.close_recording(previous, RecordingStopReason::Requested);
                    }
                    self.recording = Some(*recorder);
                }
                RecordingCommand::Stop => match self.recording.as_mut() {
                    Some(recorder) => recorder.request_stop(),
                    None => debug!("stop requested but no recording is active"),
                },
            }
        }
    }

    fn record(&mut self, raw: &[u8], squelch_open: bool) {
        let Some(recorder) = self.recording.as_mut() else {
            return;
        };
        let step = recorder.on_packet(raw, squelch_open);
        if let Some(bytes) = step.report {
            let _ = self.events.send(PipelineEvent::RecordingSize { bytes });
        }
        if let Some(reason) = step.stop {
            if let Some(recorder) = self.recording.take() {
                self.close_recording(recorder, reason);
            }
        }
    }

    fn close_recording(&self, recorder: Recorder, reason: RecordingStopReason) {
        let bytes = recorder.finish();
        let _ = self
            .events
            .send(PipelineEvent::RecordingStopped { bytes, reason });
    }

    fn dispatch_demod(&mut self, raw: &[u8], squelch_open: bool) {
        if !squelch_open || !self.control.demodulation_active.load(Ordering::Relaxed) {
            return;
        }
        match self.demod.try_take_free() {
            Some(mut buffer) => {
                buffer.clear();
                let channel = self.control.channel_frequency.load(Ordering::Relaxed)
                    - self.control.mix_offset.load(Ordering::Relaxed);
                self.source.mix_into(raw, &mut buffer, channel);
                self.demod.submit(buffer);
            }
            None => {
                let flushed = self.demod.flush();
                debug!("demodulator too slow; flushed {} packets", flushed);
            }
        }
    }

    fn dispatch_fft(&mut self, raw: &[u8]) {
        if self.fft_buffer.is_none() {
            let fft_size = self.control.fft_size.load(Ordering::Relaxed);
            self.fft_buffer = self.fft.try_take_free().map(|mut buffer| {
                if buffer.capacity() == fft_size {
                    buffer.clear();
                    buffer
                } else {
                    debug!("fft size changed to {}; replacing buffer", fft_size);
                    SamplePacket::new(fft_size)
                }
            });
        }

        let Some(buffer) = self.fft_buffer.as_mut() else {
            trace!("no free fft buffer; dropping {} bytes", raw.len());
            return;
        };
        self.source.fill_into(raw, buffer);
        if buffer.is_full() {
            if let Some(buffer) = self.fft_buffer.take() {
                self.fft.submit(buffer);
            }
        }
    }
}
