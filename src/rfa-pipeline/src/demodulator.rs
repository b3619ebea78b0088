// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Channel filtering and demodulation at the quadrature rate of the active
//! mode. The demodulator owns the resampler feeding it and the audio sink
//! it feeds.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use rfa_core::load::DEMODULATOR;
use rfa_core::{
    DemodulationMode, EdgeConsumer, EdgeProducer, LoadMonitor, PipelineError, SamplePacket,
    CW_TONE_HZ, MIN_INPUT_RATE,
};
use rfa_dsp::{
    AmDemodulator, BandPassSpec, FilterSpec, FirFilter, FmDiscriminator, LowPassSpec, PeakAgc,
};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::audio::{AudioFrame, AudioSink};
use crate::resampler::Resampler;
use crate::worker::{join_worker, spawn_worker, StopFlag};

const QUEUE_TIMEOUT: Duration = Duration::from_millis(1000);

// ---- filter parameters ----

const USER_FILTER_ATTENUATION_DB: f32 = 60.0;
const USER_FILTER_TRANSITION: f32 = 0.10;
const SIDEBAND_ATTENUATION_DB: f32 = 40.0;
const SIDEBAND_TRANSITION: f32 = 0.01;
/// Lower edge of the SSB passband, away from the carrier.
const SSB_LOW_EDGE_HZ: f32 = 200.0;
const NFM_DEVIATION: f32 = 0.75;
const WFM_DEVIATION: f32 = 0.85;

/// User-facing demodulation settings, read once per packet.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DemodSettings {
    pub mode: DemodulationMode,
    /// Hz; also the cutoff of the channel filter.
    pub channel_width: u32,
    /// Linear gain, 0 mutes.
    pub volume: f32,
}

impl Default for DemodSettings {
    fn default() -> Self {
        Self {
            mode: DemodulationMode::Off,
            channel_width: 0,
            volume: 1.0,
        }
    }
}

/// Cloneable control surface of a [`Demodulator`].
#[derive(Clone)]
pub struct DemodulatorHandle {
    settings: Arc<Mutex<DemodSettings>>,
    target_rate: Arc<AtomicU32>,
    source_rate: u32,
    frames: broadcast::Sender<AudioFrame>,
    stop: StopFlag,
}

impl DemodulatorHandle {
    fn lock(&self) -> MutexGuard<'_, DemodSettings> {
        self.settings.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn settings(&self) -> DemodSettings {
        *self.lock()
    }

    pub fn mode(&self) -> DemodulationMode {
        self.lock().mode
    }

    pub fn channel_width(&self) -> u32 {
        self.lock().channel_width
    }

    pub fn volume(&self) -> f32 {
        self.lock().volume
    }

    /// Switch mode, retarget the resampler and clamp the channel width into
    /// the new bounds, all under one lock.
    ///
    /// Rejected when the source rate cannot feed every quadrature rate; the
    /// previous settings stay in place.
    pub fn set_mode(&self, mode: DemodulationMode) -> Result<(), PipelineError> {
        if mode.is_active() && self.source_rate < MIN_INPUT_RATE {
            warn!(
                "refusing {}: source rate {} Sps is below {} Sps",
                mode, self.source_rate, MIN_INPUT_RATE
            );
            return Err(PipelineError::UnsupportedRate {
                sample_rate: self.source_rate,
                minimum: MIN_INPUT_RATE,
            });
        }
        let mut settings = self.lock();
        settings.channel_width = if settings.channel_width == 0 {
            mode.params().default_channel_width
        } else {
            mode.clamp_width(settings.channel_width)
        };
        settings.mode = mode;
        self.target_rate
            .store(mode.quadrature_rate(), Ordering::Relaxed);
        info!("demodulation {} ({} Hz wide)", mode, settings.channel_width);
        Ok(())
    }

    /// Returns the width actually applied.
    pub fn set_channel_width(&self, width: u32) -> u32 {
        let mut settings = self.lock();
        settings.channel_width = settings.mode.clamp_width(width);
        settings.channel_width
    }

    pub fn set_volume(&self, volume: f32) {
        self.lock().volume = volume.max(0.0);
    }

    pub fn subscribe_audio(&self) -> broadcast::Receiver<AudioFrame> {
        self.frames.subscribe()
    }

    pub fn stop(&self) {
        self.stop.stop();
    }
}

pub struct Demodulator {
    stage: DemodStage,
    resampler: Resampler,
    audio: AudioSink,
    handle: DemodulatorHandle,
    /// Shared by the resampler and audio sink threads.
    inner_stop: StopFlag,
}

impl Demodulator {
    /// `input` carries mixed source-rate packets of `packet_capacity` samples.
    pub fn new(
        input: EdgeConsumer<SamplePacket>,
        source_rate: u32,
        packet_capacity: usize,
        loads: LoadMonitor,
    ) -> Result<Self, PipelineError> {
        let settings = Arc::new(Mutex::new(DemodSettings::default()));
        let mode = DemodSettings::default().mode;
        let target_rate = Arc::new(AtomicU32::new(mode.quadrature_rate()));
        let inner_stop = StopFlag::new();
        let resampler = Resampler::new(
            input,
            packet_capacity,
            target_rate.clone(),
            loads.clone(),
            inner_stop.clone(),
        );
        let audio = AudioSink::new(inner_stop.clone())
            .map_err(|e| PipelineError::InvalidConfig(format!("audio filter: {}", e)))?;
        let stop = StopFlag::new();
        let handle = DemodulatorHandle {
            settings: settings.clone(),
            target_rate,
            source_rate,
            frames: audio.frames(),
            stop: stop.clone(),
        };
        let stage = DemodStage {
            input: resampler.output(),
            audio_out: audio.producer(),
            settings,
            loads,
            stop,
            user_filter: None,
            sideband_filter: None,
            fm: FmDiscriminator::new(),
            am: AmDemodulator::new(),
            agc: PeakAgc::new(),
            quadrature: SamplePacket::new(packet_capacity),
            last_mode: mode,
        };
        Ok(Self {
            stage,
            resampler,
            audio,
            handle,
            inner_stop,
        })
    }

    pub fn handle(&self) -> DemodulatorHandle {
        self.handle.clone()
    }

    /// Start the resampler, the audio sink and the demodulator itself. The
    /// returned thread joins the other two before it exits.
    pub fn spawn(self) -> Result<JoinHandle<()>, PipelineError> {
        let Demodulator {
            stage,
            resampler,
            audio,
            inner_stop,
            ..
        } = self;
        let resampler_thread = spawn_worker("resampler", move || resampler.run())?;
        let audio_thread = match spawn_worker("audio", move || audio.run()) {
            Ok(thread) => thread,
            Err(e) => {
                inner_stop.stop();
                join_worker("resampler", resampler_thread);
                return Err(e);
            }
        };
        let stop_inner = inner_stop.clone();
        let spawned = spawn_worker("demodulator", move || {
            stage.run();
            stop_inner.stop();
            join_worker("resampler", resampler_thread);
            join_worker("audio", audio_thread);
        });
        if spawned.is_err() {
            // The closure owning the inner threads was dropped unrun.
            inner_stop.stop();
        }
        spawned
    }
}

struct DemodStage {
    input: EdgeConsumer<SamplePacket>,
    audio_out: EdgeProducer<SamplePacket>,
    settings: Arc<Mutex<DemodSettings>>,
    loads: LoadMonitor,
    stop: StopFlag,
    user_filter: Option<FirFilter>,
    sideband_filter: Option<FirFilter>,
    fm: FmDiscriminator,
    am: AmDemodulator,
    agc: PeakAgc,
    quadrature: SamplePacket,
    last_mode: DemodulationMode,
}

impl DemodStage {
    fn run(mut self) {
        info!("demodulator started");
        while !self.stop.is_stopped() {
            let Some(packet) = self.input.recv(QUEUE_TIMEOUT) else {
                continue;
            };
            let settings = *self.settings.lock().unwrap_or_else(PoisonError::into_inner);
            if settings.mode.is_active() {
                self.deliver(&packet, settings);
            }
            self.input.give_back(packet);
        }
        info!("demodulator stopped");
    }

    fn deliver(&mut self, packet: &SamplePacket, settings: DemodSettings) {
        let Some(mut audio) = self.audio_out.take_free(QUEUE_TIMEOUT) else {
            debug!("audio sink too slow; dropping {} samples", packet.len());
            return;
        };
        let started = Instant::now();
        if self.demodulate(packet, settings, &mut audio) {
            self.loads
                .update_elapsed(DEMODULATOR, started.elapsed(), packet.duration_ns());
            self.audio_out.submit(audio);
        } else {
            self.audio_out.recycle(audio);
        }
    }

    /// Filter and demodulate `input` into `audio`. Returns `false` when
    /// nothing was produced.
    fn demodulate(
        &mut self,
        input: &SamplePacket,
        settings: DemodSettings,
        audio: &mut SamplePacket,
    ) -> bool {
        let mode = settings.mode;
        let quadrature_rate = mode.quadrature_rate();
        if !mode.is_active() || input.is_empty() {
            return false;
        }
        if input.sample_rate() != quadrature_rate {
            debug!(
                "dropping {} Sps packet while running {} at {} Sps",
                input.sample_rate(),
                mode,
                quadrature_rate
            );
            return false;
        }
        if mode != self.last_mode {
            self.fm = FmDiscriminator::new();
            self.am = AmDemodulator::new();
            self.agc.reset();
            self.sideband_filter = None;
            self.last_mode = mode;
        }

        self.channel_filter(input, settings.channel_width as f32);

        *audio = std::mem::take(audio).with_min_capacity(self.quadrature.len());
        audio.clear();
        let width = settings.channel_width as f32;
        match mode {
            DemodulationMode::Off => return false,
            DemodulationMode::Am => self.am.demodulate(&self.quadrature, audio, quadrature_rate),
            DemodulationMode::Nfm => self.fm.demodulate(
                &self.quadrature,
                audio,
                quadrature_rate,
                NFM_DEVIATION * width,
            ),
            DemodulationMode::Wfm => self.fm.demodulate(
                &self.quadrature,
                audio,
                quadrature_rate,
                WFM_DEVIATION * width,
            ),
            DemodulationMode::Lsb | DemodulationMode::Usb | DemodulationMode::Cw => {
                if !self.select_sideband(mode, width, audio) {
                    return false;
                }
                self.agc.normalize(audio.re_mut());
            }
        }

        for sample in audio.re_mut() {
            *sample *= settings.volume;
        }
        !audio.is_empty()
    }

    /// Low-pass `input` at `cutoff` into the quadrature buffer. The filter
    /// is rebuilt only when its design parameters change.
    fn channel_filter(&mut self, input: &SamplePacket, cutoff: f32) {
        let rate = input.sample_rate() as f32;
        let wanted = LowPassSpec {
            decimation: 1,
            gain: 1.0,
            sample_rate: rate,
            cutoff,
            transition_width: USER_FILTER_TRANSITION * rate,
            attenuation_db: USER_FILTER_ATTENUATION_DB,
        };
        let current = self
            .user_filter
            .as_ref()
            .is_some_and(|f| *f.spec() == FilterSpec::LowPass(wanted));
        if !current {
            self.user_filter = match FirFilter::low_pass(wanted) {
                Ok(filter) => {
                    debug!(
                        "channel filter: {} Hz cutoff, {} taps",
                        cutoff,
                        filter.num_taps()
                    );
                    Some(filter)
                }
                Err(e) => {
                    warn!("channel filter unavailable ({}); passing through", e);
                    None
                }
            };
        }

        let len = input.len();
        self.quadrature = std::mem::take(&mut self.quadrature).with_min_capacity(len);
        self.quadrature.clear();
        match self.user_filter.as_mut() {
            Some(filter) => {
                filter.filter(input, &mut self.quadrature, 0, len);
            }
            None => {
                for (&re, &im) in input.re().iter().zip(input.im()) {
                    self.quadrature.push(re, im);
                }
                self.quadrature.set_sample_rate(input.sample_rate());
                self.quadrature.set_frequency(input.frequency());
            }
        }
    }

    /// Band-pass the quadrature buffer for SSB/CW into `audio`.
    fn select_sideband(&mut self, mode: DemodulationMode, width: f32, audio: &mut SamplePacket) -> bool {
        let rate = self.quadrature.sample_rate() as f32;
        let (low, high, decimation) = match mode {
            DemodulationMode::Usb => (SSB_LOW_EDGE_HZ, width, 2),
            DemodulationMode::Lsb => (-width, -SSB_LOW_EDGE_HZ, 2),
            _ => {
                let tone = CW_TONE_HZ as f32;
                (tone - width / 2.0, tone + width / 2.0, 1)
            }
        };
        let wanted = BandPassSpec {
            decimation,
            gain: 1.0,
            sample_rate: rate,
            low_cutoff: low,
            high_cutoff: high,
            transition_width: SIDEBAND_TRANSITION * rate,
            attenuation_db: SIDEBAND_ATTENUATION_DB,
        };
        let current = self
            .sideband_filter
            .as_ref()
            .is_some_and(|f| *f.spec() == FilterSpec::BandPass(wanted));
        if !current {
            match FirFilter::band_pass(wanted) {
                Ok(filter) => {
                    debug!(
                        "{} filter: {}..{} Hz, {} taps",
                        mode,
                        low,
                        high,
                        filter.num_taps()
                    );
                    self.sideband_filter = Some(filter);
                }
                Err(e) => {
                    warn!("{} filter design failed: {}", mode, e);
                    self.sideband_filter = None;
                    return false;
                }
            }
        }
        let Some(filter) = self.sideband_filter.as_mut() else {
            return false;
        };
        let len = self.quadrature.len();
        filter.filter(&self.quadrature, audio, 0, len);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rfa_core::edge;

    const SOURCE_RATE: u32 = 384_000;

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

    fn demodulator(source_rate: u32) -> Demodulator {
        let (_, consumer) = edge("demod", 4, || SamplePacket::new(4_096));
        Demodulator::new(consumer, source_rate, 4_096, LoadMonitor::new()).unwrap()
    }

    fn settings(mode: DemodulationMode) -> DemodSettings {
        DemodSettings {
            mode,
            channel_width: mode.params().default_channel_width,
            volume: 1.0,
        }
    }

    /// Complex exponential at `offset_hz`, continuing from sample `start`.
    fn tone(len: usize, rate: u32, offset_hz: f32, amplitude: f32, start: usize) -> SamplePacket {
        let mut packet = SamplePacket::new(len);
        for n in start..start + len {
            let phase = std::f64::consts::TAU * offset_hz as f64 * n as f64 / rate as f64;
            packet.push(
                amplitude * phase.cos() as f32,
                amplitude * phase.sin() as f32,
            );
        }
        packet.set_sample_rate(rate);
        packet
    }

    fn rms(samples: &[f32]) -> f32 {
        (samples.iter().map(|s| s * s).sum::<f32>() / samples.len().max(1) as f32).sqrt()
    }

    #[test]
    fn mode_change_is_rejected_below_minimum_rate() {
        let demod = demodulator(250_000);
        let handle = demod.handle();
        let err = handle.set_mode(DemodulationMode::Am).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::UnsupportedRate {
                sample_rate: 250_000,
                minimum: MIN_INPUT_RATE
            }
        ));
        assert_eq!(handle.settings(), DemodSettings::default());
        assert!(handle.set_mode(DemodulationMode::Off).is_ok());
    }

    #[test]
    fn rate_that_is_not_a_multiple_of_minimum_is_accepted() {
        let demod = demodulator(1_000_000);
        let handle = demod.handle();
        for mode in [DemodulationMode::Am, DemodulationMode::Wfm, DemodulationMode::Cw] {
            assert!(handle.set_mode(mode).is_ok(), "{} rejected", mode);
            assert_eq!(handle.mode(), mode);
        }
    }

    #[test]
    fn mode_change_retargets_and_clamps_width() {
        let demod = demodulator(SOURCE_RATE);
        let handle = demod.handle();
        handle.set_mode(DemodulationMode::Wfm).unwrap();
        assert_eq!(handle.channel_width(), 65_000);
        assert_eq!(handle.target_rate.load(Ordering::Relaxed), 384_000);

        handle.set_mode(DemodulationMode::Nfm).unwrap();
        assert_eq!(handle.channel_width(), 15_000);
        assert_eq!(handle.target_rate.load(Ordering::Relaxed), 96_000);

        assert_eq!(handle.set_channel_width(1_000), 3_000);
        assert_eq!(handle.set_channel_width(12_000), 12_000);
    }

    #[test]
    fn nfm_tone_gives_constant_output() {
        let mut stage = demodulator(SOURCE_RATE).stage;
        let rate = DemodulationMode::Nfm.quadrature_rate();
        let mut audio = SamplePacket::new(0);
        for i in 0..4 {
            let input = tone(1_024, rate, 2_000.0, 0.5, i * 1_024);
            assert!(stage.demodulate(&input, settings(DemodulationMode::Nfm), &mut audio));
        }
        assert_eq!(audio.len(), 1_024);
        assert_eq!(audio.sample_rate(), rate);
        // 2 kHz against a 7.5 kHz deviation.
        for &sample in &audio.re()[100..] {
            assert_approx_eq(sample, 2_000.0 / 7_500.0, 0.01, "nfm level");
        }
    }

    #[test]
    fn am_output_stays_below_agc_target() {
        let mut stage = demodulator(SOURCE_RATE).stage;
        let rate = DemodulationMode::Am.quadrature_rate();
        let mut audio = SamplePacket::new(0);
        for i in 0..10 {
            let mut input = SamplePacket::new(960);
            for n in 0..960 {
                let t = (i * 960 + n) as f32 / rate as f32;
                let envelope = 1.0 + 0.5 * (std::f32::consts::TAU * 1_000.0 * t).sin();
                input.push(envelope, 0.0);
            }
            input.set_sample_rate(rate);
            assert!(stage.demodulate(&input, settings(DemodulationMode::Am), &mut audio));
        }
        let peak = audio.re().iter().fold(0.0_f32, |m, s| m.max(s.abs()));
        assert!(peak <= 0.75 + 1e-3, "peak {}", peak);
        assert!(peak > 0.1, "peak {}", peak);
    }

    #[test]
    fn sideband_modes_converge_below_agc_target() {
        let cases = [
            (DemodulationMode::Usb, 1_500.0),
            (DemodulationMode::Lsb, -1_500.0),
            (DemodulationMode::Cw, CW_TONE_HZ as f32),
        ];
        for (mode, offset_hz) in cases {
            let mut stage = demodulator(SOURCE_RATE).stage;
            let rate = mode.quadrature_rate();
            let mut audio = SamplePacket::new(0);
            for i in 0..10 {
                let input = tone(960, rate, offset_hz, 0.2, i * 960);
                assert!(
                    stage.demodulate(&input, settings(mode), &mut audio),
                    "{} produced no audio",
                    mode
                );
            }
            let peak = audio.re().iter().fold(0.0_f32, |m, s| m.max(s.abs()));
            assert!(peak <= 0.75 + 1e-3, "{} peak {}", mode, peak);
            assert!(peak > 0.1, "{} peak {}", mode, peak);
        }
    }

    #[test]
    fn usb_keeps_the_upper_sideband_only() {
        let rate = DemodulationMode::Usb.quadrature_rate();
        let mut energy = Vec::new();
        for mode in [DemodulationMode::Usb, DemodulationMode::Lsb] {
            let mut stage = demodulator(SOURCE_RATE).stage;
            let mut audio = SamplePacket::new(4_096);
            for i in 0..4 {
                // Centre of the upper passband.
                let input = tone(4_096, rate, 1_500.0, 0.5, i * 4_096);
                stage.channel_filter(&input, 2_800.0);
                audio.clear();
                assert!(stage.select_sideband(mode, 2_800.0, &mut audio));
            }
            assert_eq!(audio.len(), 2_048);
            assert_eq!(audio.sample_rate(), rate / 2);
            energy.push(rms(&audio.re()[1_024..]));
        }
        assert!(energy[0] > 0.1, "usb rms {}", energy[0]);
        assert!(energy[1] < energy[0] / 20.0, "lsb rms {}", energy[1]);
    }

    #[test]
    fn channel_filter_is_rebuilt_only_on_change() {
        let mut stage = demodulator(SOURCE_RATE).stage;
        let input = tone(256, 96_000, 1_000.0, 0.5, 0);
        stage.channel_filter(&input, 10_000.0);
        let taps = stage.user_filter.as_ref().unwrap().num_taps();
        stage.channel_filter(&input, 10_000.0);
        assert_eq!(stage.user_filter.as_ref().unwrap().num_taps(), taps);
        assert_eq!(stage.quadrature.len(), 256);

        stage.channel_filter(&input, 5_000.0);
        match stage.user_filter.as_ref().unwrap().spec() {
            FilterSpec::LowPass(spec) => assert_eq!(spec.cutoff, 5_000.0),
            other => panic!("unexpected filter {:?}", other),
        }
    }

    #[test]
    fn zero_volume_mutes() {
        let mut stage = demodulator(SOURCE_RATE).stage;
        let rate = DemodulationMode::Wfm.quadrature_rate();
        let mut audio = SamplePacket::new(0);
        let muted = DemodSettings {
            volume: 0.0,
            ..settings(DemodulationMode::Wfm)
        };
        assert!(stage.demodulate(&tone(512, rate, 20_000.0, 0.5, 0), muted, &mut audio));
        assert!(audio.re().iter().all(|&s| s == 0.0));
    }

    #[test]
    fn stale_rate_packets_are_dropped() {
        let mut stage = demodulator(SOURCE_RATE).stage;
        let mut audio = SamplePacket::new(0);
        let input = tone(256, 48_000, 1_000.0, 0.5, 0);
        assert!(!stage.demodulate(&input, settings(DemodulationMode::Nfm), &mut audio));
        assert!(!stage.demodulate(&input, settings(DemodulationMode::Off), &mut audio));
    }

    #[test]
    fn audio_flows_from_source_rate_to_subscribers() {
        let (producer, consumer) = edge("demod", 20, || SamplePacket::new(4_096));
        let demod = Demodulator::new(consumer, SOURCE_RATE, 4_096, LoadMonitor::new()).unwrap();
        let handle = demod.handle();
        handle.set_mode(DemodulationMode::Nfm).unwrap();
        let mut frames = handle.subscribe_audio();
        let thread = demod.spawn().unwrap();

        for i in 0..40 {
            let Some(mut packet) = producer.take_free(Duration::from_secs(1)) else {
                continue;
            };
            packet.clear();
            let source = tone(4_096, SOURCE_RATE, 2_000.0, 0.5, i * 4_096);
            for (&re, &im) in source.re().iter().zip(source.im()) {
                packet.push(re, im);
            }
            packet.set_sample_rate(SOURCE_RATE);
            producer.submit(packet);
        }

        let deadline = Instant::now() + Duration::from_secs(5);
        let mut received = Vec::new();
        while received.len() < 8 && Instant::now() < deadline {
            match frames.try_recv() {
                Ok(frame) => received.push(frame),
                Err(broadcast::error::TryRecvError::Empty) => {
                    std::thread::sleep(Duration::from_millis(5))
                }
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(broadcast::error::TryRecvError::Closed) => break,
            }
        }
        handle.stop();
        thread.join().unwrap();

        assert!(received.len() >= 8, "only {} frames", received.len());
        let last = received.last().unwrap();
        assert_eq!(last.len(), 512);
        for &sample in &last[64..] {
            assert_approx_eq(sample, 2_000.0 / 7_500.0, 0.02, "audio level");
        }
    }
}
