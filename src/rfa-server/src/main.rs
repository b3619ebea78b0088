// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

mod config;

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use tokio::signal;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use rfa_app::{init_logging, ConfigFile};
use rfa_core::{event_channel, DemodulationMode, DynResult, EventReceiver, PipelineEvent};
use rfa_pipeline::{
    recording_file_name, AudioFrame, FileIqSource, FileSourceOptions, IqSource, Pipeline,
    RecordingOptions, ToneIqSource,
};

use config::ServerConfig;

const PKG_DESCRIPTION: &str = concat!(env!("CARGO_PKG_NAME"), " - SDR receive pipeline");
/// Samples per packet of the synthetic tone source.
const TONE_PACKET_SAMPLES: usize = 16_384;
const TONE_AMPLITUDE: f64 = 0.5;

#[derive(Debug, Parser)]
#[command(
    author = env!("CARGO_PKG_AUTHORS"),
    version = env!("CARGO_PKG_VERSION"),
    about = PKG_DESCRIPTION,
)]
struct Cli {
    /// Path to configuration file
    #[arg(long = "config", short = 'C', value_name = "FILE")]
    config: Option<PathBuf>,
    /// Print example configuration and exit
    #[arg(long = "print-config")]
    print_config: bool,
    /// Raw I/Q capture to replay (synthetic tone when absent)
    #[arg(short = 'i', long = "input", value_name = "FILE")]
    input: Option<PathBuf>,
    /// Sample layout of the capture (s16le, u8, s8)
    #[arg(short = 'f', long = "format")]
    format: Option<String>,
    /// Source sample rate in Sps
    #[arg(short = 's', long = "sample-rate")]
    sample_rate: Option<u32>,
    /// Source centre frequency in Hz
    #[arg(long = "frequency")]
    frequency: Option<i64>,
    /// Demodulation mode (off, am, nfm, wfm, lsb, usb, cw)
    #[arg(short = 'm', long = "mode")]
    mode: Option<DemodulationMode>,
    /// Channel frequency in Hz
    #[arg(short = 'c', long = "channel")]
    channel: Option<i64>,
    /// Record raw I/Q into this directory
    #[arg(long = "record", value_name = "DIR")]
    record: Option<PathBuf>,
    /// Write demodulated audio to this WAV file
    #[arg(long = "wav", value_name = "FILE")]
    wav: Option<PathBuf>,
}

impl Cli {
    fn apply_overrides(&self, cfg: &mut ServerConfig) {
        if let Some(ref input) = self.input {
            cfg.source.path = Some(input.clone());
        }
        if let Some(ref format) = self.format {
            cfg.source.format = format.clone();
        }
        if let Some(rate) = self.sample_rate {
            cfg.source.sample_rate = rate;
        }
        if let Some(frequency) = self.frequency {
            cfg.source.center_frequency_hz = frequency;
        }
        if let Some(mode) = self.mode {
            cfg.demod.enabled = mode.is_active();
            cfg.demod.mode = mode;
        }
        if let Some(channel) = self.channel {
            cfg.demod.channel_frequency_hz = Some(channel);
        }
        if let Some(ref dir) = self.record {
            cfg.recording.enabled = true;
            cfg.recording.directory = dir.clone();
        }
        if let Some(ref wav) = self.wav {
            cfg.audio.wav_path = Some(wav.clone());
        }
    }
}

fn build_source(cfg: &ServerConfig) -> DynResult<Box<dyn IqSource>> {
    let source = &cfg.source;
    match source.path {
        Some(ref path) => {
            info!("Replaying {} ({})", path.display(), source.format);
            let file = FileIqSource::new(FileSourceOptions {
                path: path.clone(),
                format: source.sample_format()?,
                sample_rate: source.sample_rate,
                frequency: source.center_frequency_hz,
                packet_size: source.packet_size,
                repeat: source.repeat,
                throttle: source.throttle,
            })?;
            Ok(Box::new(file))
        }
        None => {
            info!(
                "No input file; generating a tone at {:+} Hz",
                source.tone_offset_hz
            );
            let tone = ToneIqSource::new(
                source.sample_rate,
                source.center_frequency_hz,
                source.tone_offset_hz,
                TONE_AMPLITUDE,
                TONE_PACKET_SAMPLES,
            )
            .with_throttle(true);
            Ok(Box::new(tone))
        }
    }
}

fn start_recording(pipeline: &Pipeline, cfg: &ServerConfig) -> DynResult<PathBuf> {
    let timestamp = chrono::Utc::now().format("%Y%m%d-%H%M%S").to_string();
    let path = recording_file_name(
        &cfg.recording.directory,
        &timestamp,
        pipeline.frequency(),
        pipeline.sample_rate(),
        &cfg.source.format,
    );
    pipeline.start_recording(&RecordingOptions {
        path: path.clone(),
        only_when_squelch_satisfied: cfg.recording.only_when_squelch_satisfied,
        max_duration: cfg.max_recording_duration(),
        max_size_bytes: cfg.recording.max_size_bytes,
    })?;
    Ok(path)
}

/// Write PCM frames as 16-bit mono until the audio channel closes.
fn spawn_wav_writer(
    path: &Path,
    sample_rate: u32,
    mut frames: broadcast::Receiver<AudioFrame>,
) -> DynResult<JoinHandle<()>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec)?;
    let label = path.display().to_string();
    info!("Writing audio to {}", label);

    Ok(tokio::task::spawn_blocking(move || {
        loop {
            match frames.blocking_recv() {
                Ok(frame) => {
                    for sample in frame {
                        let pcm = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
                        if let Err(e) = writer.write_sample(pcm) {
                            error!("WAV write to {} failed: {}", label, e);
                            return;
                        }
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("WAV writer fell behind; dropped {} frames", n);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
        let samples = writer.len();
        match writer.finalize() {
            Ok(()) => info!("Closed {} after {} samples", label, samples),
            Err(e) => error!("Failed to finalize {}: {}", label, e),
        }
    }))
}

fn log_event(event: &PipelineEvent) {
    match event {
        PipelineEvent::SignalStrength { db } => debug!("Channel strength {:.1} dB", db),
        PipelineEvent::RecordingSize { bytes } => debug!("Recording at {} bytes", bytes),
        PipelineEvent::RecordingStopped { bytes, reason } => {
            info!("Recording stopped ({:?}) after {} bytes", reason, bytes)
        }
        PipelineEvent::ConfigRejected { message } => warn!("Config rejected: {}", message),
        PipelineEvent::Stopped { reason } => warn!("Pipeline stopped: {}", reason),
    }
}

fn emit_json(event: &PipelineEvent) {
    match serde_json::to_string(event) {
        Ok(line) => println!("{}", line),
        Err(e) => error!("Failed to encode event: {}", e),
    }
}

fn log_loads(pipeline: &Pipeline) {
    let loads = pipeline.loads().snapshot();
    if loads.is_empty() {
        return;
    }
    let summary: Vec<String> = loads
        .iter()
        .map(|(stage, load)| format!("{}={:.1}%", stage, load * 100.0))
        .collect();
    info!("Stage load: {}", summary.join(" "));
}

/// Relay pipeline events until Ctrl+C or a terminal `Stopped` event.
async fn run_event_loop(pipeline: &Pipeline, events: &mut EventReceiver, cfg: &ServerConfig) {
    let interval_ms = cfg.report.load_interval_ms;
    let mut load_timer = tokio::time::interval(Duration::from_millis(interval_ms.max(1)));
    load_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            result = signal::ctrl_c() => {
                if let Err(e) = result {
                    error!("Failed to listen for Ctrl+C: {}", e);
                }
                info!("Ctrl+C received, shutting down");
                break;
            }
            event = events.recv() => {
                let Some(event) = event else {
                    break;
                };
                if cfg.report.events_json {
                    emit_json(&event);
                }
                log_event(&event);
                match event {
                    PipelineEvent::SignalStrength { db } => {
                        pipeline.apply_signal_strength(db);
                    }
                    PipelineEvent::Stopped { .. } => break,
                    _ => {}
                }
            }
            _ = load_timer.tick(), if interval_ms > 0 => log_loads(pipeline),
        }
    }
}

#[tokio::main]
async fn main() -> DynResult<()> {
    let cli = Cli::parse();

    if cli.print_config {
        println!("{}", ServerConfig::example_toml());
        return Ok(());
    }

    let (mut cfg, config_path) = ServerConfig::load(cli.config.as_deref())?;
    cli.apply_overrides(&mut cfg);
    cfg.validate()
        .map_err(|e| format!("Invalid server configuration: {}", e))?;

    init_logging(cfg.general.log_level.as_deref());

    if let Some(ref path) = config_path {
        info!("Loaded configuration from {}", path.display());
    }

    let source = build_source(&cfg)?;
    let (event_tx, mut event_rx) = event_channel();
    let pipeline = Pipeline::start(source, &cfg.pipeline_options(), event_tx)?;

    if cfg.demod.enabled {
        info!(
            "Demodulating {} at {} Hz",
            pipeline.demodulation_mode(),
            pipeline.channel_frequency()
        );
    }

    let wav_task = match cfg.audio.wav_path {
        Some(ref path) if cfg.demod.enabled => Some(spawn_wav_writer(
            path,
            cfg.audio.sample_rate,
            pipeline.subscribe_audio(),
        )?),
        Some(_) => {
            warn!("[audio].wav_path set but demodulation is disabled; no audio written");
            None
        }
        None => None,
    };

    if cfg.recording.enabled {
        match start_recording(&pipeline, &cfg) {
            Ok(path) => info!("Recording to {}", path.display()),
            Err(e) => error!("Failed to start recording: {}", e),
        }
    }

    run_event_loop(&pipeline, &mut event_rx, &cfg).await;

    // Stage threads are joined synchronously; dropping the pipeline closes
    // the audio channel so the WAV writer can finish.
    let mut pipeline = pipeline;
    tokio::task::spawn_blocking(move || {
        pipeline.stop();
        drop(pipeline);
    })
    .await?;

    while let Ok(event) = event_rx.try_recv() {
        if cfg.report.events_json {
            emit_json(&event);
        }
        log_event(&event);
    }

    if let Some(task) = wav_task {
        task.await?;
    }
    Ok(())
}
