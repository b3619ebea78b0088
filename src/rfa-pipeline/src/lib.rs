// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Streaming SDR pipeline: a source-driven scheduler fanning packets out to
//! a spectrum processor, a resampling demodulator chain and a raw recorder.

pub mod audio;
pub mod demodulator;
pub mod fft_processor;
pub mod pipeline;
pub mod recording;
pub mod resampler;
pub mod scheduler;
pub mod source;
pub mod worker;

pub use audio::{AudioFrame, AudioSink};
pub use demodulator::{DemodSettings, Demodulator, DemodulatorHandle};
pub use fft_processor::{channel_strength, FftControls, FftProcessor};
pub use pipeline::{Pipeline, PipelineOptions};
pub use recording::{recording_file_name, Recorder, RecordingOptions};
pub use resampler::Resampler;
pub use scheduler::{Scheduler, SchedulerHandle, SchedulerState, SquelchDebounce};
pub use source::{FileIqSource, FileSourceOptions, IqSource, SampleFormat, ToneIqSource};
pub use worker::StopFlag;
