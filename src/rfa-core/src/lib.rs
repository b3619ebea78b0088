// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

pub mod error;
pub mod event;
pub mod load;
pub mod mode;
pub mod packet;
pub mod queue;
pub mod waterfall;

pub type DynResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

pub use error::PipelineError;
pub use event::{event_channel, EventReceiver, EventSender, PipelineEvent, RecordingStopReason};
pub use load::LoadMonitor;
pub use mode::{DemodulationMode, ModeParams, AUDIO_RATE, CW_TONE_HZ, MIN_INPUT_RATE};
pub use packet::SamplePacket;
pub use queue::{edge, EdgeConsumer, EdgeProducer};
pub use waterfall::{SharedWaterfall, WaterfallSpeed, WaterfallState, NO_DATA_DB};
