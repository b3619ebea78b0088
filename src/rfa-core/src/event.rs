// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use serde::Serialize;
use tokio::sync::mpsc;

/// Why a recording ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordingStopReason {
    Requested,
    MaxDuration,
    MaxSize,
    WriteFailed,
    Shutdown,
}

/// Notifications sent from the pipeline stages to the orchestration layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PipelineEvent {
    /// Mean magnitude (dB) across the demodulated channel.
    SignalStrength { db: f32 },
    /// Periodic size report of the active recording.
    RecordingSize { bytes: u64 },
    /// Emitted exactly once per recording.
    RecordingStopped {
        bytes: u64,
        reason: RecordingStopReason,
    },
    /// A configuration change was refused; the previous settings remain.
    ConfigRejected { message: String },
    /// Terminal failure; the pipeline has stopped.
    Stopped { reason: String },
}

pub type EventSender = mpsc::UnboundedSender<PipelineEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<PipelineEvent>;

pub fn event_channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}
