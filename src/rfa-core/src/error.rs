// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use std::io;
use std::time::Duration;

use thiserror::Error;

/// Failures surfaced by the pipeline stages and their collaborators.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("source delivered no packet within {0:?}")]
    SourceExhausted(Duration),

    #[error("source I/O error: {0}")]
    SourceIo(String),

    #[error("recording I/O error: {0}")]
    Recording(#[from] io::Error),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("source rate {sample_rate} Sps is below the minimum demodulator input rate {minimum} Sps")]
    UnsupportedRate { sample_rate: u32, minimum: u32 },

    #[error("failed to spawn {0} thread: {1}")]
    Spawn(&'static str, io::Error),
}
