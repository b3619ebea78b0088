// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use rfa_core::PipelineError;
use tracing::error;

/// Cooperative stop signal polled by every worker loop.
#[derive(Debug, Clone, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Spawn a named worker thread.
pub(crate) fn spawn_worker<F>(name: &'static str, body: F) -> Result<JoinHandle<()>, PipelineError>
where
    F: FnOnce() + Send + 'static,
{
    thread::Builder::new()
        .name(format!("rfa-{}", name))
        .spawn(body)
        .map_err(|e| PipelineError::Spawn(name, e))
}

/// Join a worker, logging instead of propagating a panic.
pub(crate) fn join_worker(name: &str, handle: JoinHandle<()>) {
    if handle.join().is_err() {
        error!("{} thread panicked", name);
    }
}
