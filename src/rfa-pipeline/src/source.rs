// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! I/Q sample sources feeding the scheduler.

pub mod convert;
pub mod file;
pub mod tone;

use std::time::{Duration, Instant};

use rfa_core::{PipelineError, SamplePacket};

pub use convert::{IqConverter, SampleFormat};
pub use file::{FileIqSource, FileSourceOptions};
pub use tone::ToneIqSource;

/// A front end delivering raw capture packets in its native byte format.
///
/// Raw packets come from a pool owned by the source and must be handed
/// back through [`IqSource::return_packet`] once consumed.
pub trait IqSource: Send + 'static {
    fn start_sampling(&mut self) -> Result<(), PipelineError>;

    fn stop_sampling(&mut self);

    /// Next raw packet, waiting at most `timeout`.
    ///
    /// `Ok(None)` means the source is exhausted or stalled.
    fn get_packet(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>, PipelineError>;

    fn return_packet(&mut self, packet: Vec<u8>);

    /// Convert `raw` into `dest`, appending after its current length.
    fn fill_into(&mut self, raw: &[u8], dest: &mut SamplePacket) -> usize;

    /// Convert `raw` into `dest` with `channel_frequency` shifted to 0 Hz.
    fn mix_into(&mut self, raw: &[u8], dest: &mut SamplePacket, channel_frequency: i64) -> usize;

    fn sample_rate(&self) -> u32;

    /// Centre frequency in Hz.
    fn frequency(&self) -> i64;

    /// Raw packet size in bytes.
    fn packet_size(&self) -> usize;

    fn bytes_per_sample(&self) -> usize;

    /// Complex samples per raw packet.
    fn samples_per_packet(&self) -> usize {
        self.packet_size() / self.bytes_per_sample().max(1)
    }
}

/// Recycled raw byte buffers.
#[derive(Debug, Default)]
pub(crate) struct RawPool {
    free: Vec<Vec<u8>>,
    packet_size: usize,
}

impl RawPool {
    pub(crate) fn new(packet_size: usize) -> Self {
        Self {
            free: Vec::new(),
            packet_size,
        }
    }

    pub(crate) fn take(&mut self) -> Vec<u8> {
        let mut buf = self.free.pop().unwrap_or_default();
        buf.clear();
        buf.reserve(self.packet_size);
        buf
    }

    pub(crate) fn give(&mut self, buf: Vec<u8>) {
        if self.free.len() < 16 {
            self.free.push(buf);
        }
    }
}

/// Holds packet delivery back to real time.
#[derive(Debug)]
pub(crate) struct Pacer {
    sample_rate: u32,
    started: Option<Instant>,
    samples: u64,
}

impl Pacer {
    pub(crate) fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            started: None,
            samples: 0,
        }
    }

    pub(crate) fn reset(&mut self) {
        self.started = None;
        self.samples = 0;
    }

    /// Account for `samples` more samples and sleep until they are due,
    /// but never longer than `timeout`.
    pub(crate) fn wait(&mut self, samples: usize, timeout: Duration) {
        if self.sample_rate == 0 {
            return;
        }
        let started = *self.started.get_or_insert_with(Instant::now);
        let due = started
            + Duration::from_secs_f64(self.samples as f64 / self.sample_rate as f64);
        self.samples += samples as u64;
        let now = Instant::now();
        if due > now {
            std::thread::sleep((due - now).min(timeout));
        }
    }
}
