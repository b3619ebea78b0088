// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Final decimation to the audio rate and fan-out of PCM frames.

use std::time::Duration;

use rfa_core::{edge, EdgeConsumer, EdgeProducer, SamplePacket, AUDIO_RATE};
use rfa_dsp::{FilterDesignError, FirFilter, LowPassSpec};
use tokio::sync::broadcast;
use tracing::{error, info, trace};

use crate::worker::StopFlag;

pub const AUDIO_QUEUE_SIZE: usize = 2;
/// Frames buffered per subscriber before it starts lagging.
pub const AUDIO_BROADCAST_CAPACITY: usize = 64;
const QUEUE_TIMEOUT: Duration = Duration::from_millis(1000);

/// Mono PCM at [`AUDIO_RATE`], nominally within [-1, 1].
pub type AudioFrame = Vec<f32>;

/// Normalised anti-alias low-pass: `cutoff` and `transition_width` are
/// fractions of the input rate.
fn decimator(decimation: usize, transition_width: f32) -> Result<FirFilter, FilterDesignError> {
    FirFilter::low_pass(LowPassSpec {
        decimation,
        gain: 1.0,
        sample_rate: 1.0,
        cutoff: 0.1,
        transition_width,
        attenuation_db: 30.0,
    })
}

pub struct AudioSink {
    input: EdgeConsumer<SamplePacket>,
    producer: EdgeProducer<SamplePacket>,
    frames: broadcast::Sender<AudioFrame>,
    by_two: FirFilter,
    by_four: FirFilter,
    stage: SamplePacket,
    output: SamplePacket,
    stop: StopFlag,
}

impl AudioSink {
    pub fn new(stop: StopFlag) -> Result<Self, FilterDesignError> {
        let (producer, input) = edge("audio", AUDIO_QUEUE_SIZE, || SamplePacket::new(0));
        let (frames, _) = broadcast::channel(AUDIO_BROADCAST_CAPACITY);
        Ok(Self {
            input,
            producer,
            frames,
            by_two: decimator(2, 0.15)?,
            by_four: decimator(4, 0.1)?,
            stage: SamplePacket::new(0),
            output: SamplePacket::new(0),
            stop,
        })
    }

    /// Producer side handed to the demodulator.
    pub fn producer(&self) -> EdgeProducer<SamplePacket> {
        self.producer.clone()
    }

    pub fn frames(&self) -> broadcast::Sender<AudioFrame> {
        self.frames.clone()
    }

    pub fn run(mut self) {
        info!("audio sink started");
        while !self.stop.is_stopped() {
            let Some(packet) = self.input.recv(QUEUE_TIMEOUT) else {
                continue;
            };
            if let Some(frame) = self.decimate(&packet) {
                // No subscribers is not an error.
                let _ = self.frames.send(frame);
            }
            self.input.give_back(packet);
        }
        info!("audio sink stopped");
    }

    /// Bring `packet` down to [`AUDIO_RATE`]. Only the in-phase part is used.
    fn decimate(&mut self, packet: &SamplePacket) -> Option<AudioFrame> {
        if packet.is_empty() {
            return None;
        }
        let rate = packet.sample_rate();
        if rate % AUDIO_RATE != 0 {
            error!("cannot play {} Sps audio; dropping packet", rate);
            return None;
        }
        let len = packet.len();
        match rate / AUDIO_RATE {
            1 => Some(packet.re().to_vec()),
            2 => {
                self.output = std::mem::take(&mut self.output).with_min_capacity(len / 2 + 1);
                self.output.clear();
                self.by_two.filter_real(packet, &mut self.output, 0, len);
                Some(self.output.re().to_vec())
            }
            8 => {
                self.stage = std::mem::take(&mut self.stage).with_min_capacity(len / 2 + 1);
                self.stage.clear();
                self.by_two.filter_real(packet, &mut self.stage, 0, len);

                let staged = self.stage.len();
                self.output = std::mem::take(&mut self.output).with_min_capacity(staged / 4 + 1);
                self.output.clear();
                self.by_four.filter_real(&self.stage, &mut self.output, 0, staged);
                trace!("audio {} -> {} -> {} samples", len, staged, self.output.len());
                Some(self.output.re().to_vec())
            }
            ratio => {
                error!("unsupported audio decimation {}; dropping packet", ratio);
                None
            }
        }
    }
}
