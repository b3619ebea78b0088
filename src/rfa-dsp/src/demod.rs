// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Per-packet demodulation math. Output goes to the in-phase array; the
//! quadrature array of an audio packet is left as scratch.

use std::f32::consts::PI;

use num_complex::Complex;
use rfa_core::SamplePacket;

/// Peak decay applied once per packet.
pub const AGC_DECAY: f32 = 0.95;
/// Normalised output peak.
pub const AGC_TARGET: f32 = 0.75;

/// Decaying peak tracker used for AM, SSB and CW gain normalisation.
#[derive(Debug, Clone, Default)]
pub struct PeakAgc {
    last_max: f32,
}

impl PeakAgc {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn peak(&self) -> f32 {
        self.last_max
    }

    pub fn reset(&mut self) {
        self.last_max = 0.0;
    }

    /// Decay the peak, raise it to the largest magnitude in `samples` and
    /// return the gain that maps the peak to [`AGC_TARGET`].
    ///
    /// A zero peak yields a zero gain so silence stays silent.
    pub fn update(&mut self, samples: &[f32]) -> f32 {
        self.last_max *= AGC_DECAY;
        for &value in samples {
            let magnitude = value.abs();
            if magnitude > self.last_max {
                self.last_max = magnitude;
            }
        }
        if self.last_max > f32::EPSILON {
            AGC_TARGET / self.last_max
        } else {
            0.0
        }
    }

    /// Scale `samples` in place by the gain from [`PeakAgc::update`].
    pub fn normalize(&mut self, samples: &mut [f32]) {
        let gain = self.update(samples);
        for value in samples.iter_mut() {
            *value *= gain;
        }
    }
}

/// Polar discriminator with one sample of carry-over between packets.
#[derive(Debug, Clone, Default)]
pub struct FmDiscriminator {
    previous: Complex<f32>,
}

impl FmDiscriminator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Demodulate `input` into `output.re`, scaled so a deviation of
    /// `max_deviation` Hz maps to +/-1.
    pub fn demodulate(
        &mut self,
        input: &SamplePacket,
        output: &mut SamplePacket,
        quadrature_rate: u32,
        max_deviation: f32,
    ) {
        let len = input.len();
        if len == 0 {
            return;
        }
        let gain = quadrature_rate as f32 / (2.0 * PI * max_deviation);
        let (in_re, in_im) = (input.re(), input.im());
        let (out_re, _) = output.buffers_mut();
        let limit = len.min(out_re.len());

        let mut previous = self.previous;
        for i in 0..limit {
            let current = Complex::new(in_re[i], in_im[i]);
            let product = current * previous.conj();
            out_re[i] = gain * product.im.atan2(product.re);
            previous = current;
        }
        self.previous = Complex::new(in_re[len - 1], in_im[len - 1]);
        output.set_len(limit);
        output.set_sample_rate(quadrature_rate);
    }
}

/// Envelope detector: squared magnitude with DC removed, AGC-normalised.
#[derive(Debug, Clone, Default)]
pub struct AmDemodulator {
    agc: PeakAgc,
}

impl AmDemodulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn demodulate(&mut self, input: &SamplePacket, output: &mut SamplePacket, quadrature_rate: u32) {
        let (in_re, in_im) = (input.re(), input.im());
        let (out_re, _) = output.buffers_mut();
        let len = input.len().min(out_re.len());
        if len == 0 {
            return;
        }

        let envelope = &mut out_re[..len];
        for (i, slot) in envelope.iter_mut().enumerate() {
            *slot = in_re[i] * in_re[i] + in_im[i] * in_im[i];
        }
        let avg = envelope.iter().sum::<f32>() / len as f32;
        let gain = self.agc.update(envelope);
        for value in envelope.iter_mut() {
            *value = (*value - avg) * gain;
        }

        output.set_len(len);
        output.set_sample_rate(quadrature_rate);
    }
}
