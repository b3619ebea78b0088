// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Polyphase rational resampler.

use num_complex::Complex;
use rfa_core::SamplePacket;

use crate::fir::{low_pass_taps, FilterDesignError, LowPassSpec};
use crate::window::Window;

const KAISER_BETA: f64 = 7.0;
const HALFBAND: f32 = 0.5;
const FRACTIONAL_BW: f32 = 0.4;
const STOPBAND_ATTENUATION_DB: f32 = 72.220_87;

pub fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a
}

/// Closest fraction to `numerator / denominator` whose denominator does not
/// exceed `max_denominator`.
///
/// The exact reduced ratio is returned when it already fits. Otherwise a
/// Stern-Brocot search narrows the bracketing pair until the next mediant
/// would exceed the limit, and the closer bound wins. The numerator of the
/// result is never zero.
pub fn limit_denominator(numerator: u32, denominator: u32, max_denominator: u32) -> (u32, u32) {
    let (num, den) = (numerator as u64, denominator.max(1) as u64);
    let max = max_denominator.max(1) as u64;
    let g = gcd(num, den).max(1);
    if den / g <= max {
        return ((num / g) as u32, (den / g) as u32);
    }

    let (mut lower_n, mut lower_d) = (0u64, 1u64);
    let (mut upper_n, mut upper_d) = (1u64, 0u64);
    loop {
        let mid_n = lower_n + upper_n;
        let mid_d = lower_d + upper_d;
        if mid_d > max {
            break;
        }
        // Compare mid_n / mid_d against num / den without division.
        let lhs = mid_n * den;
        let rhs = num * mid_d;
        if lhs == rhs {
            return (mid_n as u32, mid_d as u32);
        } else if lhs < rhs {
            lower_n = mid_n;
            lower_d = mid_d;
        } else {
            upper_n = mid_n;
            upper_d = mid_d;
        }
    }

    let target = num as f64 / den as f64;
    let lower_err = (lower_n as f64 / lower_d as f64 - target).abs();
    let upper_err = if upper_d == 0 {
        f64::INFINITY
    } else {
        (upper_n as f64 / upper_d as f64 - target).abs()
    };
    if lower_n == 0 || upper_err < lower_err {
        (upper_n as u32, upper_d.max(1) as u32)
    } else {
        (lower_n as u32, lower_d as u32)
    }
}

/// Kaiser-windowed prototype low-pass for an `interpolation / decimation`
/// resampler, sized at most `max_taps_per_phase` per polyphase branch.
pub fn design_resampler_taps(
    interpolation: usize,
    decimation: usize,
    max_taps_per_phase: usize,
) -> Result<Vec<f32>, FilterDesignError> {
    let rate = interpolation as f32 / decimation as f32;
    let (transition, cutoff) = if rate >= 1.0 {
        let tw = HALFBAND - FRACTIONAL_BW;
        (tw, HALFBAND - tw / 2.0)
    } else {
        let tw = rate * (HALFBAND - FRACTIONAL_BW);
        (tw, rate * HALFBAND - tw / 2.0)
    };
    let spec = LowPassSpec {
        decimation: 1,
        gain: interpolation as f32,
        sample_rate: interpolation as f32,
        cutoff,
        transition_width: transition,
        attenuation_db: STOPBAND_ATTENUATION_DB,
    };
    low_pass_taps(
        &spec,
        Window::Kaiser(KAISER_BETA),
        max_taps_per_phase.saturating_mul(interpolation),
    )
}

/// Changes the sample rate of a complex stream by `interpolation / decimation`.
///
/// State carries over between calls so a stream split across packets is
/// resampled without discontinuities.
pub struct RationalResampler {
    interpolation: usize,
    decimation: usize,
    bank: Vec<Vec<f32>>,
    delay: Vec<Complex<f32>>,
    delay_index: usize,
    ctr: usize,
}

impl RationalResampler {
    pub fn new(
        interpolation: u32,
        decimation: u32,
        max_taps_per_phase: usize,
    ) -> Result<Self, FilterDesignError> {
        if interpolation == 0 || decimation == 0 {
            return Err(FilterDesignError::ResampleRatio(interpolation, decimation));
        }
        let g = gcd(interpolation as u64, decimation as u64);
        let interpolation = (interpolation as u64 / g) as usize;
        let decimation = (decimation as u64 / g) as usize;

        let mut taps = design_resampler_taps(interpolation, decimation, max_taps_per_phase)?;
        let per_phase = taps.len().div_ceil(interpolation).max(1);
        taps.resize(per_phase * interpolation, 0.0);

        let bank = (0..interpolation)
            .map(|phase| {
                (0..per_phase)
                    .map(|i| taps[i * interpolation + phase])
                    .collect()
            })
            .collect();

        Ok(Self {
            interpolation,
            decimation,
            bank,
            delay: vec![Complex::new(0.0, 0.0); per_phase],
            delay_index: 0,
            ctr: 0,
        })
    }

    pub fn interpolation(&self) -> usize {
        self.interpolation
    }

    pub fn decimation(&self) -> usize {
        self.decimation
    }

    pub fn taps_per_phase(&self) -> usize {
        self.delay.len()
    }

    /// Resample `input`, appending to `output` until it is full.
    ///
    /// Returns the number of input samples consumed. The output rate is
    /// `input rate * interpolation / decimation`.
    pub fn resample(&mut self, input: &SamplePacket, output: &mut SamplePacket) -> usize {
        let count = input.len();
        if count == 0 {
            return 0;
        }
        let in_re = input.re();
        let in_im = input.im();
        let capacity = output.capacity();
        let mut out_idx = output.len();
        let mut consumed = 0;

        self.delay[self.delay_index] = Complex::new(in_re[0], in_im[0]);
        self.advance(in_re, in_im, &mut consumed);

        {
            let (out_re, out_im) = output.buffers_mut();
            while consumed < count && out_idx < capacity {
                let y = self.convolve();
                out_re[out_idx] = y.re;
                out_im[out_idx] = y.im;
                out_idx += 1;
                self.ctr += self.decimation;
                self.advance(in_re, in_im, &mut consumed);
            }
        }

        let rate = input.sample_rate() as u64 * self.interpolation as u64 / self.decimation as u64;
        output.set_len(out_idx);
        output.set_sample_rate(rate as u32);
        output.set_frequency(input.frequency());
        consumed
    }

    /// Pull input samples into the delay line while the phase counter has
    /// wrapped past the interpolation factor.
    fn advance(&mut self, in_re: &[f32], in_im: &[f32], consumed: &mut usize) {
        let count = in_re.len();
        while self.ctr >= self.interpolation {
            self.ctr -= self.interpolation;
            self.delay_index = (self.delay_index + 1) % self.delay.len();
            *consumed += 1;
            if *consumed >= count {
                break;
            }
            self.delay[self.delay_index] = Complex::new(in_re[*consumed], in_im[*consumed]);
        }
    }

    fn convolve(&self) -> Complex<f32> {
        let len = self.delay.len();
        let mut index = self.delay_index;
        let mut acc = Complex::new(0.0_f32, 0.0_f32);
        for &tap in &self.bank[self.ctr] {
            acc += self.delay[index] * tap;
            index = if index == 0 { len - 1 } else { index - 1 };
        }
        acc
    }
}
