// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Windowed-sinc FIR design and a decimating packet filter.

use std::f32::consts::PI;

use num_complex::Complex;
use rfa_core::SamplePacket;
use thiserror::Error;

use crate::window::Window;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum FilterDesignError {
    #[error("sample rate must be > 0 (got {0})")]
    SampleRate(f32),

    #[error("cutoff {cutoff} Hz outside (0, {nyquist}] Hz")]
    Cutoff { cutoff: f32, nyquist: f32 },

    #[error("band edges {low}..{high} Hz invalid for sample rate {sample_rate}")]
    BandEdges {
        low: f32,
        high: f32,
        sample_rate: f32,
    },

    #[error("transition width must be > 0 (got {0})")]
    TransitionWidth(f32),

    #[error("decimation must be >= 1")]
    Decimation,

    #[error("interpolation and decimation must both be >= 1 (got {0}/{1})")]
    ResampleRatio(u32, u32),
}

/// Low-pass design parameters. Plain value type so a live filter can be
/// compared against the desired one.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LowPassSpec {
    pub decimation: usize,
    pub gain: f32,
    pub sample_rate: f32,
    pub cutoff: f32,
    pub transition_width: f32,
    pub attenuation_db: f32,
}

/// Complex (asymmetric) band-pass design parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BandPassSpec {
    pub decimation: usize,
    pub gain: f32,
    pub sample_rate: f32,
    pub low_cutoff: f32,
    pub high_cutoff: f32,
    pub transition_width: f32,
    pub attenuation_db: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FilterSpec {
    LowPass(LowPassSpec),
    BandPass(BandPassSpec),
}

/// Tap count estimate from fred harris' rule of thumb, forced odd.
/// `max_taps == 0` means unlimited.
fn estimate_taps(attenuation_db: f32, sample_rate: f32, transition_width: f32, max_taps: usize) -> usize {
    let mut ntaps = (attenuation_db * sample_rate / (22.0 * transition_width)) as usize;
    if max_taps > 0 {
        ntaps = ntaps.min(max_taps);
    }
    if ntaps % 2 == 0 {
        ntaps += 1;
    }
    ntaps
}

/// Windowed sinc normalised to `gain` at DC.
fn sinc_taps(ntaps: usize, cutoff: f32, sample_rate: f32, gain: f32, window: Window) -> Vec<f32> {
    let m = (ntaps - 1) / 2;
    let fw_t0 = 2.0 * PI * cutoff / sample_rate;
    let mut taps: Vec<f32> = (0..ntaps)
        .map(|i| {
            let n = i as f32 - m as f32;
            let ideal = if i == m {
                fw_t0 / PI
            } else {
                (n * fw_t0).sin() / (n * PI)
            };
            ideal * window.value(i, ntaps)
        })
        .collect();

    let dc: f32 = taps.iter().sum();
    if dc.abs() > 1e-12 {
        let scale = gain / dc;
        for tap in &mut taps {
            *tap *= scale;
        }
    }
    taps
}

/// Design low-pass taps. `max_taps` caps the length (0 = unlimited).
pub fn low_pass_taps(
    spec: &LowPassSpec,
    window: Window,
    max_taps: usize,
) -> Result<Vec<f32>, FilterDesignError> {
    if spec.sample_rate <= 0.0 {
        return Err(FilterDesignError::SampleRate(spec.sample_rate));
    }
    let nyquist = spec.sample_rate / 2.0;
    if spec.cutoff <= 0.0 || spec.cutoff > nyquist {
        return Err(FilterDesignError::Cutoff {
            cutoff: spec.cutoff,
            nyquist,
        });
    }
    if spec.transition_width <= 0.0 {
        return Err(FilterDesignError::TransitionWidth(spec.transition_width));
    }
    let ntaps = estimate_taps(
        spec.attenuation_db,
        spec.sample_rate,
        spec.transition_width,
        max_taps,
    );
    Ok(sinc_taps(ntaps, spec.cutoff, spec.sample_rate, spec.gain, window))
}

/// Design complex band-pass taps: a Blackman low-pass of half the band
/// width, shifted up to the band centre.
pub fn band_pass_taps(spec: &BandPassSpec) -> Result<Vec<Complex<f32>>, FilterDesignError> {
    if spec.sample_rate <= 0.0 {
        return Err(FilterDesignError::SampleRate(spec.sample_rate));
    }
    let nyquist = spec.sample_rate / 2.0;
    if spec.low_cutoff < -nyquist || spec.high_cutoff > nyquist || spec.low_cutoff >= spec.high_cutoff
    {
        return Err(FilterDesignError::BandEdges {
            low: spec.low_cutoff,
            high: spec.high_cutoff,
            sample_rate: spec.sample_rate,
        });
    }
    if spec.transition_width <= 0.0 {
        return Err(FilterDesignError::TransitionWidth(spec.transition_width));
    }

    let ntaps = estimate_taps(spec.attenuation_db, spec.sample_rate, spec.transition_width, 0);
    let half_width = (spec.high_cutoff - spec.low_cutoff) / 2.0;
    let low_pass = sinc_taps(ntaps, half_width, spec.sample_rate, spec.gain, Window::Blackman);

    let centre = PI * (spec.high_cutoff + spec.low_cutoff) / spec.sample_rate;
    let first_phase = -centre * (ntaps / 2) as f32;
    Ok(low_pass
        .iter()
        .enumerate()
        .map(|(i, &tap)| Complex::from_polar(tap, first_phase + centre * i as f32))
        .collect())
}

#[derive(Debug, Clone)]
enum Taps {
    Real(Vec<f32>),
    Complex(Vec<Complex<f32>>),
}

impl Taps {
    fn len(&self) -> usize {
        match self {
            Taps::Real(taps) => taps.len(),
            Taps::Complex(taps) => taps.len(),
        }
    }
}

/// Decimating FIR filter operating on [`SamplePacket`]s.
///
/// The delay line persists across calls so consecutive packets are
/// filtered as one continuous stream.
#[derive(Debug, Clone)]
pub struct FirFilter {
    spec: FilterSpec,
    taps: Taps,
    delay: Vec<Complex<f32>>,
    tap_index: usize,
    decimation_counter: usize,
}

impl FirFilter {
    /// Blackman-windowed low-pass filter.
    pub fn low_pass(spec: LowPassSpec) -> Result<Self, FilterDesignError> {
        if spec.decimation == 0 {
            return Err(FilterDesignError::Decimation);
        }
        let taps = low_pass_taps(&spec, Window::Blackman, 0)?;
        Ok(Self::with_taps(FilterSpec::LowPass(spec), Taps::Real(taps)))
    }

    pub fn band_pass(spec: BandPassSpec) -> Result<Self, FilterDesignError> {
        if spec.decimation == 0 {
            return Err(FilterDesignError::Decimation);
        }
        let taps = band_pass_taps(&spec)?;
        Ok(Self::with_taps(FilterSpec::BandPass(spec), Taps::Complex(taps)))
    }

    fn with_taps(spec: FilterSpec, taps: Taps) -> Self {
        let len = taps.len().max(1);
        Self {
            spec,
            taps,
            delay: vec![Complex::new(0.0, 0.0); len],
            tap_index: 0,
            decimation_counter: 0,
        }
    }

    pub fn spec(&self) -> &FilterSpec {
        &self.spec
    }

    pub fn num_taps(&self) -> usize {
        self.taps.len()
    }

    pub fn decimation(&self) -> usize {
        match self.spec {
            FilterSpec::LowPass(spec) => spec.decimation,
            FilterSpec::BandPass(spec) => spec.decimation,
        }
    }

    /// Filter `count` samples of `input` starting at `offset`, appending to
    /// `output`. Stops early when `output` is full.
    ///
    /// Returns the number of input samples consumed.
    pub fn filter(
        &mut self,
        input: &SamplePacket,
        output: &mut SamplePacket,
        offset: usize,
        count: usize,
    ) -> usize {
        self.run(input, output, offset, count, false)
    }

    /// Like [`FirFilter::filter`] but only the in-phase component is used.
    pub fn filter_real(
        &mut self,
        input: &SamplePacket,
        output: &mut SamplePacket,
        offset: usize,
        count: usize,
    ) -> usize {
        self.run(input, output, offset, count, true)
    }

    fn run(
        &mut self,
        input: &SamplePacket,
        output: &mut SamplePacket,
        offset: usize,
        count: usize,
        real_only: bool,
    ) -> usize {
        let end = offset.saturating_add(count).min(input.len());
        let start = offset.min(end);
        let in_re = &input.re()[start..end];
        let in_im = &input.im()[start..end];
        let decimation = self.decimation().max(1);
        let capacity = output.capacity();
        let mut out_idx = output.len();
        let mut consumed = in_re.len();

        {
            let (out_re, out_im) = output.buffers_mut();
            for i in 0..in_re.len() {
                let im = if real_only { 0.0 } else { in_im[i] };
                self.delay[self.tap_index] = Complex::new(in_re[i], im);

                if self.decimation_counter == 0 {
                    if out_idx == capacity {
                        consumed = i;
                        break;
                    }
                    let y = self.convolve();
                    out_re[out_idx] = y.re;
                    out_im[out_idx] = if real_only { 0.0 } else { y.im };
                    out_idx += 1;
                }

                self.decimation_counter = (self.decimation_counter + 1) % decimation;
                self.tap_index = (self.tap_index + 1) % self.delay.len();
            }
        }

        output.set_len(out_idx);
        output.set_sample_rate(input.sample_rate() / decimation as u32);
        output.set_frequency(input.frequency());
        consumed
    }

    /// Dot product of the taps with the delay line, newest sample first.
    fn convolve(&self) -> Complex<f32> {
        let len = self.delay.len();
        let mut index = self.tap_index;
        let mut acc = Complex::new(0.0_f32, 0.0_f32);
        match &self.taps {
            Taps::Real(taps) => {
                for &tap in taps {
                    acc += self.delay[index] * tap;
                    index = if index == 0 { len - 1 } else { index - 1 };
                }
            }
            Taps::Complex(taps) => {
                for &tap in taps {
                    acc += self.delay[index] * tap;
                    index = if index == 0 { len - 1 } else { index - 1 };
                }
            }
        }
        acc
    }
}
