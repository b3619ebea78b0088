// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! DSP primitives consumed by the pipeline stages: window functions, FIR
//! design and filtering, rational resampling, the windowed FFT kernel and
//! the FM/AM demodulation math.

pub mod demod;
pub mod fft;
pub mod fir;
pub mod resampler;
pub mod window;

pub use demod::{AmDemodulator, FmDiscriminator, PeakAgc};
pub use fft::WindowedFft;
pub use fir::{BandPassSpec, FilterDesignError, FilterSpec, FirFilter, LowPassSpec};
pub use resampler::{limit_denominator, RationalResampler};
pub use window::Window;
