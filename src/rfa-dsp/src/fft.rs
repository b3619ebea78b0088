// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use std::sync::Arc;

use rustfft::num_complex::Complex as FftComplex;
use rustfft::{Fft, FftPlanner};

use crate::window::Window;

/// Floor applied to the normalised magnitude before taking the log.
const MAGNITUDE_FLOOR: f32 = 1e-10;

/// Hann-windowed forward FFT producing centred dB magnitudes.
///
/// Bin 0 of the output is the most negative frequency, bin `size / 2` is DC.
pub struct WindowedFft {
    planner: FftPlanner<f32>,
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    buf: Vec<FftComplex<f32>>,
    scratch: Vec<FftComplex<f32>>,
}

impl WindowedFft {
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        let mut planner = FftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(size);
        let scratch = vec![FftComplex::new(0.0, 0.0); fft.get_inplace_scratch_len()];
        Self {
            planner,
            fft,
            window: Window::Hann.coefficients(size),
            buf: vec![FftComplex::new(0.0, 0.0); size],
            scratch,
        }
    }

    pub fn size(&self) -> usize {
        self.window.len()
    }

    /// Replan for a new transform length. No-op when the size is unchanged.
    pub fn resize(&mut self, size: usize) {
        let size = size.max(1);
        if size == self.size() {
            return;
        }
        self.fft = self.planner.plan_fft_forward(size);
        self.window = Window::Hann.coefficients(size);
        self.buf = vec![FftComplex::new(0.0, 0.0); size];
        self.scratch = vec![FftComplex::new(0.0, 0.0); self.fft.get_inplace_scratch_len()];
    }

    /// Transform `re`/`im` and write `size()` dB values into `out`.
    ///
    /// Short input is zero-padded, long input is truncated.
    pub fn magnitude_db(&mut self, re: &[f32], im: &[f32], out: &mut Vec<f32>) {
        let size = self.size();
        let take = re.len().min(im.len()).min(size);
        for (i, slot) in self.buf.iter_mut().enumerate() {
            *slot = if i < take {
                FftComplex::new(re[i] * self.window[i], im[i] * self.window[i])
            } else {
                FftComplex::new(0.0, 0.0)
            };
        }
        self.fft.process_with_scratch(&mut self.buf, &mut self.scratch);

        let half = size / 2;
        let scale = size as f32;
        out.clear();
        out.extend(self.buf[half..].iter().chain(self.buf[..half].iter()).map(|value| {
            let mag = value.norm() / scale;
            20.0 * mag.max(MAGNITUDE_FLOOR).log10()
        }));
    }
}
