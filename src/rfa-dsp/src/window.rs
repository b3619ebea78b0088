// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use std::f64::consts::PI;

/// Tapering windows used for FIR design and spectral analysis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Window {
    Blackman,
    Hann,
    /// Kaiser window with shape parameter `beta`.
    Kaiser(f64),
}

impl Window {
    /// Coefficient `n` of a window spanning `len` samples.
    pub fn value(self, n: usize, len: usize) -> f32 {
        if len <= 1 {
            return 1.0;
        }
        let m = (len - 1) as f64;
        let n = n as f64;
        match self {
            Window::Blackman => {
                (0.42 - 0.5 * (2.0 * PI * n / m).cos() + 0.08 * (4.0 * PI * n / m).cos()) as f32
            }
            Window::Hann => (0.5 * (1.0 - (2.0 * PI * n / m).cos())) as f32,
            Window::Kaiser(beta) => {
                let beta = beta.max(0.0);
                let inv_i0_beta = 1.0 / bessel_i0(beta);
                let t = 2.0 * n / m - 1.0;
                (bessel_i0(beta * (1.0 - t * t).max(0.0).sqrt()) * inv_i0_beta) as f32
            }
        }
    }

    pub fn coefficients(self, len: usize) -> Vec<f32> {
        (0..len).map(|n| self.value(n, len)).collect()
    }

    pub fn name(self) -> &'static str {
        match self {
            Window::Blackman => "Blackman",
            Window::Hann => "Hann",
            Window::Kaiser(_) => "Kaiser",
        }
    }
}

/// Zeroth-order modified Bessel function of the first kind (series form).
fn bessel_i0(x: f64) -> f64 {
    let half_x = x / 2.0;
    let mut sum = 1.0;
    let mut term = 1.0;
    let mut k = 1.0;
    loop {
        let ratio = half_x / k;
        term *= ratio * ratio;
        sum += term;
        if term < 1e-12 * sum {
            break;
        }
        k += 1.0;
    }
    sum
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_approx_eq(a: f32, b: f32, tol: f32, label: &str) {
        assert!(
            (a - b).abs() <= tol,
            "{}: expected {} ~ {} (tol {})",
            label,
            a,
            b,
            tol
        );
    }

    #[test]
    fn windows_are_symmetric() {
        for window in [Window::Blackman, Window::Hann, Window::Kaiser(7.0)] {
            let coeffs = window.coefficients(31);
            for i in 0..coeffs.len() / 2 {
                assert_approx_eq(
                    coeffs[i],
                    coeffs[coeffs.len() - 1 - i],
                    1e-6,
                    window.name(),
                );
            }
        }
    }

    #[test]
    fn windows_peak_at_centre() {
        for window in [Window::Blackman, Window::Hann, Window::Kaiser(7.0)] {
            assert_approx_eq(window.value(15, 31), 1.0, 1e-5, window.name());
        }
    }

    #[test]
    fn edges_taper() {
        assert_approx_eq(Window::Hann.value(0, 31), 0.0, 1e-6, "hann edge");
        assert_approx_eq(Window::Blackman.value(0, 31), 0.0, 1e-6, "blackman edge");
        let kaiser_edge = Window::Kaiser(7.0).value(0, 31);
        assert_approx_eq(kaiser_edge, (1.0 / bessel_i0(7.0)) as f32, 1e-6, "kaiser edge");
    }

    #[test]
    fn bessel_i0_known_values() {
        assert!((bessel_i0(0.0) - 1.0).abs() < 1e-12);
        assert!((bessel_i0(1.0) - 1.266_065_877_752_008).abs() < 1e-9);
    }

    #[test]
    fn single_tap_window_is_unity() {
        assert_eq!(Window::Blackman.coefficients(1), vec![1.0]);
    }
}
