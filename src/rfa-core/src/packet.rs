// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Fixed-capacity complex sample buffer shared by every pipeline edge.

/// A block of I/Q samples with a fixed backing capacity.
///
/// The in-phase and quadrature components live in two parallel arrays.
/// `len() <= capacity()` always holds; the capacity never changes after
/// construction. Stages that need a larger buffer discard the packet and
/// allocate a new one (see [`SamplePacket::with_min_capacity`]).
#[derive(Debug, Clone, PartialEq)]
pub struct SamplePacket {
    re: Vec<f32>,
    im: Vec<f32>,
    size: usize,
    sample_rate: u32,
    frequency: i64,
}

impl SamplePacket {
    pub fn new(capacity: usize) -> Self {
        Self {
            re: vec![0.0; capacity],
            im: vec![0.0; capacity],
            size: 0,
            sample_rate: 0,
            frequency: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.re.len()
    }

    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn is_full(&self) -> bool {
        self.size == self.capacity()
    }

    /// Free slots left before the packet is full.
    pub fn remaining(&self) -> usize {
        self.capacity() - self.size
    }

    /// Set the logical size, clamped to the capacity.
    pub fn set_len(&mut self, size: usize) {
        self.size = size.min(self.capacity());
    }

    /// Mark the packet as empty. Sample memory is left untouched.
    pub fn clear(&mut self) {
        self.size = 0;
    }

    /// Valid in-phase samples (`..len()`).
    pub fn re(&self) -> &[f32] {
        &self.re[..self.size]
    }

    /// Valid quadrature samples (`..len()`).
    pub fn im(&self) -> &[f32] {
        &self.im[..self.size]
    }

    /// Mutable access to the whole backing storage (`..capacity()`).
    pub fn buffers_mut(&mut self) -> (&mut [f32], &mut [f32]) {
        (&mut self.re, &mut self.im)
    }

    /// Mutable access to the valid in-phase samples.
    pub fn re_mut(&mut self) -> &mut [f32] {
        &mut self.re[..self.size]
    }

    /// Append one complex sample. Returns `false` when the packet is full.
    pub fn push(&mut self, re: f32, im: f32) -> bool {
        if self.is_full() {
            return false;
        }
        self.re[self.size] = re;
        self.im[self.size] = im;
        self.size += 1;
        true
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn set_sample_rate(&mut self, sample_rate: u32) {
        self.sample_rate = sample_rate;
    }

    /// Absolute centre frequency in Hz.
    pub fn frequency(&self) -> i64 {
        self.frequency
    }

    pub fn set_frequency(&mut self, frequency: i64) {
        self.frequency = frequency;
    }

    /// Return `self` if it can hold `needed` samples, otherwise an empty
    /// replacement of exactly `needed` capacity carrying the same metadata.
    pub fn with_min_capacity(self, needed: usize) -> Self {
        if self.capacity() >= needed {
            return self;
        }
        let mut packet = Self::new(needed);
        packet.sample_rate = self.sample_rate;
        packet.frequency = self.frequency;
        packet
    }

    /// Nominal wall-clock duration of `len()` samples, in nanoseconds.
    pub fn duration_ns(&self) -> f32 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.size as f32 * 1_000_000_000.0 / self.sample_rate as f32
    }
}

impl Default for SamplePacket {
    fn default() -> Self {
        Self::new(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_packet_is_empty() {
        let packet = SamplePacket::new(16);
        assert_eq!(packet.capacity(), 16);
        assert_eq!(packet.len(), 0);
        assert!(packet.is_empty());
        assert!(packet.re().is_empty());
    }

    #[test]
    fn set_len_is_clamped_to_capacity() {
        let mut packet = SamplePacket::new(8);
        packet.set_len(100);
        assert_eq!(packet.len(), 8);
        assert!(packet.is_full());
        assert_eq!(packet.remaining(), 0);
    }

    #[test]
    fn push_stops_at_capacity() {
        let mut packet = SamplePacket::new(2);
        assert!(packet.push(1.0, -1.0));
        assert!(packet.push(2.0, -2.0));
        assert!(!packet.push(3.0, -3.0));
        assert_eq!(packet.re(), &[1.0, 2.0]);
        assert_eq!(packet.im(), &[-1.0, -2.0]);
    }

    #[test]
    fn with_min_capacity_keeps_or_replaces() {
        let mut packet = SamplePacket::new(4);
        packet.set_sample_rate(96_000);
        packet.set_frequency(100_000_000);
        let same = packet.with_min_capacity(4);
        assert_eq!(same.capacity(), 4);

        let bigger = same.with_min_capacity(10);
        assert_eq!(bigger.capacity(), 10);
        assert!(bigger.is_empty());
        assert_eq!(bigger.sample_rate(), 96_000);
        assert_eq!(bigger.frequency(), 100_000_000);
    }

    #[test]
    fn duration_follows_rate() {
        let mut packet = SamplePacket::new(1000);
        packet.set_len(1000);
        packet.set_sample_rate(1_000_000);
        assert!((packet.duration_ns() - 1_000_000.0).abs() < 1.0);
        packet.set_sample_rate(0);
        assert_eq!(packet.duration_ns(), 0.0);
    }
}
