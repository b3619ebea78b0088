// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Scrolling spectrum history shared between the FFT stage and renderers.
//!
//! One writer (the FFT processor) and any number of readers share a
//! [`WaterfallState`] behind a single `RwLock`. Rows are written whole under
//! the write lock, so a reader holding the read lock never sees a partially
//! written row.

use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

/// Floor value marking history pixels with no data.
pub const NO_DATA_DB: f32 = -9999.0;

pub type SharedWaterfall = Arc<RwLock<WaterfallState>>;

/// Scroll speed of the waterfall, which sets the history depth.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WaterfallSpeed {
    Slow,
    #[default]
    Normal,
    Fast,
}

impl WaterfallSpeed {
    /// Number of history rows kept for this speed.
    pub const fn history_rows(self) -> usize {
        match self {
            WaterfallSpeed::Slow => 500,
            WaterfallSpeed::Normal => 400,
            WaterfallSpeed::Fast => 300,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => WaterfallSpeed::Slow,
            2 => WaterfallSpeed::Fast,
            _ => WaterfallSpeed::Normal,
        }
    }
}

/// Ring buffer of magnitude rows plus the metadata of the newest row.
#[derive(Debug, Default)]
pub struct WaterfallState {
    rows: Vec<Vec<f32>>,
    dirty: Vec<bool>,
    write_index: usize,
    read_index: usize,
    frequency: Option<i64>,
    sample_rate: Option<u32>,
    frequency_or_rate_changed: bool,
    peak_hold: Option<Vec<f32>>,
}

impl WaterfallState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedWaterfall {
        Arc::new(RwLock::new(Self::new()))
    }

    /// Number of history rows currently allocated.
    pub fn depth(&self) -> usize {
        self.rows.len()
    }

    /// Bins per row (0 before the first row).
    pub fn width(&self) -> usize {
        self.rows.first().map(Vec::len).unwrap_or(0)
    }

    pub fn write_index(&self) -> usize {
        self.write_index
    }

    /// Slot holding the most recent complete row.
    pub fn read_index(&self) -> usize {
        self.read_index
    }

    pub fn frequency(&self) -> Option<i64> {
        self.frequency
    }

    pub fn sample_rate(&self) -> Option<u32> {
        self.sample_rate
    }

    /// Whether the newest row was computed at a different frequency or rate
    /// than the one before it.
    pub fn frequency_or_rate_changed(&self) -> bool {
        self.frequency_or_rate_changed
    }

    pub fn row(&self, index: usize) -> Option<&[f32]> {
        self.rows.get(index).map(Vec::as_slice)
    }

    pub fn latest_row(&self) -> Option<&[f32]> {
        self.row(self.read_index)
    }

    /// Rows ordered newest first.
    pub fn rows_newest_first(&self) -> impl Iterator<Item = &[f32]> {
        let depth = self.rows.len();
        let start = self.read_index;
        (0..depth).map(move |offset| self.rows[(start + offset) % depth].as_slice())
    }

    pub fn is_dirty(&self, index: usize) -> bool {
        self.dirty.get(index).copied().unwrap_or(false)
    }

    /// Called by a renderer once it has consumed a row.
    pub fn mark_clean(&mut self, index: usize) {
        if let Some(flag) = self.dirty.get_mut(index) {
            *flag = false;
        }
    }

    /// Per-bin maximum since the last frequency or rate change, when enabled.
    pub fn peak_hold(&self) -> Option<&[f32]> {
        self.peak_hold.as_deref()
    }

    /// Insert a new magnitude row.
    ///
    /// The bin density of `row` (bins per Hz of `sample_rate`) converts a
    /// centre-frequency change into a pixel shift of the history.
    pub fn push_row(
        &mut self,
        row: &[f32],
        frequency: i64,
        sample_rate: u32,
        depth: usize,
        peak_hold: bool,
    ) {
        let width = row.len();
        if width == 0 || depth == 0 {
            return;
        }
        let samples_per_hz = width as f32 / sample_rate.max(1) as f32;

        let frequency_diff = self.frequency.map(|last| last - frequency).unwrap_or(0);
        let rate_changed = self.sample_rate != Some(sample_rate);
        self.frequency_or_rate_changed = frequency_diff != 0 || rate_changed;
        self.frequency = Some(frequency);
        self.sample_rate = Some(sample_rate);

        if self.width() != width {
            self.rows = vec![vec![NO_DATA_DB; width]; depth];
            self.dirty = vec![true; depth];
            self.write_index = 0;
            self.read_index = 0;
        }
        if self.rows.len() != depth {
            self.resize_depth(depth, width);
        }

        if frequency_diff != 0 {
            let shift = (frequency_diff as f32 * samples_per_hz).round() as i64;
            self.shift_history(shift);
        } else if rate_changed {
            self.clear_history();
        }

        self.rows[self.write_index].copy_from_slice(row);
        self.dirty[self.write_index] = true;
        self.read_index = self.write_index;
        self.write_index = if self.write_index == 0 {
            self.rows.len() - 1
        } else {
            self.write_index - 1
        };

        self.update_peak_hold(row, peak_hold);
    }

    /// Reallocate to `depth` rows, oldest rows dropped first.
    fn resize_depth(&mut self, depth: usize, width: usize) {
        let old = std::mem::take(&mut self.rows);
        let old_depth = old.len();
        let start = self.write_index;
        let mut old: Vec<Option<Vec<f32>>> = old.into_iter().map(Some).collect();
        self.rows = (0..depth)
            .map(|i| {
                if i < old_depth {
                    old[(start + i) % old_depth]
                        .take()
                        .unwrap_or_else(|| vec![NO_DATA_DB; width])
                } else {
                    vec![NO_DATA_DB; width]
                }
            })
            .collect();
        self.dirty = vec![true; depth];
        self.write_index = 0;
        self.read_index = if old_depth > 1 && depth > 1 { 1 } else { 0 };
    }

    /// Shift every row by `shift` bins (negative = left), filling the
    /// vacated edge with [`NO_DATA_DB`].
    fn shift_history(&mut self, shift: i64) {
        let width = self.width();
        let magnitude = shift.unsigned_abs() as usize;
        if magnitude >= width {
            self.clear_history();
            return;
        }
        if magnitude > 0 {
            for row in &mut self.rows {
                if shift < 0 {
                    row.copy_within(magnitude.., 0);
                    row[width - magnitude..].fill(NO_DATA_DB);
                } else {
                    row.copy_within(..width - magnitude, magnitude);
                    row[..magnitude].fill(NO_DATA_DB);
                }
            }
        }
        self.dirty.fill(true);
    }

    fn clear_history(&mut self) {
        for row in &mut self.rows {
            row.fill(NO_DATA_DB);
        }
        self.dirty.fill(true);
    }

    fn update_peak_hold(&mut self, row: &[f32], enabled: bool) {
        if !enabled {
            self.peak_hold = None;
            return;
        }
        match self.peak_hold.as_mut() {
            Some(peaks) if peaks.len() == row.len() && !self.frequency_or_rate_changed => {
                for (peak, &value) in peaks.iter_mut().zip(row) {
                    *peak = peak.max(value);
                }
            }
            _ => self.peak_hold = Some(row.to_vec()),
        }
    }
}
