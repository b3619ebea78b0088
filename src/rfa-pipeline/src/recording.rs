// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Raw capture recording driven by the scheduler.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use rfa_core::{PipelineError, RecordingStopReason};
use tracing::{error, info};

/// Packets between two size reports.
pub const SIZE_REPORT_INTERVAL: u64 = 100;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordingOptions {
    pub path: PathBuf,
    /// Skip packets while the (debounced) squelch is closed.
    pub only_when_squelch_satisfied: bool,
    pub max_duration: Option<Duration>,
    pub max_size_bytes: Option<u64>,
}

/// What the scheduler has to do after feeding a packet to the recorder.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecordingStep {
    /// Size to report upward, if a report is due.
    pub report: Option<u64>,
    /// The recording must be closed for this reason.
    pub stop: Option<RecordingStopReason>,
}

/// An open recording. Bytes are written exactly as the source delivered them.
pub struct Recorder {
    sink: BufWriter<Box<dyn Write + Send>>,
    label: String,
    only_when_squelch_satisfied: bool,
    max_duration: Option<Duration>,
    max_size_bytes: Option<u64>,
    written: u64,
    packets: u64,
    started: Instant,
    stop_requested: bool,
}

impl Recorder {
    /// Create (or truncate) the file named in `options`.
    pub fn create(options: &RecordingOptions) -> Result<Self, PipelineError> {
        let file = File::create(&options.path)?;
        info!("recording to {}", options.path.display());
        Ok(Self::from_writer(
            Box::new(file),
            &options.path.display().to_string(),
            options,
        ))
    }

    /// Record into an arbitrary writer; `options.path` is ignored.
    pub fn from_writer(writer: Box<dyn Write + Send>, label: &str, options: &RecordingOptions) -> Self {
        Self {
            sink: BufWriter::new(writer),
            label: label.to_string(),
            only_when_squelch_satisfied: options.only_when_squelch_satisfied,
            max_duration: options.max_duration,
            max_size_bytes: options.max_size_bytes,
            written: 0,
            packets: 0,
            started: Instant::now(),
            stop_requested: false,
        }
    }

    pub fn path_label(&self) -> &str {
        &self.label
    }

    pub fn bytes_written(&self) -> u64 {
        self.written
    }

    /// Close at the next packet boundary.
    pub fn request_stop(&mut self) {
        self.stop_requested = true;
    }

    /// Feed one raw packet. `squelch_open` is the debounced squelch state.
    pub fn on_packet(&mut self, raw: &[u8], squelch_open: bool) -> RecordingStep {
        let mut step = RecordingStep::default();

        if squelch_open || !self.only_when_squelch_satisfied {
            match self.sink.write_all(raw) {
                Ok(()) => self.written += raw.len() as u64,
                Err(e) => {
                    error!("{}: write failed: {}", self.label, e);
                    step.stop = Some(RecordingStopReason::WriteFailed);
                }
            }
        }

        if self.packets % SIZE_REPORT_INTERVAL == 0 {
            step.report = Some(self.written);
        }
        self.packets += 1;

        if step.stop.is_none() {
            step.stop = self.limit_reached();
        }
        step
    }

    fn limit_reached(&self) -> Option<RecordingStopReason> {
        if self.stop_requested {
            return Some(RecordingStopReason::Requested);
        }
        if self.max_duration.is_some_and(|max| max <= self.started.elapsed()) {
            info!("{}: maximum recording time reached", self.label);
            return Some(RecordingStopReason::MaxDuration);
        }
        if self.max_size_bytes.is_some_and(|max| max <= self.written) {
            info!("{}: maximum recording size reached", self.label);
            return Some(RecordingStopReason::MaxSize);
        }
        None
    }

    /// Flush and close. Returns the number of bytes written.
    pub fn finish(mut self) -> u64 {
        if let Err(e) = self.flush() {
            error!("{}: closing failed: {}", self.label, e);
        }
        info!("{}: recording stopped after {} bytes", self.label, self.written);
        self.written
    }

    fn flush(&mut self) -> io::Result<()> {
        self.sink.flush()
    }
}

/// `rfa-<UTC yyyymmdd-HHMMSS>-<freq>Hz-<rate>Sps.<ext>` inside `directory`.
pub fn recording_file_name(
    directory: &Path,
    timestamp: &str,
    frequency: i64,
    sample_rate: u32,
    extension: &str,
) -> PathBuf {
    directory.join(format!(
        "rfa-{}-{}Hz-{}Sps.{}",
        timestamp, frequency, sample_rate, extension
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    struct FailingWriter;

    impl Write for FailingWriter {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::Other, "disk full"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Err(io::Error::new(io::ErrorKind::Other, "disk full"))
        }
    }

    fn recorder(options: RecordingOptions) -> (Recorder, SharedBuf) {
        let buf = SharedBuf::default();
        (Recorder::from_writer(Box::new(buf.clone()), "mem", &options), buf)
    }

    #[test]
    fn bytes_are_written_verbatim() {
        let (mut rec, buf) = recorder(RecordingOptions::default());
        rec.on_packet(&[1, 2, 3], false);
        rec.on_packet(&[4], true);
        assert_eq!(rec.finish(), 4);
        assert_eq!(*buf.0.lock().unwrap(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn squelch_gates_writes_when_requested() {
        let (mut rec, _buf) = recorder(RecordingOptions {
            only_when_squelch_satisfied: true,
            ..RecordingOptions::default()
        });
        rec.on_packet(&[0; 8], false);
        rec.on_packet(&[0; 8], true);
        assert_eq!(rec.bytes_written(), 8);
    }

    #[test]
    fn size_is_reported_every_hundred_packets() {
        let (mut rec, _buf) = recorder(RecordingOptions::default());
        let reports: Vec<(usize, u64)> = (0..250)
            .filter_map(|i| rec.on_packet(&[0; 2], true).report.map(|b| (i, b)))
            .collect();
        assert_eq!(reports, vec![(0, 2), (100, 202), (200, 402)]);
    }

    #[test]
    fn max_size_stops_at_first_boundary_reaching_it() {
        let (mut rec, _buf) = recorder(RecordingOptions {
            max_size_bytes: Some(1_000),
            ..RecordingOptions::default()
        });
        let mut stop = None;
        let mut packets = 0;
        while stop.is_none() {
            stop = rec.on_packet(&[0; 256], true).stop;
            packets += 1;
        }
        assert_eq!(packets, 4);
        assert_eq!(stop, Some(RecordingStopReason::MaxSize));
        assert_eq!(rec.finish(), 1_024);
    }

    #[test]
    fn zero_duration_stops_immediately() {
        let (mut rec, _buf) = recorder(RecordingOptions {
            max_duration: Some(Duration::ZERO),
            ..RecordingOptions::default()
        });
        assert_eq!(
            rec.on_packet(&[0; 4], true).stop,
            Some(RecordingStopReason::MaxDuration)
        );
    }

    #[test]
    fn requested_stop_applies_after_the_packet() {
        let (mut rec, _buf) = recorder(RecordingOptions::default());
        rec.request_stop();
        let step = rec.on_packet(&[0; 4], true);
        assert_eq!(step.stop, Some(RecordingStopReason::Requested));
        assert_eq!(rec.bytes_written(), 4);
    }

    #[test]
    fn write_failure_stops_recording() {
        let mut rec = Recorder::from_writer(
            Box::new(FailingWriter),
            "failing",
            &RecordingOptions::default(),
        );
        // BufWriter only hits the writer once its buffer overflows.
        let big = vec![0u8; 64 * 1024];
        let step = rec.on_packet(&big, true);
        assert_eq!(step.stop, Some(RecordingStopReason::WriteFailed));
        assert_eq!(rec.finish(), 0);
    }

    #[test]
    fn file_name_carries_metadata() {
        let name = recording_file_name(
            Path::new("/tmp/rec"),
            "20260101-120000",
            145_500_000,
            2_000_000,
            "s16le",
        );
        assert_eq!(
            name,
            PathBuf::from("/tmp/rec/rfa-20260101-120000-145500000Hz-2000000Sps.s16le")
        );
    }
}
