// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Replay of a raw I/Q capture file.

use std::fs::File;
use std::io::{BufReader, ErrorKind, Read, Seek, SeekFrom};
use std::path::PathBuf;
use std::time::Duration;

use rfa_core::{PipelineError, SamplePacket};
use tracing::{debug, info};

use super::{IqConverter, IqSource, Pacer, RawPool, SampleFormat};

#[derive(Debug, Clone)]
pub struct FileSourceOptions {
    pub path: PathBuf,
    pub format: SampleFormat,
    pub sample_rate: u32,
    /// Centre frequency the capture was taken at.
    pub frequency: i64,
    /// Bytes per raw packet; rounded down to whole samples.
    pub packet_size: usize,
    /// Rewind at end of file instead of reporting exhaustion.
    pub repeat: bool,
    /// Deliver packets no faster than the capture's sample rate.
    pub throttle: bool,
}

pub struct FileIqSource {
    options: FileSourceOptions,
    reader: Option<BufReader<File>>,
    converter: IqConverter,
    pool: RawPool,
    pacer: Pacer,
}

impl FileIqSource {
    pub fn new(mut options: FileSourceOptions) -> Result<Self, PipelineError> {
        let bps = options.format.bytes_per_sample();
        options.packet_size -= options.packet_size % bps;
        if options.packet_size == 0 {
            return Err(PipelineError::InvalidConfig(format!(
                "packet size must hold at least one {} sample",
                options.format
            )));
        }
        if options.sample_rate == 0 {
            return Err(PipelineError::InvalidConfig(
                "sample rate must be > 0".to_string(),
            ));
        }
        Ok(Self {
            converter: IqConverter::new(options.format, options.sample_rate, options.frequency),
            pool: RawPool::new(options.packet_size),
            pacer: Pacer::new(options.sample_rate),
            reader: None,
            options,
        })
    }

    pub fn options(&self) -> &FileSourceOptions {
        &self.options
    }

    /// Read up to one packet, rewinding once at end of file when looping.
    fn read_packet(&mut self, buf: &mut Vec<u8>) -> Result<usize, PipelineError> {
        let packet_size = self.options.packet_size;
        let repeat = self.options.repeat;
        let path = self.options.path.display().to_string();
        let Some(reader) = self.reader.as_mut() else {
            return Err(PipelineError::SourceIo(format!("{}: not sampling", path)));
        };

        buf.resize(packet_size, 0);
        let mut filled = 0;
        let mut rewound = false;
        while filled < packet_size {
            match reader.read(&mut buf[filled..]) {
                Ok(0) if repeat && !rewound => {
                    reader
                        .seek(SeekFrom::Start(0))
                        .map_err(|e| PipelineError::SourceIo(format!("{}: {}", path, e)))?;
                    rewound = true;
                    debug!("{}: rewinding", path);
                }
                Ok(0) => break,
                Ok(n) => {
                    filled += n;
                    rewound = false;
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(PipelineError::SourceIo(format!("{}: {}", path, e))),
            }
        }
        filled -= filled % self.options.format.bytes_per_sample();
        buf.truncate(filled);
        Ok(filled)
    }
}

impl IqSource for FileIqSource {
    fn start_sampling(&mut self) -> Result<(), PipelineError> {
        let file = File::open(&self.options.path).map_err(|e| {
            PipelineError::SourceIo(format!("{}: {}", self.options.path.display(), e))
        })?;
        info!(
            "replaying {} ({}, {} Sps, {} Hz)",
            self.options.path.display(),
            self.options.format,
            self.options.sample_rate,
            self.options.frequency
        );
        self.reader = Some(BufReader::new(file));
        self.pacer.reset();
        Ok(())
    }

    fn stop_sampling(&mut self) {
        if self.reader.take().is_some() {
            info!("stopped replaying {}", self.options.path.display());
        }
    }

    fn get_packet(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>, PipelineError> {
        let mut buf = self.pool.take();
        let len = match self.read_packet(&mut buf) {
            Ok(len) => len,
            Err(e) => {
                self.pool.give(buf);
                return Err(e);
            }
        };
        if len == 0 {
            self.pool.give(buf);
            return Ok(None);
        }
        if self.options.throttle {
            self.pacer.wait(len / self.options.format.bytes_per_sample(), timeout);
        }
        Ok(Some(buf))
    }

    fn return_packet(&mut self, packet: Vec<u8>) {
        self.pool.give(packet);
    }

    fn fill_into(&mut self, raw: &[u8], dest: &mut SamplePacket) -> usize {
        self.converter.fill(raw, dest)
    }

    fn mix_into(&mut self, raw: &[u8], dest: &mut SamplePacket, channel_frequency: i64) -> usize {
        self.converter.mix(raw, dest, channel_frequency)
    }

    fn sample_rate(&self) -> u32 {
        self.options.sample_rate
    }

    fn frequency(&self) -> i64 {
        self.options.frequency
    }

    fn packet_size(&self) -> usize {
        self.options.packet_size
    }

    fn bytes_per_sample(&self) -> usize {
        self.options.format.bytes_per_sample()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn capture(tag: &str, bytes: &[u8]) -> PathBuf {
        let path = std::env::temp_dir().join(format!(
            "rfa-file-source-{}-{}.raw",
            tag,
            std::process::id()
        ));
        std::fs::write(&path, bytes).unwrap();
        path
    }

    fn options(path: PathBuf, packet_size: usize, repeat: bool) -> FileSourceOptions {
        FileSourceOptions {
            path,
            format: SampleFormat::U8,
            sample_rate: 1_000_000,
            frequency: 433_920_000,
            packet_size,
            repeat,
            throttle: false,
        }
    }

    #[test]
    fn packets_are_read_until_end_of_file() {
        let path = capture("eof", &[1u8; 10]);
        let mut source = FileIqSource::new(options(path.clone(), 4, false)).unwrap();
        source.start_sampling().unwrap();
        let timeout = Duration::from_millis(10);

        let mut sizes = Vec::new();
        while let Some(packet) = source.get_packet(timeout).unwrap() {
            sizes.push(packet.len());
            source.return_packet(packet);
        }
        assert_eq!(sizes, vec![4, 4, 2]);
        assert!(source.get_packet(timeout).unwrap().is_none());
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn repeat_wraps_around() {
        let path = capture("repeat", &[1, 2, 3, 4, 5, 6]);
        let mut source = FileIqSource::new(options(path.clone(), 4, true)).unwrap();
        source.start_sampling().unwrap();
        let timeout = Duration::from_millis(10);
        let first = source.get_packet(timeout).unwrap().unwrap();
        let second = source.get_packet(timeout).unwrap().unwrap();
        assert_eq!(first, vec![1, 2, 3, 4]);
        assert_eq!(second, vec![5, 6, 1, 2]);
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn missing_file_fails_to_start() {
        let mut source =
            FileIqSource::new(options(PathBuf::from("/nonexistent/capture.raw"), 4, false))
                .unwrap();
        assert!(matches!(
            source.start_sampling(),
            Err(PipelineError::SourceIo(_))
        ));
    }

    #[test]
    fn get_packet_before_start_is_an_error() {
        let path = capture("unstarted", &[0u8; 4]);
        let mut source = FileIqSource::new(options(path.clone(), 4, false)).unwrap();
        assert!(source.get_packet(Duration::from_millis(1)).is_err());
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn packet_size_is_rounded_to_whole_samples() {
        let mut opts = options(PathBuf::from("unused"), 7, false);
        opts.format = SampleFormat::S16Le;
        let source = FileIqSource::new(opts).unwrap();
        assert_eq!(source.packet_size(), 4);
        assert_eq!(source.samples_per_packet(), 1);

        let mut opts = options(PathBuf::from("unused"), 3, false);
        opts.format = SampleFormat::S16Le;
        assert!(FileIqSource::new(opts).is_err());
    }

    #[test]
    fn converter_reports_capture_metadata() {
        let path = capture("meta", &[128, 128, 255, 0]);
        let mut source = FileIqSource::new(options(path.clone(), 4, false)).unwrap();
        source.start_sampling().unwrap();
        let raw = source.get_packet(Duration::from_millis(1)).unwrap().unwrap();
        let mut packet = SamplePacket::new(8);
        assert_eq!(source.fill_into(&raw, &mut packet), 2);
        assert_eq!(packet.frequency(), 433_920_000);
        assert_eq!(packet.sample_rate(), 1_000_000);
        let _ = std::fs::remove_file(path);
    }
}
