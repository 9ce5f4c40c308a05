//! Disk writer: a bounded ring file written in durable 4 MiB blocks.
//!
//! Blocks are written at the current offset and synced one by one. When the
//! next block would push the file past its quota the offset wraps to zero and
//! old data is overwritten in place. The file is truncated once when opened
//! and wraps only on whole-block boundaries, so every byte before the write
//! pointer comes from this run. With a quota that is not a multiple of the
//! block size the tail past the last full block is simply never written.

use std::fs::{File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::Path;

use tracing::debug;

use crate::config::MIB;
use crate::error::{Result, StressError};
use crate::shared::{SharedCounters, StopSignal};

pub const BLOCK_BYTES: usize = 4 * MIB as usize;

/// Destination of the disk worker's blocks.
pub trait BlockSink {
    /// Writes the whole block at the current offset.
    fn write_block(&mut self, block: &[u8]) -> io::Result<()>;
    /// Flushes and forces written data to stable storage.
    fn sync(&mut self) -> io::Result<()>;
    /// Moves the write offset back to the start.
    fn rewind(&mut self) -> io::Result<()>;
}

impl BlockSink for File {
    fn write_block(&mut self, block: &[u8]) -> io::Result<()> {
        self.write_all(block)?;
        self.flush()
    }

    fn sync(&mut self) -> io::Result<()> {
        self.sync_all()
    }

    fn rewind(&mut self) -> io::Result<()> {
        self.seek(SeekFrom::Start(0)).map(|_| ())
    }
}

/// Whether a write failed because the device (or quota) is full.
pub fn is_storage_exhausted(err: &io::Error) -> bool {
    matches!(err.raw_os_error(), Some(libc::ENOSPC) | Some(libc::EDQUOT))
}

/// What one call to [`DiskStressor::step`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// A block landed at `offset` of the ring file.
    Wrote { offset: u64, rewound: bool },
    /// The device is full; the worker is done for good.
    Exhausted,
}

pub struct DiskStressor<S: BlockSink> {
    sink: S,
    counters: SharedCounters,
    block: Vec<u8>,
    quota: u64,
    file_bytes: u64,
    rewinds: u64,
    exhausted: bool,
}

impl DiskStressor<File> {
    /// Creates (or reuses) the ring file at `path`.
    pub fn open(path: &Path, quota: u64, counters: SharedCounters) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        debug!(path = %path.display(), quota, "disk stress file opened");
        Ok(Self::new(file, quota, counters))
    }
}

impl<S: BlockSink> DiskStressor<S> {
    /// `quota` is raised to one block if smaller.
    pub fn new(sink: S, quota: u64, counters: SharedCounters) -> Self {
        Self {
            sink,
            counters,
            block: vec![b'x'; BLOCK_BYTES],
            quota: quota.max(BLOCK_BYTES as u64),
            file_bytes: 0,
            rewinds: 0,
            exhausted: false,
        }
    }

    /// Writes one block, wrapping the ring first if it would overflow.
    pub fn step(&mut self) -> Result<Step> {
        if self.exhausted {
            return Ok(Step::Exhausted);
        }
        let len = self.block.len() as u64;
        let mut rewound = false;
        if self.file_bytes + len > self.quota {
            self.wrap()?;
            rewound = true;
        }
        let offset = self.file_bytes;
        match self
            .sink
            .write_block(&self.block)
            .and_then(|_| self.sink.sync())
        {
            Ok(()) => {
                self.file_bytes += len;
                self.counters.add_bytes(len);
                Ok(Step::Wrote { offset, rewound })
            }
            Err(e) if is_storage_exhausted(&e) => {
                debug!("disk full after {} bytes: {}", self.counters.bytes_written(), e);
                self.exhausted = true;
                self.counters.set_disk_error();
                Ok(Step::Exhausted)
            }
            Err(e) => Err(StressError::DiskWrite(e)),
        }
    }

    fn wrap(&mut self) -> Result<()> {
        let outcome = self.sink.sync().and_then(|_| self.sink.rewind());
        match outcome {
            Ok(()) => {
                self.file_bytes = 0;
                self.rewinds += 1;
                Ok(())
            }
            Err(e) => Err(StressError::DiskWrite(e)),
        }
    }

    /// Writes blocks until `stop` is set or the device fills up.
    pub fn run(&mut self, stop: &StopSignal) -> Result<()> {
        while !stop.is_set() {
            if self.step()? == Step::Exhausted {
                break;
            }
        }
        Ok(())
    }

    pub fn rewinds(&self) -> u64 {
        self.rewinds
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }
}

/// Worker entry point: opens the ring file under the working directory and
/// writes until stopped or out of space.
pub fn run(stop: &StopSignal, counters: SharedCounters, path: &Path, quota: u64) -> Result<()> {
    let mut stressor = DiskStressor::open(path, quota, counters)?;
    stressor.run(stop)?;
    debug!(rewinds = stressor.rewinds(), "disk worker finished");
    Ok(())
}
