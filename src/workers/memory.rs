//! Memory hog: commits the target amount of RAM and holds it.

use std::thread;
use std::time::Duration;

use tracing::debug;

use crate::config::MIB;
use crate::shared::StopSignal;

pub const CHUNK_BYTES: usize = 64 * MIB as usize;
const PAGE: usize = 4096;
const IDLE: Duration = Duration::from_millis(200);

#[derive(Debug)]
pub struct MemoryHog {
    target_bytes: u64,
    chunks: Vec<Vec<u8>>,
    allocated: u64,
}

impl MemoryHog {
    pub fn new(target_mb: u64) -> Self {
        Self {
            target_bytes: target_mb.saturating_mul(MIB),
            chunks: Vec::new(),
            allocated: 0,
        }
    }

    /// Allocates and touches chunks until the target is reached or `stop` is
    /// set. The last chunk is trimmed to the remainder.
    pub fn fill(&mut self, stop: &StopSignal) {
        while self.allocated < self.target_bytes && !stop.is_set() {
            let size = (self.target_bytes - self.allocated).min(CHUNK_BYTES as u64) as usize;
            let mut chunk = vec![0u8; size];
            // One write per page forces the kernel to back it.
            for i in (0..size).step_by(PAGE) {
                chunk[i] = 1;
            }
            self.chunks.push(chunk);
            self.allocated += size as u64;
        }
        debug!(
            allocated_mb = self.allocated / MIB,
            chunks = self.chunks.len(),
            "memory target reached"
        );
    }

    pub fn allocated_bytes(&self) -> u64 {
        self.allocated
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }
}

/// Fills to `target_mb`, then idles holding every chunk until `stop`.
pub fn run(stop: &StopSignal, target_mb: u64) -> u64 {
    let mut hog = MemoryHog::new(target_mb);
    hog.fill(stop);
    while !stop.is_set() {
        thread::sleep(IDLE);
    }
    let allocated = hog.allocated_bytes();
    std::hint::black_box(hog);
    allocated
}
