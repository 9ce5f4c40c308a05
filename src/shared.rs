//! Cross-process state shared between the controller, the dashboard and the
//! forked worker units.
//!
//! The region is an anonymous `MAP_SHARED` mapping created before any worker
//! is forked, so every child sees the same physical page. Each field is its
//! own atomic: `bytes_written` only grows through `fetch_add`, and both
//! `disk_error` and `stop` are one-way latches.

use std::num::NonZeroUsize;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use nix::sys::mman::{mmap_anonymous, munmap, MapFlags, ProtFlags};

use crate::error::{Result, StressError};

#[repr(C)]
struct SharedBlock {
    stop: AtomicBool,
    disk_error: AtomicBool,
    bytes_written: AtomicU64,
}

struct SharedRegion {
    block: NonNull<SharedBlock>,
    len: usize,
}

// The block only holds atomics and the mapping lives until the last handle
// is dropped.
unsafe impl Send for SharedRegion {}
unsafe impl Sync for SharedRegion {}

impl SharedRegion {
    fn map() -> Result<Self> {
        let len = std::mem::size_of::<SharedBlock>();
        let length = NonZeroUsize::new(len)
            .ok_or_else(|| StressError::SharedMemory("empty shared block".to_string()))?;
        // SAFETY: fresh anonymous mapping, no existing memory is aliased.
        let ptr = unsafe {
            mmap_anonymous(
                None,
                length,
                ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                MapFlags::MAP_SHARED,
            )
        }
        .map_err(|e| StressError::SharedMemory(format!("mmap failed: {}", e)))?;

        let block = ptr.cast::<SharedBlock>();
        // SAFETY: the mapping is page aligned, writable and large enough.
        unsafe {
            block.as_ptr().write(SharedBlock {
                stop: AtomicBool::new(false),
                disk_error: AtomicBool::new(false),
                bytes_written: AtomicU64::new(0),
            });
        }
        Ok(Self { block, len })
    }

    fn block(&self) -> &SharedBlock {
        // SAFETY: initialised in `map`, unmapped only in `drop`.
        unsafe { self.block.as_ref() }
    }
}

impl Drop for SharedRegion {
    fn drop(&mut self) {
        // SAFETY: no handle outlives the region (they all hold the Arc).
        if let Err(e) = unsafe { munmap(self.block.cast(), self.len) } {
            tracing::warn!("munmap of shared region failed: {}", e);
        }
    }
}

/// Creates the shared region and hands out both views of it.
pub fn create() -> Result<(SharedCounters, StopSignal)> {
    let region = Arc::new(SharedRegion::map()?);
    Ok((
        SharedCounters {
            region: Arc::clone(&region),
        },
        StopSignal { region },
    ))
}

/// Byte counter and exhaustion flag written by the disk worker.
#[derive(Clone)]
pub struct SharedCounters {
    region: Arc<SharedRegion>,
}

impl SharedCounters {
    pub fn add_bytes(&self, n: u64) {
        self.region
            .block()
            .bytes_written
            .fetch_add(n, Ordering::AcqRel);
    }

    pub fn bytes_written(&self) -> u64 {
        self.region.block().bytes_written.load(Ordering::Acquire)
    }

    /// Latches the exhaustion flag; true if this call flipped it.
    pub fn set_disk_error(&self) -> bool {
        !self.region.block().disk_error.swap(true, Ordering::AcqRel)
    }

    pub fn disk_error(&self) -> bool {
        self.region.block().disk_error.load(Ordering::Acquire)
    }
}

/// Broadcast cancellation. Set once, never reset.
#[derive(Clone)]
pub struct StopSignal {
    region: Arc<SharedRegion>,
}

impl StopSignal {
    /// Safe to call from a signal handler: a single atomic swap.
    pub fn set(&self) -> bool {
        !self.region.block().stop.swap(true, Ordering::AcqRel)
    }

    pub fn is_set(&self) -> bool {
        self.region.block().stop.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn stop_latches_once() {
        let (_, stop) = create().unwrap();
        assert!(!stop.is_set());
        assert!(stop.set());
        assert!(!stop.set());
        assert!(stop.is_set());
    }

    #[test]
    fn disk_error_latches_once() {
        let (counters, _) = create().unwrap();
        assert!(!counters.disk_error());
        assert!(counters.set_disk_error());
        assert!(!counters.set_disk_error());
        assert!(counters.disk_error());
    }

    #[test]
    fn bytes_written_is_non_decreasing_under_concurrent_reads() {
        let (counters, stop) = create().unwrap();
        let writer = {
            let counters = counters.clone();
            thread::spawn(move || {
                for _ in 0..10_000 {
                    counters.add_bytes(4096);
                }
            })
        };
        let mut last = 0;
        while !writer.is_finished() {
            let now = counters.bytes_written();
            assert!(now >= last);
            last = now;
        }
        writer.join().unwrap();
        assert_eq!(counters.bytes_written(), 10_000 * 4096);
        assert!(!stop.is_set());
    }

    #[test]
    fn region_is_shared_with_forked_child() {
        use nix::sys::wait::{waitpid, WaitStatus};
        use nix::unistd::{fork, ForkResult};

        let (counters, stop) = create().unwrap();
        // SAFETY: the child only touches atomics and exits immediately.
        match unsafe { fork() }.unwrap() {
            ForkResult::Child => {
                counters.add_bytes(42);
                counters.set_disk_error();
                stop.set();
                unsafe { libc::_exit(0) };
            }
            ForkResult::Parent { child } => {
                let status = waitpid(child, None).unwrap();
                assert_eq!(status, WaitStatus::Exited(child, 0));
                assert_eq!(counters.bytes_written(), 42);
                assert!(counters.disk_error());
                assert!(stop.is_set());
            }
        }
    }
}
