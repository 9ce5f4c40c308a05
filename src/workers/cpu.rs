//! CPU busy loop.

use crate::shared::StopSignal;

/// Steps between two stop checks.
const BATCH: u32 = 4096;

/// One LCG step masked to 32 bits. No memory traffic, no branches.
#[inline(always)]
pub fn step(x: u32) -> u32 {
    x.wrapping_mul(1_664_525).wrapping_add(1_013_904_223)
}

/// Spins until `stop` is set. Latency is one batch of steps.
pub fn run(stop: &StopSignal) -> u64 {
    let mut x = 0u32;
    let mut batches = 0u64;
    while !stop.is_set() {
        for _ in 0..BATCH {
            x = step(x);
        }
        batches += 1;
    }
    std::hint::black_box(x);
    batches
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared;
    use std::thread;
    use std::time::{Duration, Instant};

    #[test]
    fn step_matches_numerical_recipes_lcg() {
        assert_eq!(step(0), 1_013_904_223);
        assert_eq!(step(1), 1_015_568_748);
        let wide = (u64::from(u32::MAX) * 1_664_525 + 1_013_904_223) & 0xFFFF_FFFF;
        assert_eq!(u64::from(step(u32::MAX)), wide);
    }

    #[test]
    fn returns_promptly_after_stop() {
        let (_, stop) = shared::create().unwrap();
        let handle = {
            let stop = stop.clone();
            thread::spawn(move || run(&stop))
        };
        thread::sleep(Duration::from_millis(50));
        let t = Instant::now();
        stop.set();
        let batches = handle.join().unwrap();
        assert!(batches > 0);
        assert!(t.elapsed() < Duration::from_millis(500));
    }
}
