//! Lock-free float accumulation for cross-tile gradient writes.
//!
//! A Gaussian can overlap several tiles, and tiles run as independent Rayon
//! tasks, so two tasks can legitimately want to add into the same
//! `grad_points`/`grad_features` slot at once. `f32` has no native atomic add,
//! so this does the standard compare-and-swap-on-bits loop (same idiom as any
//! atomic float accumulator: reinterpret the bits as `AtomicU32`, retry the
//! add until the compare-exchange wins).

use std::sync::atomic::{AtomicU32, Ordering};

/// Reinterprets `slice` as a slice of `AtomicU32`, one per `f32` element.
///
/// SAFETY: `f32` and `u32` share size and alignment, and `AtomicU32` has the
/// same in-memory representation as `u32`. The `&mut` borrow of `slice` for
/// the lifetime of the returned reference guarantees no non-atomic access to
/// the same memory happens concurrently; all subsequent access goes through
/// the atomic operations below.
pub fn as_atomic_f32_slice(slice: &mut [f32]) -> &[AtomicU32] {
    unsafe { std::slice::from_raw_parts(slice.as_ptr() as *const AtomicU32, slice.len()) }
}

/// Atomically adds `value` into `target`, retrying until the compare-exchange
/// wins. Uses `Ordering::Relaxed`: callers only need the final sum to be
/// correct, not any particular interleaving to be observable.
pub fn atomic_add_f32(target: &AtomicU32, value: f32) {
    let mut current = target.load(Ordering::Relaxed);
    loop {
        let summed = f32::from_bits(current) + value;
        match target.compare_exchange_weak(
            current,
            summed.to_bits(),
            Ordering::Relaxed,
            Ordering::Relaxed,
        ) {
            Ok(_) => break,
            Err(observed) => current = observed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rayon::prelude::*;

    #[test]
    fn concurrent_adds_sum_correctly() {
        let mut buf = vec![0.0f32];
        let atomics = as_atomic_f32_slice(&mut buf);
        (0..10_000).into_par_iter().for_each(|_| {
            atomic_add_f32(&atomics[0], 1.0);
        });
        assert_eq!(buf[0], 10_000.0);
    }
}
