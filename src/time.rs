//! Monotonic nanosecond clock.

/// Nanoseconds since an arbitrary epoch, from `CLOCK_MONOTONIC`.
///
/// Grounded directly on the reference implementation's `get_time_ns`, which
/// reads the same clock for vruntime accounting and deadline comparisons.
pub fn now_ns() -> u64 {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    // SAFETY: `ts` is a valid out-pointer for clock_gettime.
    let rc = unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts) };
    debug_assert_eq!(rc, 0, "clock_gettime(CLOCK_MONOTONIC) failed");
    ts.tv_sec as u64 * 1_000_000_000 + ts.tv_nsec as u64
}

/// Linux-style nice-to-weight table (nice 0 -> 1024, each step scales by ~1.25).
///
/// Ported verbatim from the reference implementation's `nice_to_weight`.
const NICE_TO_WEIGHT: [u32; 40] = [
    88761, 71755, 56483, 46273, 36291, 29154, 23254, 18705, 14949, 11916, 9548, 7620, 6100, 4904,
    3906, 3121, 2501, 1991, 1586, 1277, 1024, 820, 655, 526, 423, 335, 272, 215, 172, 137, 110,
    87, 70, 56, 45, 36, 29, 23, 18, 15,
];

/// Fair-share weight for a given nice value, clamped to [-20, 19].
pub fn nice_to_weight(nice: i32) -> u32 {
    let clamped = nice.clamp(-20, 19);
    NICE_TO_WEIGHT[(clamped + 20) as usize]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nice_zero_is_unit_weight() {
        assert_eq!(nice_to_weight(0), 1024);
    }

    #[test]
    fn clock_is_nondecreasing() {
        let a = now_ns();
        let b = now_ns();
        assert!(b >= a);
    }
}
