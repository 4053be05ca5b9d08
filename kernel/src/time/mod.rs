//! Timer tick source constants and the alarm (sleep) queue.

pub mod alarm;

/// Timer interrupts per second. The once-per-second MLFQS recomputation keys
/// off this.
pub const TIMER_FREQ: i64 = 100;

/// Convert milliseconds to ticks, rounding down.
pub const fn ms_to_ticks(ms: i64) -> i64 {
    ms * TIMER_FREQ / 1000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ms_conversion_rounds_down() {
        assert_eq!(ms_to_ticks(1000), TIMER_FREQ);
        assert_eq!(ms_to_ticks(15), 1);
        assert_eq!(ms_to_ticks(9), 0);
    }
}
