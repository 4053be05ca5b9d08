//! MLFQS - Multi-level feedback queue scheduler bookkeeping
//!
//! The alternate boot-time policy: priorities are not set by threads but
//! derived once per second (and every fourth tick) from a decayed CPU-usage
//! estimate and a niceness value. All arithmetic is 17.14 fixed point; the
//! kernel never touches floating point.
//!
//! Formulas:
//! - `load_avg   = (59/60)*load_avg + (1/60)*ready_threads`
//! - `recent_cpu = (2*load_avg)/(2*load_avg + 1) * recent_cpu + nice`
//! - `priority   = clamp(PRI_MAX - recent_cpu/4 - nice*2, PRI_MIN, PRI_MAX)`

use core::fmt;
use core::ops::{Add, Div, Mul, Sub};

use super::core::scheduler::Core;
use super::thread::{PRI_MAX, PRI_MIN};
use crate::time::TIMER_FREQ;

/// Number of fractional bits in the fixed-point representation.
const FRACTION_BITS: u32 = 14;

/// The fixed-point scale factor (one, as a raw value).
const F: i32 = 1 << FRACTION_BITS;

static_assertions::const_assert!(FRACTION_BITS < 31);

/// 17.14 signed fixed-point number.
///
/// Raw value is `real * 2^14`. Products and quotients widen to i64
/// internally so intermediate results cannot overflow.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Fixed(i32);

impl Fixed {
    pub const ZERO: Fixed = Fixed(0);
    pub const ONE: Fixed = Fixed(F);

    /// Convert an integer to fixed point.
    pub const fn from_int(n: i32) -> Fixed {
        Fixed(n * F)
    }

    /// Exact ratio of two integers.
    pub const fn from_ratio(num: i32, den: i32) -> Fixed {
        Fixed(((num as i64 * F as i64) / den as i64) as i32)
    }

    /// Truncate toward zero.
    pub const fn to_int(self) -> i32 {
        self.0 / F
    }

    /// Round to the nearest integer.
    pub const fn to_int_nearest(self) -> i32 {
        if self.0 >= 0 {
            (self.0 + F / 2) / F
        } else {
            (self.0 - F / 2) / F
        }
    }

    /// Raw 17.14 representation (for the scaled-integer accessors).
    pub const fn raw(self) -> i32 {
        self.0
    }
}

impl Add for Fixed {
    type Output = Fixed;
    fn add(self, rhs: Fixed) -> Fixed {
        Fixed(self.0 + rhs.0)
    }
}

impl Sub for Fixed {
    type Output = Fixed;
    fn sub(self, rhs: Fixed) -> Fixed {
        Fixed(self.0 - rhs.0)
    }
}

impl Add<i32> for Fixed {
    type Output = Fixed;
    fn add(self, rhs: i32) -> Fixed {
        Fixed(self.0 + rhs * F)
    }
}

impl Mul for Fixed {
    type Output = Fixed;
    fn mul(self, rhs: Fixed) -> Fixed {
        Fixed(((self.0 as i64 * rhs.0 as i64) >> FRACTION_BITS) as i32)
    }
}

impl Mul<i32> for Fixed {
    type Output = Fixed;
    fn mul(self, rhs: i32) -> Fixed {
        Fixed(self.0 * rhs)
    }
}

impl Div for Fixed {
    type Output = Fixed;
    fn div(self, rhs: Fixed) -> Fixed {
        Fixed((((self.0 as i64) << FRACTION_BITS) / rhs.0 as i64) as i32)
    }
}

impl Div<i32> for Fixed {
    type Output = Fixed;
    fn div(self, rhs: i32) -> Fixed {
        Fixed(self.0 / rhs)
    }
}

impl fmt::Debug for Fixed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fixed({}.{:04})", self.0 / F, ((self.0 % F).abs() * 10_000) / F)
    }
}

/// Priority from the MLFQS formula, rounded to nearest and clamped.
pub fn mlfqs_priority(recent_cpu: Fixed, nice: i8) -> u8 {
    let pri = PRI_MAX as i32 - (recent_cpu / 4).to_int_nearest() - nice as i32 * 2;
    pri.clamp(PRI_MIN as i32, PRI_MAX as i32) as u8
}

impl Core {
    /// Per-tick MLFQS work: charge one tick of CPU to the running thread.
    /// The idle thread is never charged.
    pub(crate) fn mlfqs_tick(&mut self) {
        if self.current == self.idle {
            return;
        }
        let t = self.thread_mut(self.current);
        t.recent_cpu = t.recent_cpu + 1;
    }

    /// Once-per-second MLFQS work: refresh the load average, then decay every
    /// thread's recent_cpu.
    pub(crate) fn mlfqs_second(&mut self) {
        // Ready count includes the running thread, excludes idle.
        let ready = self.runnable_count() as i32;
        self.load_avg =
            Fixed::from_ratio(59, 60) * self.load_avg + Fixed::from_ratio(1, 60) * Fixed::from_int(ready);

        let load = self.load_avg;
        let coeff = (load * 2) / (load * 2 + 1);
        for t in self.threads.values_mut() {
            if t.id() == self.idle {
                continue;
            }
            t.recent_cpu = coeff * t.recent_cpu + t.nice as i32;
        }
        log::trace!(
            "mlfqs: load_avg={:?} ready={} after second boundary",
            self.load_avg,
            ready
        );
    }

    /// Recompute every thread's priority from its recent_cpu and nice.
    /// Runs every fourth tick and at the per-second boundary; the caller is
    /// responsible for the preemption re-check afterwards.
    pub(crate) fn mlfqs_recompute_priorities(&mut self) {
        for t in self.threads.values_mut() {
            if t.id() == self.idle {
                continue;
            }
            let pri = mlfqs_priority(t.recent_cpu, t.nice);
            t.base_priority = pri;
            t.effective_priority = pri;
        }
    }

    /// True on ticks where the per-second recompute fires.
    pub(crate) fn at_second_boundary(&self) -> bool {
        self.ticks % TIMER_FREQ == 0
    }

    /// Count of non-idle threads that are Ready or Running.
    pub(crate) fn runnable_count(&self) -> usize {
        self.threads
            .values()
            .filter(|t| t.id() != self.idle && t.state().is_active())
            .count()
    }
}
