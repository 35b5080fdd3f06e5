//! Clock-divider derivation and per-chip bit timing.
//!
//! A PIO state machine runs one instruction cycle per divided system-clock tick. The
//! microprogram spends a fixed number of cycles on every bit (`T1 + T2 + T3`), so the line
//! bit rate is set entirely by the divider:
//!
//! ```text
//! divider = system_clock_hz / (bit_rate_hz * cycles_per_bit)
//! ```
//!
//! The divider is a 16.8 fixed-point value in `[1.0, 65536.0]`. See [`derive`].

use embassy_time::Duration;
use fixed::types::U24F8;

use crate::pixel::ChannelOrder;
use crate::{Error, Result};

/// Maximum deviation of the realized bit period from the target, in percent.
pub const TOLERANCE_PERCENT: u64 = 5;

/// Smallest divider the PIO block can represent (1.0).
pub const DIVIDER_MIN: U24F8 = U24F8::from_bits(1 << 8);

/// Largest divider the PIO block can represent (65536.0, written as integer part 0).
pub const DIVIDER_MAX: U24F8 = U24F8::from_bits(65_536 << 8);

/// The three sub-periods of one bit, in state machine cycles.
///
/// `t1` is the unconditional high start of every bit, `t2` is the window that is
/// high for a 1 and low for a 0, `t3` is the unconditional low tail.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BitCycles {
    /// High cycles at the start of every bit.
    pub t1: u8,
    /// Cycles that carry the data bit.
    pub t2: u8,
    /// Low cycles at the end of every bit.
    pub t3: u8,
}

impl BitCycles {
    /// Create a sub-period table.
    #[must_use]
    pub const fn new(t1: u8, t2: u8, t3: u8) -> Self {
        Self { t1, t2, t3 }
    }

    /// Total state machine cycles per bit.
    #[must_use]
    pub const fn total(&self) -> u32 {
        self.t1 as u32 + self.t2 as u32 + self.t3 as u32
    }

    /// High time of a 1 bit, in cycles.
    #[must_use]
    pub const fn one_high(&self) -> u32 {
        self.t1 as u32 + self.t2 as u32
    }

    /// High time of a 0 bit, in cycles.
    #[must_use]
    pub const fn zero_high(&self) -> u32 {
        self.t1 as u32
    }
}

/// Protocol constants of one LED chip family.
///
/// Chips differ only in data, never in code path, so a new family is a new constant:
///
/// ```rust
/// use embassy_time::Duration;
/// use pio_strip::pixel::ChannelOrder;
/// use pio_strip::timing::{BitCycles, ChipTiming};
///
/// const APA106: ChipTiming = ChipTiming {
///     bit_cycles: BitCycles::new(3, 5, 4),
///     bit_rate_hz: 580_000,
///     reset: Duration::from_micros(50),
///     order: ChannelOrder::Rgb,
/// };
/// assert_eq!(APA106.bit_cycles.total(), 12);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ChipTiming {
    /// Sub-period cycle counts baked into the microprogram.
    pub bit_cycles: BitCycles,
    /// Nominal line bit rate.
    pub bit_rate_hz: u32,
    /// Minimum low time after a frame before the chips latch it.
    pub reset: Duration,
    /// Wire order the chip expects.
    pub order: ChannelOrder,
}

impl ChipTiming {
    /// WS2812 / WS2812B at 800 kbit/s, GRB.
    pub const WS2812: Self = Self {
        bit_cycles: BitCycles::new(2, 5, 3),
        bit_rate_hz: 800_000,
        reset: Duration::from_micros(50),
        order: ChannelOrder::Grb,
    };

    /// WS2811 in low-speed mode at 400 kbit/s, RGB.
    pub const WS2811: Self = Self {
        bit_cycles: BitCycles::new(2, 3, 5),
        bit_rate_hz: 400_000,
        reset: Duration::from_micros(50),
        order: ChannelOrder::Rgb,
    };

    /// SK6812 RGBW at 800 kbit/s, GRBW.
    pub const SK6812: Self = Self {
        bit_cycles: BitCycles::new(2, 3, 5),
        bit_rate_hz: 800_000,
        reset: Duration::from_micros(80),
        order: ChannelOrder::Grbw,
    };
}

/// Output of [`derive`]: everything the state machine configuration needs for one bit rate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimingParameters {
    /// 16.8 fixed-point clock divider.
    pub clock_divider: U24F8,
    /// Sub-period cycle counts (unchanged from the chip profile).
    pub bit_cycles: BitCycles,
    /// `t1 + t2 + t3`.
    pub cycles_per_bit: u32,
    /// System clock the divider was derived from.
    pub system_clock_hz: u32,
    /// Bit rate that was asked for.
    pub target_bit_rate_hz: u32,
}

impl TimingParameters {
    /// Integer part of the divider as the hardware stores it (0 means 65536).
    #[must_use]
    pub fn divider_int(&self) -> u16 {
        // Truncation maps 65536 to 0, the register encoding for the maximum.
        (self.clock_divider.to_bits() >> 8) as u16
    }

    /// Fractional part of the divider in 1/256 steps.
    #[must_use]
    pub fn divider_frac(&self) -> u8 {
        (self.clock_divider.to_bits() & 0xFF) as u8
    }

    /// Realized duration of one state machine cycle, in picoseconds.
    #[must_use]
    pub fn cycle_ps(&self) -> u64 {
        cycles_to_ps(1, self.clock_divider, self.system_clock_hz)
    }

    /// Realized duration of one bit on the line, in nanoseconds.
    #[must_use]
    pub fn bit_period_ns(&self) -> u64 {
        cycles_to_ps(u64::from(self.cycles_per_bit), self.clock_divider, self.system_clock_hz)
            / 1_000
    }

    /// Realized line bit rate in Hz, rounded down.
    #[must_use]
    pub fn realized_bit_rate_hz(&self) -> u32 {
        let denominator =
            u64::from(self.clock_divider.to_bits()) * u64::from(self.cycles_per_bit);
        if denominator == 0 {
            return 0;
        }
        let rate = (u64::from(self.system_clock_hz) << 8) / denominator;
        u32::try_from(rate).unwrap_or(u32::MAX)
    }
}

/// Convert state machine cycles to picoseconds for a given divider and system clock.
#[must_use]
pub fn cycles_to_ps(cycles: u64, clock_divider: U24F8, system_clock_hz: u32) -> u64 {
    if system_clock_hz == 0 {
        return 0;
    }
    // cycles * (divider_bits / 256) / clk seconds, scaled to ps.
    let numerator =
        u128::from(cycles) * u128::from(clock_divider.to_bits()) * 1_000_000_000_000_u128;
    let denominator = u128::from(system_clock_hz) << 8;
    u64::try_from(numerator / denominator).unwrap_or(u64::MAX)
}

/// Derive the clock divider for `target_bit_rate_hz` from `system_clock_hz`.
///
/// The divider is rounded to the nearest 1/256 and clamped into
/// [`DIVIDER_MIN`]..=[`DIVIDER_MAX`]. The sub-period counts pass through unchanged;
/// only the divider stretches wall-clock time per cycle.
///
/// # Errors
///
/// [`Error::UnachievableTiming`] when the realized bit period is off by more than
/// [`TOLERANCE_PERCENT`], or when the bit rate or cycle count is zero.
///
/// # Example
///
/// ```rust
/// use pio_strip::timing::{self, BitCycles};
///
/// // 125 MHz RP2040, 800 kbit/s, 10 cycles per bit: 125e6 / 8e6 = 15.625
/// let timing = timing::derive(125_000_000, 800_000, BitCycles::new(2, 5, 3))?;
/// assert_eq!(timing.divider_int(), 15);
/// assert_eq!(timing.divider_frac(), 160); // 0.625 * 256
/// # Ok::<(), pio_strip::Error>(())
/// ```
pub fn derive(
    system_clock_hz: u32,
    target_bit_rate_hz: u32,
    bit_cycles: BitCycles,
) -> Result<TimingParameters> {
    let unachievable = Error::UnachievableTiming {
        system_clock_hz,
        target_bit_rate_hz,
    };
    let cycles_per_bit = bit_cycles.total();
    let cycle_rate = u64::from(target_bit_rate_hz) * u64::from(cycles_per_bit);
    if cycle_rate == 0 || system_clock_hz == 0 {
        return Err(unachievable);
    }

    // Nearest 1/256: (clk * 256 + rate / 2) / rate
    let ideal_bits = ((u64::from(system_clock_hz) << 8) + cycle_rate / 2) / cycle_rate;
    let clamped_bits = ideal_bits.clamp(
        u64::from(DIVIDER_MIN.to_bits()),
        u64::from(DIVIDER_MAX.to_bits()),
    );
    let divider_bits = u32::try_from(clamped_bits).map_err(|_| unachievable)?;

    // |realized - target| / target <= tolerance, with realized/target periods compared as
    // divider_bits * cycle_rate against clk * 256.
    let realized = u128::from(divider_bits) * u128::from(cycle_rate);
    let target = u128::from(system_clock_hz) << 8;
    let deviation = realized.abs_diff(target);
    if deviation * 100 > target * u128::from(TOLERANCE_PERCENT) {
        error!(
            "timing: {} Hz unachievable from {} Hz clock ({} cycles/bit)",
            target_bit_rate_hz, system_clock_hz, cycles_per_bit
        );
        return Err(unachievable);
    }

    let timing = TimingParameters {
        clock_divider: U24F8::from_bits(divider_bits),
        bit_cycles,
        cycles_per_bit,
        system_clock_hz,
        target_bit_rate_hz,
    };
    info!(
        "timing: clk={}Hz rate={}Hz div={}.{}/256 cycles/bit={}",
        system_clock_hz,
        target_bit_rate_hz,
        timing.divider_int(),
        timing.divider_frac(),
        cycles_per_bit
    );
    Ok(timing)
}
