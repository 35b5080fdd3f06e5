#![allow(missing_docs)]
//! Host-level tests for clock divider derivation.

use pio_strip::Error;
use pio_strip::timing::{self, BitCycles, ChipTiming, DIVIDER_MAX, DIVIDER_MIN};

const CLOCKS_HZ: [u32; 5] = [48_000_000, 125_000_000, 133_000_000, 150_000_000, 200_000_000];
const CHIPS: [ChipTiming; 3] = [ChipTiming::WS2812, ChipTiming::WS2811, ChipTiming::SK6812];

#[test]
fn sub_periods_add_up_and_period_is_within_tolerance() {
    for system_clock_hz in CLOCKS_HZ {
        for chip in CHIPS {
            for bit_rate_hz in [400_000, 800_000, 1_000_000] {
                let timing = timing::derive(system_clock_hz, bit_rate_hz, chip.bit_cycles)
                    .unwrap_or_else(|err| {
                        panic!("{system_clock_hz} Hz / {bit_rate_hz} Hz failed: {err}")
                    });

                let cycles = timing.bit_cycles;
                assert_eq!(
                    u32::from(cycles.t1) + u32::from(cycles.t2) + u32::from(cycles.t3),
                    timing.cycles_per_bit
                );
                assert!(timing.clock_divider >= DIVIDER_MIN);
                assert!(timing.clock_divider <= DIVIDER_MAX);

                let target_ns = 1_000_000_000 / u64::from(bit_rate_hz);
                let realized_ns = timing.bit_period_ns();
                assert!(
                    realized_ns.abs_diff(target_ns) * 100 <= target_ns * 5,
                    "{system_clock_hz} Hz / {bit_rate_hz} Hz: {realized_ns} ns vs {target_ns} ns"
                );
            }
        }
    }
}

#[test]
fn rp2040_ws2812_divider() {
    let timing = timing::derive(125_000_000, 800_000, ChipTiming::WS2812.bit_cycles).unwrap();
    assert_eq!(timing.divider_int(), 15);
    assert_eq!(timing.divider_frac(), 160);
    assert_eq!(timing.bit_period_ns(), 1_250);
    assert_eq!(timing.realized_bit_rate_hz(), 800_000);
}

#[test]
fn rp1_ws2811_divider() {
    let timing = timing::derive(200_000_000, 400_000, ChipTiming::WS2811.bit_cycles).unwrap();
    assert_eq!(timing.divider_int(), 50);
    assert_eq!(timing.divider_frac(), 0);
    assert_eq!(timing.bit_period_ns(), 2_500);
}

#[test]
fn too_fast_for_the_clock_is_unachievable() {
    // 10 cycles per bit at 800 kHz needs 8 MHz; a 5 MHz clock cannot divide below 1.
    assert_eq!(
        timing::derive(5_000_000, 800_000, BitCycles::new(2, 5, 3)),
        Err(Error::UnachievableTiming {
            system_clock_hz: 5_000_000,
            target_bit_rate_hz: 800_000,
        })
    );
}

#[test]
fn too_slow_for_the_divider_is_unachievable() {
    // 10 cycles per bit at 10 Hz from 200 MHz needs a divider of 2_000_000.
    assert!(matches!(
        timing::derive(200_000_000, 10, BitCycles::new(2, 5, 3)),
        Err(Error::UnachievableTiming { .. })
    ));
}

#[test]
fn zero_bit_rate_is_unachievable() {
    assert!(matches!(
        timing::derive(125_000_000, 0, ChipTiming::WS2812.bit_cycles),
        Err(Error::UnachievableTiming { .. })
    ));
}
