//! A simulated LED strip listening to one GPIO.

use embassy_time::Duration;

use crate::pixel::{Pixel, PixelEncoder, ShiftWord};
use crate::timing::ChipTiming;

const PS_PER_SECOND: u64 = 1_000_000_000_000;

/// One bit as seen on the line, in state machine cycles.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Pulse {
    /// Cycles the line was high.
    pub high_cycles: u64,
    /// Cycles the line was low afterwards, up to the next rising edge or latch.
    ///
    /// Idle time spent stalled on an empty FIFO is not counted.
    pub low_cycles: u64,
}

/// Decodes the waveform on its pin the way a WS2812-class chip does.
///
/// A high pulse longer than the midpoint between the chip's nominal 0 and 1 high times
/// reads as a 1. Bits fill pixels in the chip's own channel order, MSB first; bits beyond
/// the strip's length are forwarded out the far end and only counted. A low period of at
/// least the reset time latches what arrived onto the LEDs.
#[derive(Clone, Debug)]
pub struct StripModel {
    pin: u8,
    chip: ChipTiming,
    decoder: PixelEncoder,
    sample_point_ps: u64,
    reset_ps: u64,

    level: bool,
    run_ps: u64,
    run_cycles: u64,
    pending_high_cycles: Option<u64>,
    gap_open: bool,

    shift: u32,
    shift_bits: u8,
    received: Vec<Pixel>,
    bits_since_latch: usize,
    forwarded_bits: usize,

    leds: Vec<Pixel>,
    frames: Vec<Vec<Pixel>>,
    words: Vec<u32>,
    pulses: Vec<Pulse>,
    min_gap_ps: Option<u64>,
}

impl StripModel {
    /// A dark strip of `len` LEDs on `pin`.
    #[must_use]
    pub fn new(pin: u8, chip: ChipTiming, len: usize) -> Self {
        let bit_ps = PS_PER_SECOND / u64::from(chip.bit_rate_hz.max(1));
        let cycles = chip.bit_cycles;
        let total = u64::from(cycles.total().max(1));
        // Halfway between the nominal 0 high (T1) and 1 high (T1 + T2).
        let sample_point_ps =
            bit_ps * (2 * u64::from(cycles.t1) + u64::from(cycles.t2)) / (2 * total);
        Self {
            pin,
            chip,
            decoder: PixelEncoder::new(chip.order, chip.order.bit_width()),
            sample_point_ps,
            reset_ps: chip.reset.as_micros() * 1_000_000,
            level: false,
            run_ps: 0,
            run_cycles: 0,
            pending_high_cycles: None,
            gap_open: false,
            shift: 0,
            shift_bits: 0,
            received: Vec::with_capacity(len),
            bits_since_latch: 0,
            forwarded_bits: 0,
            leds: vec![Pixel::OFF; len],
            frames: Vec::new(),
            words: Vec::new(),
            pulses: Vec::new(),
            min_gap_ps: None,
        }
    }

    /// GPIO the strip listens to.
    #[must_use]
    pub const fn pin(&self) -> u8 {
        self.pin
    }

    /// Chip profile the strip decodes with.
    #[must_use]
    pub const fn chip(&self) -> ChipTiming {
        self.chip
    }

    /// Number of LEDs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.leds.len()
    }

    /// True for a strip without LEDs.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.leds.is_empty()
    }

    /// What the LEDs currently show.
    #[must_use]
    pub fn pixels(&self) -> &[Pixel] {
        &self.leds
    }

    /// Every latched frame, oldest first, as the LEDs showed it right after the latch.
    #[must_use]
    pub fn latched_frames(&self) -> &[Vec<Pixel>] {
        &self.frames
    }

    /// The most recently latched frame.
    #[must_use]
    pub fn last_frame(&self) -> Option<&[Pixel]> {
        self.frames.last().map(Vec::as_slice)
    }

    /// Number of latches so far.
    #[must_use]
    pub fn latch_count(&self) -> usize {
        self.frames.len()
    }

    /// Raw words the driving state machine pulled from its FIFO, in order.
    #[must_use]
    pub fn words(&self) -> &[u32] {
        &self.words
    }

    /// Every bit seen on the line, in order.
    #[must_use]
    pub fn pulses(&self) -> &[Pulse] {
        &self.pulses
    }

    /// Bits that went past the last LED.
    #[must_use]
    pub const fn forwarded_bits(&self) -> usize {
        self.forwarded_bits
    }

    /// Shortest low period observed between a latch and the next frame's first bit.
    #[must_use]
    pub fn min_gap(&self) -> Option<Duration> {
        self.min_gap_ps.map(|ps| Duration::from_micros(ps / 1_000_000))
    }

    /// Shortest inter-frame low period in nanoseconds.
    #[must_use]
    pub fn min_gap_ns(&self) -> Option<u64> {
        self.min_gap_ps.map(|ps| ps / 1_000)
    }

    pub(crate) fn record_word(&mut self, word: u32) {
        self.words.push(word);
    }

    /// The line sat at `level` for `duration_ps` (`cycles` of it executed by the state
    /// machine, the rest idle).
    pub(crate) fn drive(&mut self, level: bool, duration_ps: u64, cycles: u64) {
        if level != self.level {
            if level {
                self.rising_edge();
            } else {
                self.falling_edge();
            }
            self.level = level;
            self.run_ps = 0;
            self.run_cycles = 0;
        }
        self.run_ps = self.run_ps.saturating_add(duration_ps);
        self.run_cycles = self.run_cycles.saturating_add(cycles);

        if !self.level && self.bits_since_latch > 0 && self.run_ps >= self.reset_ps {
            self.latch();
        }
    }

    fn rising_edge(&mut self) {
        if let Some(high_cycles) = self.pending_high_cycles.take() {
            self.pulses.push(Pulse {
                high_cycles,
                low_cycles: self.run_cycles,
            });
        }
        if self.gap_open {
            self.gap_open = false;
            self.min_gap_ps = Some(
                self.min_gap_ps
                    .map_or(self.run_ps, |gap| gap.min(self.run_ps)),
            );
        }
    }

    fn falling_edge(&mut self) {
        self.pending_high_cycles = Some(self.run_cycles);
        self.push_bit(self.run_ps > self.sample_point_ps);
    }

    fn push_bit(&mut self, bit: bool) {
        self.bits_since_latch += 1;
        if self.received.len() >= self.leds.len() {
            self.forwarded_bits += 1;
            return;
        }
        self.shift = (self.shift << 1) | u32::from(bit);
        self.shift_bits += 1;
        if self.shift_bits == self.decoder.bit_width() {
            self.received.push(self.decoder.decode(ShiftWord(self.shift)));
            self.shift = 0;
            self.shift_bits = 0;
        }
    }

    fn latch(&mut self) {
        if let Some(high_cycles) = self.pending_high_cycles.take() {
            self.pulses.push(Pulse {
                high_cycles,
                low_cycles: self.run_cycles,
            });
        }
        for (led, pixel) in self.leds.iter_mut().zip(self.received.drain(..)) {
            *led = pixel;
        }
        self.frames.push(self.leds.clone());
        self.shift = 0;
        self.shift_bits = 0;
        self.bits_since_latch = 0;
        self.gap_open = true;
    }
}
