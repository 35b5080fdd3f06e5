//! The seam between this crate and a PIO peripheral runtime.
//!
//! Opening the device, muxing the GPIO to the PIO function and the register-level
//! plumbing live behind [`PioBlock`]. The crate only ever talks to state machines by
//! index, through a [`PioAllocator`](crate::session::PioAllocator).

use fixed::types::U24F8;
use pio::Program;

use crate::Result;
use crate::program::INSTRUCTION_MEMORY;

/// Direction the output shift register shifts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ShiftDirection {
    /// MSB first: bits leave from bit 31.
    Left,
    /// LSB first: bits leave from bit 0.
    Right,
}

/// Output shift register configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ShiftConfig {
    /// Shift direction.
    pub direction: ShiftDirection,
    /// Refill the OSR from the TX FIFO automatically once `threshold` bits have gone out.
    pub auto_fill: bool,
    /// Bits shifted out of each FIFO word before the next pull (1..=32).
    pub threshold: u8,
}

/// Everything the state machine needs before it can be enabled.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StateMachineConfig {
    /// Absolute address the program was loaded at.
    pub origin: u8,
    /// Absolute `(source, target)` wrap addresses.
    pub wrap: (u8, u8),
    /// GPIO driven by side-set.
    pub side_set_pin: u8,
    /// Base GPIO of `set pins`/`set pindirs`. The program's `set pindirs, 1` makes this
    /// pin an output, so it must be the side-set pin.
    pub set_pin: u8,
    /// Side-set bits per instruction.
    pub side_set_bits: u8,
    /// Output shift register behavior.
    pub shift_out: ShiftConfig,
    /// Join the RX FIFO onto the TX FIFO (doubles TX depth).
    pub join_tx_fifo: bool,
    /// 16.8 fixed-point clock divider.
    pub clock_divider: U24F8,
}

/// A PIO block: a shared instruction memory and a handful of state machines.
///
/// `sm` arguments are state machine indices below [`state_machine_count`](Self::state_machine_count).
/// Implementations may assume the caller owns the state machine it passes in;
/// [`PioAllocator`](crate::session::PioAllocator) guarantees that.
pub trait PioBlock {
    /// Number of state machines in the block.
    fn state_machine_count(&self) -> u8;

    /// Frequency of the clock feeding the state machine dividers.
    fn system_clock_hz(&self) -> u32;

    /// Number of GPIOs the block can drive (valid pins are `0..pin_count`).
    fn pin_count(&self) -> u8;

    /// Width of the output shift register. A left-shifting `out` sends its top bit first,
    /// so pixel payloads are left-justified in this many bits.
    fn shift_register_bits(&self) -> u8 {
        32
    }

    /// Copy `program` into free instruction memory, relocating its jumps.
    ///
    /// Returns the origin it was placed at.
    ///
    /// # Errors
    ///
    /// [`Error::ProgramLoadFailed`](crate::Error::ProgramLoadFailed) when no free region is
    /// large enough.
    fn load_program(&mut self, program: &Program<INSTRUCTION_MEMORY>) -> Result<u8>;

    /// Free `len` instruction slots starting at `origin`.
    fn free_program(&mut self, origin: u8, len: u8);

    /// Apply `config` to a disabled state machine and bind its side-set and set pins.
    ///
    /// # Errors
    ///
    /// [`Error::PinUnavailable`](crate::Error::PinUnavailable) when the pin is outside the
    /// block's range.
    fn configure(&mut self, sm: u8, config: &StateMachineConfig) -> Result<()>;

    /// Change only the clock divider.
    fn set_clock_divider(&mut self, sm: u8, clock_divider: U24F8);

    /// Start or stop a state machine. Starting restarts it at the program origin.
    fn set_enabled(&mut self, sm: u8, enabled: bool);

    /// Drop every word waiting in the FIFOs.
    fn clear_fifos(&mut self, sm: u8);

    /// Push one word if the TX FIFO has room. Never blocks.
    fn try_push(&mut self, sm: u8, word: u32) -> bool;

    /// True once the TX FIFO is empty and the state machine has stalled waiting for data,
    /// i.e. the last bit has left the pin.
    fn is_tx_drained(&mut self, sm: u8) -> bool;
}
