//! An emulated PIO block for running the driver on a host, with simulated strips on its
//! pins.
//!
//! [`HostPio`] implements [`PioBlock`]: instruction memory, state machines with their
//! TX FIFOs, and an interpreter for the instructions the serializer uses. Execution is in
//! virtual time. Nothing runs on its own; the state machine advances when the driver
//! pushes into a full FIFO (by exactly one word, as if the hardware drained it while the
//! CPU spun) or polls for drain (up to the next stall). Time spent stalled between frames
//! is taken from the wall clock, so the latch gap the driver waits out is what the strip
//! sees.
//!
//! Every pin can carry a [`StripModel`] that decodes the waveform and records what it
//! latched.
//!
//! ```rust
//! use pio_strip::pio_host::HostPio;
//! use pio_strip::timing::ChipTiming;
//!
//! let mut pio = HostPio::rp2040();
//! pio.attach_strip(4, ChipTiming::WS2811, 50);
//! assert_eq!(pio.strip(4).map(|strip| strip.len()), Some(50));
//! assert!(pio.strip(5).is_none());
//! ```

mod state_machine;
mod strip;

use embassy_time::Instant;
use fixed::types::U24F8;
use heapless::Vec as HeaplessVec;
use pio::Program;

use crate::pio_block::{PioBlock, StateMachineConfig};
use crate::program::{INSTRUCTION_MEMORY, relocate};
use crate::session::MAX_STATE_MACHINES;
use crate::timing::{ChipTiming, cycles_to_ps};
use crate::{Error, Result};

use state_machine::{HostStateMachine, Parked, Step};
pub use state_machine::{FIFO_DEPTH, JOINED_FIFO_DEPTH};
pub use strip::{Pulse, StripModel};

/// Instructions one poll may execute before the state machine is declared runaway.
const STEP_LIMIT: usize = 1 << 20;

/// What a call to [`HostPio::advance`] runs until.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Until {
    /// One word has been pulled from the FIFO.
    Pull,
    /// The state machine blocks on an empty FIFO.
    Stall,
}

/// An emulated PIO block.
pub struct HostPio {
    system_clock_hz: u32,
    pin_count: u8,
    shift_register_bits: u8,
    memory: [Option<u16>; INSTRUCTION_MEMORY],
    state_machines: HeaplessVec<HostStateMachine, MAX_STATE_MACHINES>,
    strips: Vec<StripModel>,
}

impl HostPio {
    /// A block with `state_machines` state machines (at most
    /// [`MAX_STATE_MACHINES`]) on a `system_clock_hz` clock, able to drive pins
    /// `0..pin_count`.
    #[must_use]
    pub fn new(system_clock_hz: u32, state_machines: u8, pin_count: u8) -> Self {
        let mut machines = HeaplessVec::new();
        for _ in 0..usize::from(state_machines).min(MAX_STATE_MACHINES) {
            let _ = machines.push(HostStateMachine::default());
        }
        Self {
            system_clock_hz,
            pin_count,
            shift_register_bits: 32,
            memory: [None; INSTRUCTION_MEMORY],
            state_machines: machines,
            strips: Vec::new(),
        }
    }

    /// RP2040 (Pico 1) PIO: 125 MHz, four state machines, GPIO 0-29.
    #[must_use]
    pub fn rp2040() -> Self {
        Self::new(125_000_000, 4, 30)
    }

    /// Raspberry Pi 5 RP1 PIO: 200 MHz, four state machines, GPIO 0-27.
    #[must_use]
    pub fn rp1() -> Self {
        Self::new(200_000_000, 4, 28)
    }

    /// Emulate an output shift register `bits` wide (1..=32) instead of 32. FIFO words
    /// are truncated to their low `bits` bits on pull.
    #[must_use]
    pub fn with_shift_register_bits(mut self, bits: u8) -> Self {
        self.shift_register_bits = bits.clamp(1, 32);
        self
    }

    /// Wire a strip of `len` `chip` LEDs to `pin`, replacing any strip already there.
    pub fn attach_strip(&mut self, pin: u8, chip: ChipTiming, len: usize) -> &mut Self {
        self.strips.retain(|strip| strip.pin() != pin);
        self.strips.push(StripModel::new(pin, chip, len));
        self
    }

    /// The strip on `pin`, brought up to date with the time the line has idled.
    pub fn strip(&mut self, pin: u8) -> Option<&StripModel> {
        self.settle();
        self.strips.iter().find(|strip| strip.pin() == pin)
    }

    /// Contents of one instruction memory slot.
    #[must_use]
    pub fn instruction(&self, address: u8) -> Option<u16> {
        self.memory.get(usize::from(address)).copied().flatten()
    }

    /// Number of unoccupied instruction slots.
    #[must_use]
    pub fn free_instruction_slots(&self) -> usize {
        self.memory.iter().filter(|slot| slot.is_none()).count()
    }

    /// Configuration last applied to `sm`.
    #[must_use]
    pub fn config(&self, sm: u8) -> Option<StateMachineConfig> {
        self.state_machines
            .get(usize::from(sm))
            .and_then(|machine| machine.config)
    }

    /// Whether `sm` is running.
    #[must_use]
    pub fn is_enabled(&self, sm: u8) -> bool {
        self.state_machines
            .get(usize::from(sm))
            .is_some_and(|machine| machine.enabled)
    }

    /// Whether `sm` stopped on an instruction the emulator does not support.
    #[must_use]
    pub fn is_halted(&self, sm: u8) -> bool {
        self.state_machines
            .get(usize::from(sm))
            .is_some_and(|machine| machine.halted)
    }

    /// Feed every parked line's idle time to its strip.
    fn settle(&mut self) {
        let Self {
            state_machines,
            strips,
            ..
        } = self;
        let now = Instant::now();
        for machine in state_machines.iter_mut() {
            let Some(config) = machine.config else {
                continue;
            };
            if let Some(parked) = machine.parked.as_mut() {
                let elapsed_ps =
                    now.saturating_duration_since(parked.since).as_micros() * 1_000_000;
                let fresh_ps = elapsed_ps.saturating_sub(parked.fed_ps);
                parked.fed_ps = elapsed_ps;
                if let Some(strip) = strips
                    .iter_mut()
                    .find(|strip| strip.pin() == config.side_set_pin)
                {
                    strip.drive(parked.level, fresh_ps, 0);
                }
            }
        }
    }

    /// Settle and clear the parked line of `sm`: it is about to execute again.
    fn unpark(&mut self, sm: usize) {
        if self
            .state_machines
            .get(sm)
            .is_some_and(|machine| machine.parked.is_some())
        {
            self.settle();
            if let Some(machine) = self.state_machines.get_mut(sm) {
                machine.parked = None;
            }
        }
    }

    fn park(machine: &mut HostStateMachine, level: bool) {
        if machine.parked.is_none() {
            machine.parked = Some(Parked {
                level,
                since: Instant::now(),
                fed_ps: 0,
            });
        }
    }

    /// Run `sm` in virtual time until `until` or a stall, feeding its strip as it goes.
    fn advance(&mut self, sm: usize, until: Until) {
        let Self {
            system_clock_hz,
            memory,
            state_machines,
            strips,
            ..
        } = self;
        let Some(machine) = state_machines.get_mut(sm) else {
            return;
        };
        if machine.parked.is_some() {
            return;
        }
        let Some(config) = machine.config else {
            return;
        };
        let mut strip = strips
            .iter_mut()
            .find(|strip| strip.pin() == config.side_set_pin);

        for _ in 0..STEP_LIMIT {
            match machine.step(memory) {
                Step::Ran {
                    level,
                    cycles,
                    pulled,
                } => {
                    if let Some(strip) = strip.as_deref_mut() {
                        if let Some(word) = pulled {
                            strip.record_word(word);
                        }
                        let duration_ps =
                            cycles_to_ps(cycles, config.clock_divider, *system_clock_hz);
                        strip.drive(level, duration_ps, cycles);
                    }
                    if until == Until::Pull && pulled.is_some() {
                        return;
                    }
                }
                Step::Stalled { level } => {
                    if let Some(strip) = strip.as_deref_mut() {
                        strip.drive(level, 0, 0);
                    }
                    Self::park(machine, level);
                    return;
                }
                Step::Idle => return,
            }
        }
        error!("host pio: state machine {} never stalled, halting", sm);
        machine.halted = true;
    }
}

impl PioBlock for HostPio {
    fn state_machine_count(&self) -> u8 {
        u8::try_from(self.state_machines.len()).unwrap_or(u8::MAX)
    }

    fn system_clock_hz(&self) -> u32 {
        self.system_clock_hz
    }

    fn pin_count(&self) -> u8 {
        self.pin_count
    }

    fn shift_register_bits(&self) -> u8 {
        self.shift_register_bits
    }

    fn load_program(&mut self, program: &Program<INSTRUCTION_MEMORY>) -> Result<u8> {
        let len = program.code.len();
        let fits = |origin: usize| {
            self.memory
                .get(origin..origin + len)
                .is_some_and(|slots| slots.iter().all(Option::is_none))
        };
        let origin = match program.origin {
            Some(origin) => Some(usize::from(origin)).filter(|&origin| fits(origin)),
            None => (0..=INSTRUCTION_MEMORY.saturating_sub(len)).find(|&origin| fits(origin)),
        };
        let Some(origin) = origin.and_then(|origin| u8::try_from(origin).ok()) else {
            error!(
                "host pio: no room for {} instructions ({} free)",
                len,
                self.free_instruction_slots()
            );
            return Err(Error::ProgramLoadFailed);
        };
        for (slot, &instruction) in self
            .memory
            .iter_mut()
            .skip(usize::from(origin))
            .zip(program.code.iter())
        {
            *slot = Some(relocate(instruction, origin));
        }
        Ok(origin)
    }

    fn free_program(&mut self, origin: u8, len: u8) {
        for slot in self
            .memory
            .iter_mut()
            .skip(usize::from(origin))
            .take(usize::from(len))
        {
            *slot = None;
        }
    }

    fn configure(&mut self, sm: u8, config: &StateMachineConfig) -> Result<()> {
        for pin in [config.side_set_pin, config.set_pin] {
            if pin >= self.pin_count {
                return Err(Error::PinUnavailable(pin));
            }
        }
        let Some(machine) = self.state_machines.get_mut(usize::from(sm)) else {
            return Err(Error::NoChannelAvailable);
        };
        machine.configure(*config, self.shift_register_bits);
        Ok(())
    }

    fn set_clock_divider(&mut self, sm: u8, clock_divider: U24F8) {
        if let Some(config) = self
            .state_machines
            .get_mut(usize::from(sm))
            .and_then(|machine| machine.config.as_mut())
        {
            config.clock_divider = clock_divider;
        }
    }

    fn set_enabled(&mut self, sm: u8, enabled: bool) {
        let index = usize::from(sm);
        if enabled {
            self.unpark(index);
            if let Some(machine) = self.state_machines.get_mut(index) {
                machine.restart();
                machine.enabled = true;
            }
            self.advance(index, Until::Stall);
        } else {
            self.settle();
            if let Some(machine) = self.state_machines.get_mut(index) {
                machine.enabled = false;
                // The pin holds whatever level it had when the clock stopped.
                let level = machine.level();
                machine.parked = None;
                Self::park(machine, level);
            }
        }
    }

    fn clear_fifos(&mut self, sm: u8) {
        if let Some(machine) = self.state_machines.get_mut(usize::from(sm)) {
            machine.clear_fifo();
        }
    }

    fn try_push(&mut self, sm: u8, word: u32) -> bool {
        let index = usize::from(sm);
        let Some(machine) = self.state_machines.get(index) else {
            return false;
        };
        if machine.halted {
            warn!("host pio: state machine {} halted, word dropped", sm);
            return true;
        }
        if machine.fifo_is_full() {
            self.advance(index, Until::Pull);
            return false;
        }
        if machine.enabled {
            self.unpark(index);
        }
        self.state_machines
            .get_mut(index)
            .is_some_and(|machine| machine.push(word))
    }

    fn is_tx_drained(&mut self, sm: u8) -> bool {
        let index = usize::from(sm);
        let Some(machine) = self.state_machines.get(index) else {
            return true;
        };
        if machine.halted {
            return true;
        }
        if !machine.enabled {
            return machine.fifo_is_empty();
        }
        self.advance(index, Until::Stall);
        self.state_machines
            .get(index)
            .is_some_and(|machine| machine.fifo_is_empty() && machine.parked.is_some())
    }
}
