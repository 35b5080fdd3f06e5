//! One emulated state machine: registers, FIFO and the instruction subset the
//! serializer uses.

use embassy_time::Instant;
use heapless::Deque;

use crate::pio_block::{ShiftDirection, StateMachineConfig};
use crate::program::INSTRUCTION_MEMORY;

/// TX FIFO depth with the RX FIFO joined onto it.
pub const JOINED_FIFO_DEPTH: usize = 8;
/// TX FIFO depth without joining.
pub const FIFO_DEPTH: usize = 4;

/// Outcome of one [`HostStateMachine::step`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Step {
    /// One instruction completed. The pin sat at `level` for `cycles` cycles.
    Ran {
        level: bool,
        cycles: u64,
        pulled: Option<u32>,
    },
    /// Blocked on an empty FIFO with the pin at `level`.
    Stalled { level: bool },
    /// Not running (disabled, unconfigured or halted).
    Idle,
}

/// Where the line sits while the state machine is not executing.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Parked {
    pub(crate) level: bool,
    pub(crate) since: Instant,
    pub(crate) fed_ps: u64,
}

#[derive(Clone, Debug)]
pub(crate) struct HostStateMachine {
    pub(crate) config: Option<StateMachineConfig>,
    pub(crate) enabled: bool,
    pub(crate) halted: bool,
    pub(crate) parked: Option<Parked>,
    fifo: Deque<u32, JOINED_FIFO_DEPTH>,
    pc: u8,
    x: u32,
    y: u32,
    register_bits: u8,
    osr: u32,
    osr_count: u8,
    pin_output: bool,
    level: bool,
}

impl Default for HostStateMachine {
    fn default() -> Self {
        Self {
            config: None,
            enabled: false,
            halted: false,
            parked: None,
            fifo: Deque::new(),
            pc: 0,
            x: 0,
            y: 0,
            register_bits: 32,
            osr: 0,
            osr_count: 32,
            pin_output: false,
            level: false,
        }
    }
}

impl HostStateMachine {
    /// Apply `config` to an output shift register `register_bits` wide.
    pub(crate) fn configure(&mut self, config: StateMachineConfig, register_bits: u8) {
        let register_bits = register_bits.clamp(1, 32);
        *self = Self {
            config: Some(config),
            register_bits,
            osr_count: register_bits,
            ..Self::default()
        };
    }

    /// Restart at the program origin with empty registers.
    pub(crate) fn restart(&mut self) {
        if let Some(config) = self.config {
            self.pc = config.origin;
        }
        self.x = 0;
        self.y = 0;
        self.osr = 0;
        self.osr_count = self.register_bits;
        self.halted = false;
    }

    pub(crate) const fn level(&self) -> bool {
        self.level
    }

    fn fifo_depth(&self) -> usize {
        match self.config {
            Some(config) if config.join_tx_fifo => JOINED_FIFO_DEPTH,
            _ => FIFO_DEPTH,
        }
    }

    pub(crate) fn fifo_is_full(&self) -> bool {
        self.fifo.len() >= self.fifo_depth()
    }

    pub(crate) fn fifo_is_empty(&self) -> bool {
        self.fifo.is_empty()
    }

    pub(crate) fn push(&mut self, word: u32) -> bool {
        !self.fifo_is_full() && self.fifo.push_back(word).is_ok()
    }

    pub(crate) fn clear_fifo(&mut self) {
        self.fifo.clear();
    }

    /// Execute the instruction at the program counter.
    pub(crate) fn step(&mut self, memory: &[Option<u16>; INSTRUCTION_MEMORY]) -> Step {
        let Some(config) = self.config else {
            return Step::Idle;
        };
        if !self.enabled || self.halted {
            return Step::Idle;
        }
        let Some(instruction) = memory.get(usize::from(self.pc)).copied().flatten() else {
            self.halt("executed an empty instruction slot");
            return Step::Idle;
        };

        // Delay/side-set field: side-set in the top bits, delay below.
        let field = (instruction >> 8) & 0x1F;
        let delay_bits = 5_u16.saturating_sub(u16::from(config.side_set_bits));
        let delay = u64::from(field & ((1 << delay_bits) - 1));
        if config.side_set_bits > 0 {
            let side = field >> delay_bits;
            self.level = side & 1 == 1;
        }
        let level = self.pin_output && self.level;

        let mut pulled = None;
        let mut jump = None;
        let opcode = instruction >> 13;
        let arg = instruction & 0xFF;
        match opcode {
            // JMP
            0b000 => {
                let target = (arg & 0x1F) as u8;
                if self.jump_condition(((arg >> 5) & 0b111) as u8) {
                    jump = Some(target);
                }
            }
            // OUT
            0b011 => {
                let threshold = config.shift_out.threshold.clamp(1, self.register_bits);
                if config.shift_out.auto_fill && self.osr_count >= threshold {
                    match self.fifo.pop_front() {
                        Some(word) => {
                            self.osr = word & self.register_mask();
                            self.osr_count = 0;
                            pulled = Some(word);
                        }
                        None => return Step::Stalled { level },
                    }
                }
                let count = match (arg & 0x1F) as u8 {
                    0 => 32,
                    count => count,
                };
                let value = self.shift_out(count, config.shift_out.direction);
                match (arg >> 5) & 0b111 {
                    0b001 => self.x = value,
                    0b010 => self.y = value,
                    0b011 => {}
                    0b101 => jump = Some((value & 0x1F) as u8),
                    _ => {
                        self.halt("OUT destination not emulated");
                        return Step::Idle;
                    }
                }
            }
            // MOV
            0b101 => {
                let source = match arg & 0b111 {
                    0b001 => self.x,
                    0b010 => self.y,
                    0b011 => 0,
                    0b111 => self.osr,
                    _ => {
                        self.halt("MOV source not emulated");
                        return Step::Idle;
                    }
                };
                let value = match (arg >> 3) & 0b11 {
                    0b01 => !source,
                    0b10 => source.reverse_bits(),
                    _ => source,
                };
                match (arg >> 5) & 0b111 {
                    0b001 => self.x = value,
                    0b010 => self.y = value,
                    0b111 => {
                        self.osr = value & self.register_mask();
                        self.osr_count = 0;
                    }
                    _ => {
                        self.halt("MOV destination not emulated");
                        return Step::Idle;
                    }
                }
            }
            // SET
            0b111 => {
                let data = u32::from(arg & 0x1F);
                match (arg >> 5) & 0b111 {
                    0b001 => self.x = data,
                    0b010 => self.y = data,
                    // Only the SET base changes direction; the line is the side-set pin.
                    0b100 => {
                        if config.set_pin == config.side_set_pin {
                            self.pin_output = data & 1 == 1;
                        }
                    }
                    _ => {
                        self.halt("SET destination not emulated");
                        return Step::Idle;
                    }
                }
            }
            _ => {
                self.halt("opcode not emulated");
                return Step::Idle;
            }
        }

        self.pc = jump.unwrap_or_else(|| self.next_pc(config));
        Step::Ran {
            // SET PINDIRS takes effect with this instruction's own side-set.
            level: self.pin_output && self.level,
            cycles: 1 + delay,
            pulled,
        }
    }

    fn jump_condition(&mut self, condition: u8) -> bool {
        match condition {
            0b001 => self.x == 0,
            0b010 => {
                let taken = self.x != 0;
                self.x = self.x.wrapping_sub(1);
                taken
            }
            0b011 => self.y == 0,
            0b100 => {
                let taken = self.y != 0;
                self.y = self.y.wrapping_sub(1);
                taken
            }
            0b101 => self.x != self.y,
            0b111 => {
                let threshold = self.config.map_or(self.register_bits, |config| {
                    config.shift_out.threshold.clamp(1, self.register_bits)
                });
                self.osr_count < threshold
            }
            _ => true,
        }
    }

    fn shift_out(&mut self, count: u8, direction: ShiftDirection) -> u32 {
        let count = count.min(self.register_bits);
        let value = match direction {
            ShiftDirection::Left => {
                let width = u32::from(self.register_bits);
                let value = self.osr.checked_shr(width - u32::from(count)).unwrap_or(0)
                    & low_mask(count);
                self.osr = self.osr.checked_shl(u32::from(count)).unwrap_or(0)
                    & self.register_mask();
                value
            }
            ShiftDirection::Right => {
                let value = self.osr & low_mask(count);
                self.osr = self.osr.checked_shr(u32::from(count)).unwrap_or(0);
                value
            }
        };
        self.osr_count = self
            .osr_count
            .saturating_add(count)
            .min(self.register_bits);
        value
    }

    const fn register_mask(&self) -> u32 {
        low_mask(self.register_bits)
    }

    fn next_pc(&self, config: StateMachineConfig) -> u8 {
        let (wrap_source, wrap_target) = config.wrap;
        if self.pc == wrap_source {
            wrap_target
        } else {
            (self.pc + 1) % INSTRUCTION_MEMORY as u8
        }
    }

    fn halt(&mut self, reason: &'static str) {
        error!("host pio: state machine halted at {}: {}", self.pc, reason);
        self.halted = true;
    }
}

/// The low `bits` bits set.
const fn low_mask(bits: u8) -> u32 {
    match u32::MAX.checked_shr(32 - bits as u32) {
        Some(mask) if bits > 0 => mask,
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pio_block::ShiftConfig;
    use fixed::types::U24F8;

    fn config(origin: u8, wrap: (u8, u8)) -> StateMachineConfig {
        StateMachineConfig {
            origin,
            wrap,
            side_set_pin: 0,
            set_pin: 0,
            side_set_bits: 1,
            shift_out: ShiftConfig {
                direction: ShiftDirection::Left,
                auto_fill: true,
                threshold: 24,
            },
            join_tx_fifo: true,
            clock_divider: U24F8::from_num(1),
        }
    }

    fn memory(code: &[u16]) -> [Option<u16>; INSTRUCTION_MEMORY] {
        let mut memory = [None; INSTRUCTION_MEMORY];
        for (slot, &instruction) in memory.iter_mut().zip(code) {
            *slot = Some(instruction);
        }
        memory
    }

    #[test]
    fn out_stalls_low_until_data_arrives() {
        let memory = memory(&[0xE081, 0x6221, 0x1124, 0x1401, 0xA442]);
        let mut sm = HostStateMachine::default();
        sm.configure(config(0, (4, 1)), 32);
        sm.enabled = true;
        sm.restart();

        assert_eq!(
            sm.step(&memory),
            Step::Ran {
                level: false,
                cycles: 1,
                pulled: None
            }
        );
        assert_eq!(sm.step(&memory), Step::Stalled { level: false });

        assert!(sm.push(0x8000_0000));
        assert_eq!(
            sm.step(&memory),
            Step::Ran {
                level: false,
                cycles: 3,
                pulled: Some(0x8000_0000)
            }
        );
        // Bit 1: high for T1 then T2, back to the out.
        assert_eq!(
            sm.step(&memory),
            Step::Ran {
                level: true,
                cycles: 2,
                pulled: None
            }
        );
        assert_eq!(
            sm.step(&memory),
            Step::Ran {
                level: true,
                cycles: 5,
                pulled: None
            }
        );
        // Bit 0 next: out, then the taken jump and the low nop.
        assert!(matches!(sm.step(&memory), Step::Ran { level: false, cycles: 3, .. }));
        assert!(matches!(sm.step(&memory), Step::Ran { level: true, cycles: 2, .. }));
        assert!(matches!(sm.step(&memory), Step::Ran { level: false, cycles: 5, .. }));
    }

    #[test]
    fn set_pindirs_on_another_pin_leaves_the_line_undriven() {
        let memory = memory(&[0xE081, 0x6221, 0x1124, 0x1401, 0xA442]);
        let mut sm = HostStateMachine::default();
        let mut elsewhere = config(0, (4, 1));
        elsewhere.set_pin = 1;
        sm.configure(elsewhere, 32);
        sm.enabled = true;
        sm.restart();
        assert!(sm.push(0xFF00_0000));

        for _ in 0..12 {
            match sm.step(&memory) {
                Step::Ran { level, .. } | Step::Stalled { level } => assert!(!level),
                Step::Idle => panic!("state machine stopped"),
            }
        }
    }

    #[test]
    fn narrow_register_sends_from_its_own_top_bit() {
        let memory = memory(&[0xE081, 0x6221, 0x1124, 0x1401, 0xA442]);
        let mut sm = HostStateMachine::default();
        sm.configure(config(0, (4, 1)), 24);
        sm.enabled = true;
        sm.restart();
        assert!(sm.push(0x00C0_0000));

        let mut highs = Vec::new();
        while let Step::Ran { level, cycles, .. } = sm.step(&memory) {
            if level {
                highs.push(cycles);
            }
        }
        // 1, 1, then 22 zeros: each bit's high time is T1 (2) plus T2 (5) for a 1.
        assert_eq!(&highs[..4], &[2, 5, 2, 5]);
        assert_eq!(highs.len(), 2 * 2 + 22);
    }

    #[test]
    fn unsupported_opcode_halts() {
        // IRQ 0
        let memory = memory(&[0xC000]);
        let mut sm = HostStateMachine::default();
        sm.configure(config(0, (0, 0)), 32);
        sm.enabled = true;
        assert_eq!(sm.step(&memory), Step::Idle);
        assert!(sm.halted);
    }

    #[test]
    fn fifo_depth_follows_join() {
        let mut sm = HostStateMachine::default();
        let mut unjoined = config(0, (0, 0));
        unjoined.join_tx_fifo = false;
        sm.configure(unjoined, 32);
        for word in 0..4 {
            assert!(sm.push(word));
        }
        assert!(!sm.push(4));
        assert!(sm.fifo_is_full());
    }
}
