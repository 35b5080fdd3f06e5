//! The bit-serializer microprogram.
//!
//! One pass through the loop sends one bit. The data pin is driven by side-set, so every
//! instruction sets the line level and then holds it for its delay:
//!
//! ```text
//!     set pindirs, 1     side 0          ; once: data pin is an output
//! .wrap_target
//! bitloop:
//!     out x, 1           side 0 [T3 - 1] ; low tail of the previous bit
//!     jmp !x do_zero     side 1 [T1 - 1] ; rising edge, T1 high
//!     jmp bitloop        side 1 [T2 - 1] ; data 1: stay high for T2
//! do_zero:
//!     nop                side 0 [T2 - 1] ; data 0: low for T2
//! .wrap
//! ```
//!
//! ```text
//!            |<- T1 ->|<-- T2 -->|<- T3 ->|
//!  bit = 1:  ‾‾‾‾‾‾‾‾‾‾‾‾‾‾‾‾‾‾‾‾‾|________|
//!  bit = 0:  ‾‾‾‾‾‾‾‾‾|___________________|
//! ```
//!
//! `out` stalls with its side-set already applied when the FIFO is empty, so between
//! frames the line rests low, which is exactly the reset/latch condition.

use pio::{Assembler, JmpCondition, OutDestination, Program, SetDestination, SideSet};

use crate::timing::BitCycles;
use crate::{Error, Result};

/// Instruction memory size of one PIO block.
pub const INSTRUCTION_MEMORY: usize = 32;

/// Largest delay one instruction can encode with a single non-optional side-set bit.
pub const MAX_DELAY: u8 = 15;

/// Side-set bits used by the program (one data pin, not optional).
pub const SIDE_SET_BITS: u8 = 1;

/// An assembled, not-yet-loaded serializer program for one set of sub-periods.
#[derive(Debug)]
pub struct Microprogram {
    program: Program<INSTRUCTION_MEMORY>,
    bit_cycles: BitCycles,
}

impl Microprogram {
    /// Assemble the program for `bit_cycles`.
    ///
    /// # Errors
    ///
    /// [`Error::ProgramLoadFailed`] when a sub-period is zero or longer than
    /// `MAX_DELAY + 1` cycles, since the delay field cannot express it.
    pub fn new(bit_cycles: BitCycles) -> Result<Self> {
        let BitCycles { t1, t2, t3 } = bit_cycles;
        let delay = |cycles: u8| -> Result<u8> {
            cycles
                .checked_sub(1)
                .filter(|delay| *delay <= MAX_DELAY)
                .ok_or(Error::ProgramLoadFailed)
        };
        let (t1_delay, t2_delay, t3_delay) = (delay(t1)?, delay(t2)?, delay(t3)?);

        let side_set = SideSet::new(false, SIDE_SET_BITS, false);
        let mut assembler: Assembler<INSTRUCTION_MEMORY> = Assembler::new_with_side_set(side_set);

        let mut wrap_target = assembler.label();
        let mut wrap_source = assembler.label();
        let mut do_zero = assembler.label();
        assembler.set_with_side_set(SetDestination::PINDIRS, 1, 0);
        assembler.bind(&mut wrap_target);
        // Low tail of the previous bit; autopull refills the OSR here.
        assembler.out_with_delay_and_side_set(OutDestination::X, 1, t3_delay, 0);
        // Rising edge, branch on the bit just shifted out.
        assembler.jmp_with_delay_and_side_set(JmpCondition::XIsZero, &mut do_zero, t1_delay, 1);
        // Data 1.
        assembler.jmp_with_delay_and_side_set(
            JmpCondition::Always,
            &mut wrap_target,
            t2_delay,
            1,
        );
        assembler.bind(&mut do_zero);
        // Data 0.
        assembler.nop_with_delay_and_side_set(t2_delay, 0);
        assembler.bind(&mut wrap_source);

        let program = assembler.assemble_with_wrap(wrap_source, wrap_target);
        debug!(
            "program: assembled {} instructions for T1={} T2={} T3={}",
            program.code.len(),
            t1,
            t2,
            t3
        );
        Ok(Self {
            program,
            bit_cycles,
        })
    }

    /// The assembled program, origin-relative.
    #[must_use]
    pub const fn program(&self) -> &Program<INSTRUCTION_MEMORY> {
        &self.program
    }

    /// Raw instruction words, origin-relative.
    #[must_use]
    pub fn instructions(&self) -> &[u16] {
        &self.program.code
    }

    /// Instruction slots this program occupies.
    #[must_use]
    pub fn len(&self) -> u8 {
        // A program never exceeds INSTRUCTION_MEMORY (32) slots.
        u8::try_from(self.program.code.len()).unwrap_or(u8::MAX)
    }

    /// Always false; the program has at least one instruction.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.program.code.is_empty()
    }

    /// `(source, target)` wrap addresses, origin-relative.
    #[must_use]
    pub const fn wrap(&self) -> (u8, u8) {
        (self.program.wrap.source, self.program.wrap.target)
    }

    /// Sub-periods baked into the delays.
    #[must_use]
    pub const fn bit_cycles(&self) -> BitCycles {
        self.bit_cycles
    }
}

/// Opcode field (bits 15..13) of a JMP instruction.
const OPCODE_JMP: u16 = 0b000;

/// Rewrite origin-relative JMP targets for a program loaded at `origin`.
///
/// Used by PIO block implementations when they copy a program into instruction memory.
#[must_use]
pub fn relocate(instruction: u16, origin: u8) -> u16 {
    if instruction >> 13 == OPCODE_JMP {
        let address = (instruction & 0x1F) + u16::from(origin);
        (instruction & !0x1F) | (address & 0x1F)
    } else {
        instruction
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timing::ChipTiming;

    #[test]
    fn ws2812_program_shape() {
        let microprogram = Microprogram::new(ChipTiming::WS2812.bit_cycles).unwrap();
        assert_eq!(microprogram.len(), 5);
        assert_eq!(microprogram.wrap(), (4, 1));
        // set pindirs, 1 side 0
        assert_eq!(microprogram.instructions()[0], 0xE081);
        // out x, 1 side 0 [2]
        assert_eq!(microprogram.instructions()[1], 0x6221);
        // jmp !x 4 side 1 [1]
        assert_eq!(microprogram.instructions()[2], 0x1124);
        // jmp 1 side 1 [4]
        assert_eq!(microprogram.instructions()[3], 0x1401);
        // nop (mov y, y) side 0 [4]
        assert_eq!(microprogram.instructions()[4], 0xA442);
    }

    #[test]
    fn delays_must_fit_the_delay_field() {
        assert_eq!(
            Microprogram::new(BitCycles::new(2, 17, 3)).unwrap_err(),
            Error::ProgramLoadFailed
        );
        assert_eq!(
            Microprogram::new(BitCycles::new(0, 5, 3)).unwrap_err(),
            Error::ProgramLoadFailed
        );
        assert!(Microprogram::new(BitCycles::new(16, 16, 16)).is_ok());
    }

    #[test]
    fn relocation_only_touches_jumps() {
        assert_eq!(relocate(0x1124, 10), 0x112E);
        assert_eq!(relocate(0x1401, 30), 0x141F);
        // Wraps inside the 5-bit address field.
        assert_eq!(relocate(0x1401, 31), 0x1400);
        assert_eq!(relocate(0x6221, 10), 0x6221);
    }
}
