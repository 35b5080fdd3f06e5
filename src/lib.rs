//! Drive WS2812/WS2811-class LED strips from a PIO state machine.
//!
//! A strip is one data line. Each bit is a fixed-length period that starts high; a long
//! high means 1, a short high means 0. After the last bit the line stays low for the
//! chip's reset time and every LED latches the color it shifted in. A PIO state machine
//! produces that waveform from a five-instruction program, fed one pixel per FIFO word.
//!
//! The crate is split the way the work flows:
//!
//! - [`timing`]: pick the clock divider that stretches a fixed cycle pattern to the
//!   requested bit rate.
//! - [`program`]: assemble the serializer for a chip's high/low sub-periods.
//! - [`pixel`]: pack colors into shift words in a strip's channel order.
//! - [`transfer`]: feed words through the FIFO and honor the latch gap.
//! - [`session`]: claim a state machine, tie it to a strip, send frames.
//! - [`pio_block`]: the trait a PIO runtime implements to host all of this.
//! - `pio_host` (feature `host`): an emulated PIO block with simulated strips.
//!
//! # Glossary
//!
//! - **PIO ([Programmable I/O](https://medium.com/data-science/nine-pico-pio-wats-with-rust-part-1-9d062067dc25)):**
//!   a block of small state machines sharing 32 instruction slots. RP2040 has 2 blocks,
//!   RP2350 3, RP1 (Raspberry Pi 5) 1; each block has 4 state machines.
//! - **Side-set:** a pin level written by every instruction alongside its main effect.
//!   The serializer drives the data line only through side-set.
//! - **FIFO / OSR:** words queue in the TX FIFO (8 deep when joined) and are pulled into
//!   the output shift register, which `out` shifts from the top.
//! - **Clock divider:** 16.8 fixed-point ratio between the system clock and a state
//!   machine's cycle rate.
//! - **Reset / latch:** the low period that ends a frame.
//! - **Channel order:** the byte order a strip expects, e.g. GRB for WS2812.
#![cfg_attr(not(feature = "host"), no_std)]

// Must come first so its macros are visible to every module below.
#[macro_use]
mod fmt;

mod error;
pub mod pio_block;
#[cfg(feature = "host")]
pub mod pio_host;
pub mod pixel;
pub mod program;
pub mod session;
pub mod timing;
pub mod transfer;

// Re-export error types and result (used throughout)
pub use crate::error::{Error, Result};
pub use crate::pixel::{ChannelOrder, Pixel};
pub use crate::session::{PioAllocator, Session, SessionConfig};
