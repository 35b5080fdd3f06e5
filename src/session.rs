//! Strip sessions and the state machine allocator they are claimed from.
//!
//! A [`PioAllocator`] owns one [`PioBlock`] and hands out at most one [`Session`] per
//! state machine. A session ties that state machine to one strip: its pin, its chip
//! timing, its channel order and its length.
//!
//! ```text
//!            acquire          enable            disable
//!  (none) ───────────► Configured ───► Enabled ─────────► Disabled
//!                          │              ▲  │                │
//!                          │              └──┼─── enable ─────┤
//!                          │ release         │ release        │ release
//!                          ▼                 ▼                ▼
//!                                      Released
//! ```
//!
//! # Example
//!
//! ```rust
//! # #[cfg(feature = "host")] {
//! use pio_strip::pio_host::HostPio;
//! use pio_strip::pixel::{ChannelOrder, Pixel};
//! use pio_strip::session::{PioAllocator, SessionConfig};
//! use pio_strip::timing::ChipTiming;
//!
//! let mut pio = HostPio::rp2040();
//! pio.attach_strip(0, ChipTiming::WS2812, 3);
//! let allocator = PioAllocator::new(pio);
//!
//! let mut session = allocator.acquire(SessionConfig::new(0, 3))?;
//! session.enable()?;
//! session.send_frame(&[Pixel::rgb(255, 0, 0); 3], ChannelOrder::Grb)?;
//! session.release()?;
//!
//! let latched = allocator.with_block(|pio| pio.strip(0).map(|strip| strip.latch_count()));
//! assert_eq!(latched, Some(1));
//! # }
//! # Ok::<(), pio_strip::Error>(())
//! ```

use core::cell::RefCell;

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use heapless::Vec;
use smart_leds::{RGB8, SmartLedsWrite};

use crate::pio_block::{PioBlock, ShiftConfig, ShiftDirection, StateMachineConfig};
use crate::pixel::{ChannelOrder, Pixel, PixelEncoder, ShiftWord};
use crate::program::{Microprogram, SIDE_SET_BITS};
use crate::timing::{self, BitCycles, ChipTiming, TimingParameters};
use crate::transfer::{FrameStats, TransferEngine, TxQueue};
use crate::{Error, Result};

/// Most state machines a single block can have.
pub const MAX_STATE_MACHINES: usize = 8;

// ============================================================================
// Configuration
// ============================================================================

/// How to drive one strip.
///
/// ```rust
/// use pio_strip::pixel::ChannelOrder;
/// use pio_strip::session::SessionConfig;
/// use pio_strip::timing::ChipTiming;
///
/// const STRIP: SessionConfig = SessionConfig::new(2, 60)
///     .with_chip(ChipTiming::WS2811)
///     .with_order(ChannelOrder::Grb);
/// assert_eq!(STRIP.bit_rate_hz, 400_000);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SessionConfig {
    /// GPIO wired to the strip's data input.
    pub pin: u8,
    /// Number of pixels on the strip.
    pub len: usize,
    /// Chip timing profile.
    pub chip: ChipTiming,
    /// Channel order used by [`Session::write_frame`] and [`Session::clear`].
    pub order: ChannelOrder,
    /// Line bit rate.
    pub bit_rate_hz: u32,
}

impl SessionConfig {
    /// Chip profile used by [`SessionConfig::new`].
    pub const CHIP_DEFAULT: ChipTiming = ChipTiming::WS2812;

    /// A WS2812 strip of `len` pixels on `pin`, at the chip's native rate and order.
    #[must_use]
    pub const fn new(pin: u8, len: usize) -> Self {
        Self {
            pin,
            len,
            chip: Self::CHIP_DEFAULT,
            order: Self::CHIP_DEFAULT.order,
            bit_rate_hz: Self::CHIP_DEFAULT.bit_rate_hz,
        }
    }

    /// Switch chip profile. Also resets order and bit rate to the chip's own.
    #[must_use]
    pub const fn with_chip(mut self, chip: ChipTiming) -> Self {
        self.chip = chip;
        self.order = chip.order;
        self.bit_rate_hz = chip.bit_rate_hz;
        self
    }

    /// Override the channel order.
    #[must_use]
    pub const fn with_order(mut self, order: ChannelOrder) -> Self {
        self.order = order;
        self
    }

    /// Override the bit rate.
    #[must_use]
    pub const fn with_bit_rate(mut self, bit_rate_hz: u32) -> Self {
        self.bit_rate_hz = bit_rate_hz;
        self
    }
}

// ============================================================================
// Allocator
// ============================================================================

/// A program resident in instruction memory, shared by every session with the same
/// sub-periods.
#[derive(Clone, Copy, Debug)]
struct ResidentProgram {
    bit_cycles: BitCycles,
    origin: u8,
    len: u8,
    users: u8,
}

struct AllocatorState<B> {
    block: B,
    /// Pin bound to each claimed state machine.
    claims: [Option<u8>; MAX_STATE_MACHINES],
    programs: Vec<ResidentProgram, MAX_STATE_MACHINES>,
}

impl<B: PioBlock> AllocatorState<B> {
    fn free_state_machine(&self) -> Option<u8> {
        let count = usize::from(self.block.state_machine_count()).min(MAX_STATE_MACHINES);
        (0..count)
            .find(|&sm| self.claims.get(sm).is_some_and(Option::is_none))
            .and_then(|sm| u8::try_from(sm).ok())
    }

    fn pin_in_use(&self, pin: u8) -> bool {
        self.claims.iter().any(|claim| *claim == Some(pin))
    }

    /// Load `microprogram`, or share an identical one already resident.
    fn load_program(&mut self, microprogram: &Microprogram) -> Result<u8> {
        let bit_cycles = microprogram.bit_cycles();
        if let Some(resident) = self
            .programs
            .iter_mut()
            .find(|resident| resident.bit_cycles == bit_cycles)
        {
            resident.users = resident.users.saturating_add(1);
            debug!(
                "allocator: sharing program at {} ({} users)",
                resident.origin,
                resident.users
            );
            return Ok(resident.origin);
        }

        let origin = self.block.load_program(microprogram.program())?;
        let resident = ResidentProgram {
            bit_cycles,
            origin,
            len: microprogram.len(),
            users: 1,
        };
        if self.programs.push(resident).is_err() {
            self.block.free_program(origin, resident.len);
            return Err(Error::ProgramLoadFailed);
        }
        debug!(
            "allocator: loaded {} instructions at {}",
            resident.len,
            origin
        );
        Ok(origin)
    }

    fn unload_program(&mut self, bit_cycles: BitCycles) {
        let Some(index) = self
            .programs
            .iter()
            .position(|resident| resident.bit_cycles == bit_cycles)
        else {
            return;
        };
        let Some(resident) = self.programs.get_mut(index) else {
            return;
        };
        resident.users = resident.users.saturating_sub(1);
        if resident.users == 0 {
            let (origin, len) = (resident.origin, resident.len);
            self.programs.swap_remove(index);
            self.block.free_program(origin, len);
            debug!("allocator: freed {} instructions at {}", len, origin);
        }
    }
}

/// Owns a PIO block and tracks which of its state machines and instruction slots are
/// in use.
///
/// All bookkeeping sits behind one blocking mutex. It is held only for individual
/// register-level operations, never while a session waits on its FIFO, so sessions on
/// different state machines transmit independently.
pub struct PioAllocator<B: PioBlock> {
    state: Mutex<CriticalSectionRawMutex, RefCell<AllocatorState<B>>>,
}

impl<B: PioBlock> PioAllocator<B> {
    /// Take ownership of `block` with every state machine free.
    pub const fn new(block: B) -> Self {
        Self {
            state: Mutex::new(RefCell::new(AllocatorState {
                block,
                claims: [None; MAX_STATE_MACHINES],
                programs: Vec::new(),
            })),
        }
    }

    /// Run `f` with exclusive access to the block.
    pub fn with_block<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&mut B) -> R,
    {
        self.with_state(|state| f(&mut state.block))
    }

    fn with_state<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&mut AllocatorState<B>) -> R,
    {
        self.state.lock(|state| {
            let mut state = state.borrow_mut();
            f(&mut *state)
        })
    }

    /// Give the block back. Only possible once every session is gone.
    pub fn into_block(self) -> B {
        self.state.into_inner().into_inner().block
    }

    /// Number of state machines not claimed by a session.
    pub fn free_state_machines(&self) -> usize {
        self.with_state(|state| {
            let count = usize::from(state.block.state_machine_count()).min(MAX_STATE_MACHINES);
            state
                .claims
                .iter()
                .take(count)
                .filter(|claim| claim.is_none())
                .count()
        })
    }

    /// Number of distinct programs resident in instruction memory.
    pub fn resident_programs(&self) -> usize {
        self.with_state(|state| state.programs.len())
    }

    /// Claim a free state machine, load the microprogram and configure it for `config`.
    ///
    /// The session starts [`Configured`](SessionState::Configured): call
    /// [`Session::enable`] before sending frames.
    ///
    /// # Errors
    ///
    /// - [`Error::PinUnavailable`] when the pin is outside the block's range or already
    ///   bound to another session.
    /// - [`Error::WidthMismatch`] when `config.order` is wider than the block's output
    ///   shift register.
    /// - [`Error::NoChannelAvailable`] when every state machine is claimed.
    /// - [`Error::UnachievableTiming`] when no divider reaches `config.bit_rate_hz`.
    /// - [`Error::ProgramLoadFailed`] when instruction memory is exhausted or the chip's
    ///   sub-periods do not fit the delay field.
    ///
    /// Nothing is claimed or loaded when an error is returned.
    pub fn acquire(&self, config: SessionConfig) -> Result<Session<'_, B>> {
        let microprogram = Microprogram::new(config.chip.bit_cycles)?;
        let bit_width = config.order.bit_width();
        let (sm, origin, timing, register_bits) = self
            .with_state(|state| {
                if config.pin >= state.block.pin_count() || state.pin_in_use(config.pin) {
                    return Err(Error::PinUnavailable(config.pin));
                }
                let register_bits = state.block.shift_register_bits();
                if bit_width > register_bits {
                    return Err(Error::WidthMismatch {
                        expected: register_bits,
                        requested: bit_width,
                    });
                }
                let sm = state.free_state_machine().ok_or(Error::NoChannelAvailable)?;
                let timing = timing::derive(
                    state.block.system_clock_hz(),
                    config.bit_rate_hz,
                    config.chip.bit_cycles,
                )?;
                let origin = state.load_program(&microprogram)?;

                let (wrap_source, wrap_target) = microprogram.wrap();
                let sm_config = StateMachineConfig {
                    origin,
                    wrap: (
                        origin.saturating_add(wrap_source),
                        origin.saturating_add(wrap_target),
                    ),
                    side_set_pin: config.pin,
                    set_pin: config.pin,
                    side_set_bits: SIDE_SET_BITS,
                    shift_out: ShiftConfig {
                        direction: ShiftDirection::Left,
                        auto_fill: true,
                        threshold: bit_width,
                    },
                    join_tx_fifo: true,
                    clock_divider: timing.clock_divider,
                };
                if let Err(err) = state.block.configure(sm, &sm_config) {
                    state.unload_program(config.chip.bit_cycles);
                    return Err(err);
                }
                if let Some(claim) = state.claims.get_mut(usize::from(sm)) {
                    *claim = Some(config.pin);
                }
                Ok((sm, origin, timing, register_bits))
            })
            .inspect_err(|err| {
                error!("allocator: acquire on GPIO {} failed: {}", config.pin, err);
            })?;

        info!(
            "session: state machine {} claimed for GPIO {} ({} pixels, program at {})",
            sm,
            config.pin,
            config.len,
            origin
        );
        Ok(Session {
            allocator: self,
            sm,
            origin,
            config,
            encoder: PixelEncoder::new(config.order, register_bits),
            timing,
            engine: TransferEngine::new(config.chip.reset),
            state: SessionState::Configured,
        })
    }

    fn release(&self, sm: u8, bit_cycles: BitCycles) {
        self.with_state(|state| {
            state.block.set_enabled(sm, false);
            state.block.clear_fifos(sm);
            if let Some(claim) = state.claims.get_mut(usize::from(sm)) {
                *claim = None;
            }
            state.unload_program(bit_cycles);
        });
    }
}

// ============================================================================
// Session
// ============================================================================

/// Lifecycle state of a [`Session`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SessionState {
    /// Program loaded and state machine configured, not running.
    Configured,
    /// Running; frames can be sent.
    Enabled,
    /// Stopped after running. Queued words were abandoned.
    Disabled,
    /// State machine and program returned to the allocator.
    Released,
}

/// Exclusive use of one state machine driving one strip.
///
/// Methods take `&mut self`, so frames on one session never interleave. Dropping a
/// session releases it.
pub struct Session<'a, B: PioBlock> {
    allocator: &'a PioAllocator<B>,
    sm: u8,
    origin: u8,
    config: SessionConfig,
    encoder: PixelEncoder,
    timing: TimingParameters,
    engine: TransferEngine,
    state: SessionState,
}

impl<B: PioBlock> Session<'_, B> {
    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// Timing currently programmed into the state machine.
    #[must_use]
    pub const fn timing(&self) -> TimingParameters {
        self.timing
    }

    /// Index of the claimed state machine.
    #[must_use]
    pub const fn state_machine(&self) -> u8 {
        self.sm
    }

    /// Instruction memory address the program runs from.
    #[must_use]
    pub const fn program_origin(&self) -> u8 {
        self.origin
    }

    /// The configuration this session was acquired with.
    #[must_use]
    pub const fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// GPIO driving the strip.
    #[must_use]
    pub const fn pin(&self) -> u8 {
        self.config.pin
    }

    /// Pixels on the strip.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.config.len
    }

    /// True for a zero-length strip.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.config.len == 0
    }

    /// Encoder for the configured order.
    #[must_use]
    pub const fn encoder(&self) -> PixelEncoder {
        self.encoder
    }

    /// Re-derive the clock divider for `bit_rate_hz` and apply it.
    ///
    /// Allowed in every state but `Released`. A running state machine picks up the new
    /// divider on its next cycle, so change rates between frames.
    ///
    /// # Errors
    ///
    /// [`Error::SessionClosed`] after release, or [`Error::UnachievableTiming`], in which
    /// case the previous timing stays in effect.
    pub fn configure_timing(&mut self, bit_rate_hz: u32) -> Result<TimingParameters> {
        self.ensure_open()?;
        let system_clock_hz = self.allocator.with_block(|block| block.system_clock_hz());
        let timing = timing::derive(system_clock_hz, bit_rate_hz, self.config.chip.bit_cycles)?;
        let sm = self.sm;
        self.allocator
            .with_block(|block| block.set_clock_divider(sm, timing.clock_divider));
        self.timing = timing;
        self.config.bit_rate_hz = bit_rate_hz;
        Ok(timing)
    }

    /// Start the state machine.
    ///
    /// Also valid from `Disabled`, which restarts a session after an aborted frame. The
    /// program restarts at its origin with the line low, and the next frame waits one
    /// reset period so the strip sees a clean start.
    ///
    /// # Errors
    ///
    /// [`Error::AlreadyEnabled`] or [`Error::SessionClosed`].
    pub fn enable(&mut self) -> Result<()> {
        match self.state {
            SessionState::Released => return Err(Error::SessionClosed),
            SessionState::Enabled => return Err(Error::AlreadyEnabled),
            SessionState::Configured | SessionState::Disabled => {}
        }
        let sm = self.sm;
        self.allocator.with_block(|block| {
            block.clear_fifos(sm);
            block.set_enabled(sm, true);
        });
        self.engine.start_latch();
        self.state = SessionState::Enabled;
        info!("session: state machine {} enabled", sm);
        Ok(())
    }

    /// Stop the state machine. Words still queued are abandoned.
    ///
    /// # Errors
    ///
    /// [`Error::NotEnabled`] or [`Error::SessionClosed`].
    pub fn disable(&mut self) -> Result<()> {
        self.ensure_enabled()?;
        self.stop();
        self.state = SessionState::Disabled;
        info!("session: state machine {} disabled", self.sm);
        Ok(())
    }

    /// Return the state machine and program to the allocator. Disables first if needed.
    ///
    /// # Errors
    ///
    /// [`Error::SessionClosed`] when already released.
    pub fn release(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.allocator.release(self.sm, self.config.chip.bit_cycles);
        self.state = SessionState::Released;
        info!("session: state machine {} released", self.sm);
        Ok(())
    }

    /// Send pre-encoded words as one frame.
    ///
    /// Returns once the last word has left the pin; the latch gap is still running. The
    /// next frame on this session waits it out before its first word.
    ///
    /// # Errors
    ///
    /// [`Error::NotEnabled`] or [`Error::SessionClosed`].
    pub fn transmit<I>(&mut self, words: I) -> Result<FrameStats>
    where
        I: IntoIterator<Item = ShiftWord>,
    {
        self.ensure_enabled()?;
        let mut queue = StateMachineTx {
            allocator: self.allocator,
            sm: self.sm,
        };
        Ok(self.engine.transmit(&mut queue, words))
    }

    /// Encode `pixels` in `order`, send them and wait until the strip has latched them.
    ///
    /// A wrong `order` of the configured width is not detectable: the strip simply shows
    /// swapped channels. A frame whose length differs from the strip's is sent as is and
    /// logged.
    ///
    /// # Errors
    ///
    /// [`Error::NotEnabled`] or [`Error::SessionClosed`], or [`Error::WidthMismatch`]
    /// when `order` has a different channel count than the configured order. The state
    /// machine pulls a fixed number of bits per pixel, so nothing is sent.
    pub fn send_frame(&mut self, pixels: &[Pixel], order: ChannelOrder) -> Result<FrameStats> {
        self.ensure_enabled()?;
        if order.bit_width() != self.encoder.bit_width() {
            warn!(
                "session: {}-bit order rejected on a {}-bit session",
                order.bit_width(),
                self.encoder.bit_width()
            );
            return Err(Error::WidthMismatch {
                expected: self.encoder.bit_width(),
                requested: order.bit_width(),
            });
        }
        if pixels.len() != self.config.len {
            warn!(
                "session: frame of {} pixels sent to a strip of {}",
                pixels.len(),
                self.config.len
            );
        }
        let encoder = PixelEncoder::new(order, self.encoder.register_bits());
        self.send_latched(pixels.iter().map(|pixel| encoder.encode(*pixel)))
    }

    /// [`send_frame`](Self::send_frame) in the configured order.
    ///
    /// # Errors
    ///
    /// [`Error::NotEnabled`] or [`Error::SessionClosed`].
    pub fn write_frame(&mut self, pixels: &[Pixel]) -> Result<FrameStats> {
        self.send_frame(pixels, self.config.order)
    }

    /// Turn every pixel off.
    ///
    /// # Errors
    ///
    /// [`Error::NotEnabled`] or [`Error::SessionClosed`].
    pub fn clear(&mut self) -> Result<FrameStats> {
        self.ensure_enabled()?;
        let off = self.encoder.encode(Pixel::OFF);
        self.send_latched(core::iter::repeat_n(off, self.config.len))
    }

    fn send_latched<I>(&mut self, words: I) -> Result<FrameStats>
    where
        I: IntoIterator<Item = ShiftWord>,
    {
        let stats = self.transmit(words)?;
        self.engine.wait_latched();
        Ok(stats)
    }

    fn stop(&mut self) {
        let sm = self.sm;
        self.allocator.with_block(|block| {
            block.set_enabled(sm, false);
            block.clear_fifos(sm);
        });
    }

    const fn ensure_open(&self) -> Result<()> {
        match self.state {
            SessionState::Released => Err(Error::SessionClosed),
            _ => Ok(()),
        }
    }

    const fn ensure_enabled(&self) -> Result<()> {
        match self.state {
            SessionState::Released => Err(Error::SessionClosed),
            SessionState::Enabled => Ok(()),
            SessionState::Configured | SessionState::Disabled => Err(Error::NotEnabled),
        }
    }
}

impl<B: PioBlock> Drop for Session<'_, B> {
    fn drop(&mut self) {
        if self.state != SessionState::Released {
            let _ = self.release();
        }
    }
}

impl<B: PioBlock> SmartLedsWrite for Session<'_, B> {
    type Error = Error;
    type Color = RGB8;

    fn write<T, I>(&mut self, iterator: T) -> Result<(), Self::Error>
    where
        T: IntoIterator<Item = I>,
        I: Into<Self::Color>,
    {
        self.ensure_enabled()?;
        let encoder = self.encoder;
        self.send_latched(
            iterator
                .into_iter()
                .map(|color| encoder.encode(Pixel::Rgb(color.into()))),
        )?;
        Ok(())
    }
}

/// The claimed state machine's TX FIFO. Locks the allocator per poll only.
struct StateMachineTx<'a, B: PioBlock> {
    allocator: &'a PioAllocator<B>,
    sm: u8,
}

impl<B: PioBlock> TxQueue for StateMachineTx<'_, B> {
    fn try_push(&mut self, word: ShiftWord) -> bool {
        let sm = self.sm;
        self.allocator
            .with_block(|block| block.try_push(sm, word.value()))
    }

    fn is_drained(&mut self) -> bool {
        let sm = self.sm;
        self.allocator.with_block(|block| block.is_tx_drained(sm))
    }
}
