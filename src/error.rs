use derive_more::{Debug, Display, Error};

/// Errors returned by timing derivation and [`Session`](crate::session::Session) operations.
///
/// All errors are local and synchronous. None is retried internally: retrying a
/// failed claim without freeing a state machine fails the same way.
///
/// A frame sent with the wrong [`ChannelOrder`](crate::pixel::ChannelOrder) is *not* an
/// error. The line protocol has no acknowledgment, so the strip just shows the wrong colors.
#[derive(Debug, Display, Error, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// Every state machine of the PIO block is already claimed by a session.
    #[display("no free PIO state machine")]
    NoChannelAvailable,

    /// The microprogram does not fit in the free instruction memory, or its
    /// sub-period delays do not fit the instruction delay field.
    #[display("PIO program could not be loaded")]
    ProgramLoadFailed,

    /// No representable clock divider gets within tolerance of the target bit rate.
    #[display(
        "bit rate {target_bit_rate_hz} Hz is unachievable from a {system_clock_hz} Hz system clock"
    )]
    UnachievableTiming {
        /// System clock feeding the state machine.
        system_clock_hz: u32,
        /// Requested line bit rate.
        target_bit_rate_hz: u32,
    },

    /// `enable` was called on a session that is already running.
    #[display("session is already enabled")]
    AlreadyEnabled,

    /// The operation needs a running state machine.
    #[display("session is not enabled")]
    NotEnabled,

    /// The session was released; it accepts no further calls.
    #[display("session is closed")]
    SessionClosed,

    /// The pin is outside the GPIO range the PIO block can drive.
    #[display("GPIO {_0} cannot be driven by this PIO block")]
    PinUnavailable(#[error(not(source))] u8),

    /// The pixel width does not match the words the state machine pulls, either because
    /// the shift register is narrower than the channel order or because a frame's order
    /// has a different width than the session's.
    #[display("{requested}-bit pixels do not match {expected}-bit words")]
    WidthMismatch {
        /// Bits per word the state machine was configured for.
        expected: u8,
        /// Bits per pixel of the requested channel order.
        requested: u8,
    },
}

/// Result alias used throughout the crate.
pub type Result<T, E = Error> = core::result::Result<T, E>;
