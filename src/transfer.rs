//! Frame transfer: FIFO feeding under backpressure and the reset/latch gap.
//!
//! A strip applies a frame only after its data line has been low for the chip's reset
//! time. Words pushed sooner are appended to the previous frame and shifted on down the
//! strip, so the engine remembers when the line went idle and holds the next frame until
//! the latch deadline has passed.

use core::hint::spin_loop;

use embassy_time::{Duration, Instant, block_for};

use crate::pixel::ShiftWord;

/// A state machine's transmit side, as the engine sees it.
pub trait TxQueue {
    /// Push one word if there is room. Never blocks.
    fn try_push(&mut self, word: ShiftWord) -> bool;

    /// True once every pushed word has been shifted out and the line is idle low.
    fn is_drained(&mut self) -> bool;
}

/// What happened during one [`TransferEngine::transmit`] call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FrameStats {
    /// Words delivered to the FIFO. Always the full input; nothing is dropped.
    pub words: usize,
    /// Words that found the FIFO full and had to wait for it to drain.
    pub backpressure_waits: usize,
}

/// Pushes frames through a [`TxQueue`] and enforces the reset/latch gap between them.
#[derive(Clone, Copy, Debug)]
pub struct TransferEngine {
    reset: Duration,
    latch_deadline: Option<Instant>,
}

impl TransferEngine {
    /// Create an engine for a chip whose reset/latch time is `reset`.
    #[must_use]
    pub const fn new(reset: Duration) -> Self {
        Self {
            reset,
            latch_deadline: None,
        }
    }

    /// The reset/latch time enforced after every frame.
    #[must_use]
    pub const fn reset(&self) -> Duration {
        self.reset
    }

    /// When the previous frame is guaranteed latched, if that is still pending.
    #[must_use]
    pub const fn latch_deadline(&self) -> Option<Instant> {
        self.latch_deadline
    }

    /// Send `words` as one frame.
    ///
    /// Waits out the previous frame's latch gap, pushes every word in order (spinning
    /// while the FIFO is full), waits for the FIFO to drain and starts the latch gap for
    /// this frame. The wait on a full FIFO is the only suspension point and cannot be
    /// cancelled; stopping the state machine is the way to abort a frame.
    pub fn transmit<Q, I>(&mut self, queue: &mut Q, words: I) -> FrameStats
    where
        Q: TxQueue + ?Sized,
        I: IntoIterator<Item = ShiftWord>,
    {
        self.wait_latched();

        let mut stats = FrameStats::default();
        for word in words {
            if !queue.try_push(word) {
                stats.backpressure_waits = stats.backpressure_waits.saturating_add(1);
                while !queue.try_push(word) {
                    spin_loop();
                }
            }
            stats.words = stats.words.saturating_add(1);
        }

        if stats.words > 0 {
            while !queue.is_drained() {
                spin_loop();
            }
            self.start_latch();
        }
        trace!(
            "transfer: {} words sent, {} backpressure waits",
            stats.words,
            stats.backpressure_waits
        );
        stats
    }

    /// Block until the previous frame's latch gap has elapsed.
    pub fn wait_latched(&mut self) {
        if let Some(deadline) = self.latch_deadline.take() {
            let now = Instant::now();
            if deadline > now {
                block_for(deadline.saturating_duration_since(now));
            }
        }
    }

    /// The line just went (or was forced) low: restart the latch gap from now.
    pub fn start_latch(&mut self) {
        self.latch_deadline = Some(Instant::now() + self.reset);
    }
}
