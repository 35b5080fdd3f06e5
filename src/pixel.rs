//! Pixels, wire channel orders and their encoding into shift-register words.
//!
//! A PIO state machine configured to shift left sends bits from the top of its 32-bit
//! output shift register. A 24-bit GRB payload therefore has to sit in bits 31..8, not
//! 23..0, or every color on the strip comes out shifted. [`PixelEncoder`] owns that
//! alignment:
//!
//! ```rust
//! use pio_strip::pixel::{ChannelOrder, Pixel, PixelEncoder};
//!
//! let encoder = PixelEncoder::new(ChannelOrder::Rgb, 32);
//! assert_eq!(encoder.encode(Pixel::rgb(255, 0, 0)).value(), 0xFF00_0000);
//!
//! // A peripheral that consumes exactly 24 bits wants no padding at all.
//! let packed = PixelEncoder::new(ChannelOrder::Rgb, 24);
//! assert_eq!(packed.encode(Pixel::rgb(255, 0, 0)).value(), 0x00FF_0000);
//! ```

use core::ops::{Deref, DerefMut};

use smart_leds::RGB8;

/// Predefined RGB color constants from the `smart_leds` crate.
#[doc(inline)]
pub use smart_leds::colors;

/// One LED's color: three channels, or three plus a dedicated white channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Pixel {
    /// Red, green, blue.
    Rgb(RGB8),
    /// Red, green, blue and white.
    Rgbw(RGB8, u8),
}

#[cfg(feature = "defmt")]
impl defmt::Format for Pixel {
    fn format(&self, fmt: defmt::Formatter<'_>) {
        match self {
            Self::Rgb(rgb) => defmt::write!(fmt, "Rgb({}, {}, {})", rgb.r, rgb.g, rgb.b),
            Self::Rgbw(rgb, white) => {
                defmt::write!(fmt, "Rgbw({}, {}, {}, {})", rgb.r, rgb.g, rgb.b, white);
            }
        }
    }
}

impl Pixel {
    /// All channels off.
    pub const OFF: Self = Self::Rgb(RGB8::new(0, 0, 0));

    /// Three-channel pixel.
    #[must_use]
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self::Rgb(RGB8::new(r, g, b))
    }

    /// Four-channel pixel.
    #[must_use]
    pub const fn rgbw(r: u8, g: u8, b: u8, w: u8) -> Self {
        Self::Rgbw(RGB8::new(r, g, b), w)
    }

    /// Intensity of one channel. White reads as 0 on an RGB pixel.
    #[must_use]
    pub const fn channel(&self, channel: Channel) -> u8 {
        let (rgb, white) = match *self {
            Self::Rgb(rgb) => (rgb, 0),
            Self::Rgbw(rgb, white) => (rgb, white),
        };
        match channel {
            Channel::Red => rgb.r,
            Channel::Green => rgb.g,
            Channel::Blue => rgb.b,
            Channel::White => white,
        }
    }

    /// True when every channel is zero.
    #[must_use]
    pub const fn is_off(&self) -> bool {
        match *self {
            Self::Rgb(rgb) => rgb.r == 0 && rgb.g == 0 && rgb.b == 0,
            Self::Rgbw(rgb, white) => rgb.r == 0 && rgb.g == 0 && rgb.b == 0 && white == 0,
        }
    }
}

impl Default for Pixel {
    fn default() -> Self {
        Self::OFF
    }
}

impl From<RGB8> for Pixel {
    fn from(rgb: RGB8) -> Self {
        Self::Rgb(rgb)
    }
}

impl From<(u8, u8, u8)> for Pixel {
    fn from((r, g, b): (u8, u8, u8)) -> Self {
        Self::rgb(r, g, b)
    }
}

impl From<(u8, u8, u8, u8)> for Pixel {
    fn from((r, g, b, w): (u8, u8, u8, u8)) -> Self {
        Self::rgbw(r, g, b, w)
    }
}

/// A logical color channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Channel {
    /// Red.
    Red,
    /// Green.
    Green,
    /// Blue.
    Blue,
    /// Dedicated white die (RGBW chips only).
    White,
}

/// The byte order a chip expects on the wire, first-sent channel first.
///
/// Chips disagree (WS2812 wants GRB, many WS2811 strips want RGB). Getting this wrong
/// is silent: the strip has no way to report it, it just shows the wrong colors.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ChannelOrder {
    /// Red, green, blue.
    Rgb,
    /// Red, blue, green.
    Rbg,
    /// Green, red, blue (WS2812).
    #[default]
    Grb,
    /// Green, blue, red.
    Gbr,
    /// Blue, red, green.
    Brg,
    /// Blue, green, red.
    Bgr,
    /// Red, green, blue, white.
    Rgbw,
    /// Green, red, blue, white (SK6812).
    Grbw,
}

impl ChannelOrder {
    /// Channels in transmission order.
    #[must_use]
    pub const fn channels(self) -> &'static [Channel] {
        use Channel::{Blue, Green, Red, White};
        match self {
            Self::Rgb => &[Red, Green, Blue],
            Self::Rbg => &[Red, Blue, Green],
            Self::Grb => &[Green, Red, Blue],
            Self::Gbr => &[Green, Blue, Red],
            Self::Brg => &[Blue, Red, Green],
            Self::Bgr => &[Blue, Green, Red],
            Self::Rgbw => &[Red, Green, Blue, White],
            Self::Grbw => &[Green, Red, Blue, White],
        }
    }

    /// Payload bits per pixel: 24 or 32.
    #[must_use]
    pub const fn bit_width(self) -> u8 {
        match self {
            Self::Rgbw | Self::Grbw => 32,
            Self::Rgb | Self::Rbg | Self::Grb | Self::Gbr | Self::Brg | Self::Bgr => 24,
        }
    }

    /// True for four-channel orders.
    #[must_use]
    pub const fn has_white(self) -> bool {
        self.bit_width() == 32
    }
}

/// One pixel's bits, left-justified in the state machine's shift register.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ShiftWord(pub u32);

impl ShiftWord {
    /// The raw FIFO word.
    #[must_use]
    pub const fn value(self) -> u32 {
        self.0
    }
}

impl From<ShiftWord> for u32 {
    fn from(word: ShiftWord) -> Self {
        word.0
    }
}

/// Pack `pixel` in `order` and left-justify it in a `register_bits`-wide register.
///
/// `register_bits` is clamped to `bit_width..=32`. See [`PixelEncoder`].
#[must_use]
pub fn encode(pixel: Pixel, order: ChannelOrder, register_bits: u8) -> ShiftWord {
    PixelEncoder::new(order, register_bits).encode(pixel)
}

/// Encodes pixels for one channel order and shift register width.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PixelEncoder {
    order: ChannelOrder,
    shift: u8,
}

impl PixelEncoder {
    /// Create an encoder.
    ///
    /// `register_bits` is the width of the register the peripheral actually shifts out
    /// of (32 for an RP2040/RP1 PIO shifting left). It is clamped into
    /// `order.bit_width()..=32`.
    #[must_use]
    pub const fn new(order: ChannelOrder, register_bits: u8) -> Self {
        let bit_width = order.bit_width();
        let register_bits = if register_bits < bit_width {
            bit_width
        } else if register_bits > 32 {
            32
        } else {
            register_bits
        };
        Self {
            order,
            shift: register_bits - bit_width,
        }
    }

    /// Channel order this encoder packs.
    #[must_use]
    pub const fn order(&self) -> ChannelOrder {
        self.order
    }

    /// Left shift applied after packing (zero padding below the payload).
    #[must_use]
    pub const fn shift(&self) -> u8 {
        self.shift
    }

    /// Payload bits per pixel.
    #[must_use]
    pub const fn bit_width(&self) -> u8 {
        self.order.bit_width()
    }

    /// Width of the register the payload is left-justified in.
    #[must_use]
    pub const fn register_bits(&self) -> u8 {
        self.order.bit_width() + self.shift
    }

    /// Encode one pixel.
    #[must_use]
    pub fn encode(&self, pixel: Pixel) -> ShiftWord {
        let packed = self
            .order
            .channels()
            .iter()
            .fold(0_u32, |word, &channel| (word << 8) | u32::from(pixel.channel(channel)));
        ShiftWord(packed << self.shift)
    }

    /// Inverse of [`encode`](Self::encode) for this encoder's order.
    ///
    /// Padding bits are ignored. Returns an RGBW pixel for four-channel orders.
    #[must_use]
    pub fn decode(&self, word: ShiftWord) -> Pixel {
        let channels = self.order.channels();
        let mut packed = word.0 >> self.shift;
        let mut rgb = RGB8::default();
        let mut white = 0;
        for &channel in channels.iter().rev() {
            let byte = (packed & 0xFF) as u8;
            packed >>= 8;
            match channel {
                Channel::Red => rgb.r = byte,
                Channel::Green => rgb.g = byte,
                Channel::Blue => rgb.b = byte,
                Channel::White => white = byte,
            }
        }
        if self.order.has_white() {
            Pixel::Rgbw(rgb, white)
        } else {
            Pixel::Rgb(rgb)
        }
    }
}

/// Fixed-size frame of [`Pixel`]s for an `N`-LED strip.
///
/// Frames deref to `[Pixel; N]`, so pixels can be set by index before the frame is handed to
/// [`Session::write_frame`](crate::session::Session::write_frame).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Frame<const N: usize>(pub [Pixel; N]);

impl<const N: usize> Frame<N> {
    /// Number of LEDs in this frame.
    pub const LEN: usize = N;

    /// Create a new blank (all off) frame.
    #[must_use]
    pub const fn new() -> Self {
        Self([Pixel::OFF; N])
    }

    /// Create a frame filled with a single color.
    #[must_use]
    pub const fn filled(pixel: Pixel) -> Self {
        Self([pixel; N])
    }
}

impl<const N: usize> Deref for Frame<N> {
    type Target = [Pixel; N];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<const N: usize> DerefMut for Frame<N> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl<const N: usize> From<[Pixel; N]> for Frame<N> {
    fn from(array: [Pixel; N]) -> Self {
        Self(array)
    }
}

impl<const N: usize> From<Frame<N>> for [Pixel; N] {
    fn from(frame: Frame<N>) -> Self {
        frame.0
    }
}

impl<const N: usize> Default for Frame<N> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grb_puts_green_in_the_top_byte() {
        let encoder = PixelEncoder::new(ChannelOrder::Grb, 32);
        assert_eq!(encoder.encode(Pixel::rgb(0x11, 0x22, 0x33)), ShiftWord(0x2211_3300));
    }

    #[test]
    fn rgbw_fills_the_whole_register() {
        let encoder = PixelEncoder::new(ChannelOrder::Grbw, 32);
        assert_eq!(encoder.shift(), 0);
        assert_eq!(
            encoder.encode(Pixel::rgbw(0x11, 0x22, 0x33, 0x44)),
            ShiftWord(0x2211_3344)
        );
    }

    #[test]
    fn register_width_is_clamped() {
        assert_eq!(PixelEncoder::new(ChannelOrder::Rgb, 8).shift(), 0);
        assert_eq!(PixelEncoder::new(ChannelOrder::Rgb, 64).shift(), 8);
        assert_eq!(PixelEncoder::new(ChannelOrder::Rgbw, 24).shift(), 0);
    }

    #[test]
    fn white_is_zero_for_rgb_pixels_and_dropped_for_rgb_orders() {
        let rgbw = PixelEncoder::new(ChannelOrder::Rgbw, 32);
        assert_eq!(rgbw.encode(Pixel::rgb(1, 2, 3)), ShiftWord(0x0102_0300));

        let rgb = PixelEncoder::new(ChannelOrder::Rgb, 32);
        assert_eq!(rgb.encode(Pixel::rgbw(1, 2, 3, 4)), ShiftWord(0x0102_0300));
    }

    #[test]
    fn decode_ignores_padding() {
        let encoder = PixelEncoder::new(ChannelOrder::Bgr, 32);
        assert_eq!(encoder.decode(ShiftWord(0x0302_01FF)), Pixel::rgb(1, 2, 3));
    }

    #[test]
    fn frame_deref_and_fill() {
        let mut frame = Frame::<4>::new();
        assert!(frame.iter().all(Pixel::is_off));
        frame[2] = Pixel::rgb(9, 9, 9);
        assert_eq!(frame[2], Pixel::rgb(9, 9, 9));
        assert_eq!(Frame::<3>::filled(Pixel::rgb(1, 0, 0)).0, [Pixel::rgb(1, 0, 0); 3]);
        assert_eq!(Frame::<3>::LEN, 3);
    }
}
