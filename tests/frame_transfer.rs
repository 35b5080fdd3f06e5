#![allow(missing_docs)]
//! Host-level end-to-end tests: frames through the FIFO onto simulated strips.

use pio_strip::pio_host::{HostPio, JOINED_FIFO_DEPTH};
use pio_strip::pixel::{ChannelOrder, Frame, Pixel, PixelEncoder, ShiftWord, colors};
use pio_strip::Error;
use pio_strip::session::{PioAllocator, SessionConfig, SessionState};
use pio_strip::timing::ChipTiming;
use smart_leds::{RGB8, SmartLedsWrite};

const LEN: usize = 25;

fn strip_allocator(chip: ChipTiming, len: usize) -> PioAllocator<HostPio> {
    let mut pio = HostPio::rp2040();
    pio.attach_strip(0, chip, len);
    PioAllocator::new(pio)
}

fn words_seen(allocator: &PioAllocator<HostPio>) -> Vec<u32> {
    allocator.with_block(|pio| pio.strip(0).unwrap().words().to_vec())
}

fn pixels_seen(allocator: &PioAllocator<HostPio>) -> Vec<Pixel> {
    allocator.with_block(|pio| pio.strip(0).unwrap().pixels().to_vec())
}

#[test]
fn red_frame_on_an_rgb_strip() {
    let rgb_strip = ChipTiming {
        order: ChannelOrder::Rgb,
        ..ChipTiming::WS2812
    };
    let allocator = strip_allocator(rgb_strip, LEN);
    let mut session = allocator
        .acquire(SessionConfig::new(0, LEN).with_order(ChannelOrder::Rgb))
        .unwrap();
    session.enable().unwrap();

    let red = [Pixel::rgb(255, 0, 0); LEN];
    let first = session.send_frame(&red, ChannelOrder::Rgb).unwrap();
    let second = session.send_frame(&red, ChannelOrder::Rgb).unwrap();
    assert_eq!(first.words, LEN);
    assert_eq!(second.words, LEN);

    assert_eq!(words_seen(&allocator), vec![0xFF00_0000; 2 * LEN]);
    assert_eq!(pixels_seen(&allocator), red.to_vec());
    allocator.with_block(|pio| {
        let strip = pio.strip(0).unwrap();
        assert_eq!(strip.latch_count(), 2);
        assert_eq!(strip.forwarded_bits(), 0);
        assert!(strip.min_gap_ns().unwrap() >= 50_000);
    });
}

#[test]
fn backpressure_blocks_without_losing_words() {
    let allocator = strip_allocator(ChipTiming::WS2812, LEN);
    let mut session = allocator.acquire(SessionConfig::new(0, LEN)).unwrap();
    session.enable().unwrap();

    let encoder = session.encoder();
    let frame: Vec<Pixel> = (0..LEN)
        .map(|index| Pixel::rgb(index as u8, 0xFF - index as u8, 0x40))
        .collect();
    let words: Vec<ShiftWord> = frame.iter().map(|pixel| encoder.encode(*pixel)).collect();

    let stats = session.transmit(words.iter().copied()).unwrap();
    assert_eq!(stats.words, LEN);
    assert_eq!(stats.backpressure_waits, LEN - JOINED_FIFO_DEPTH);

    let sent: Vec<u32> = words.iter().map(|word| word.value()).collect();
    assert_eq!(words_seen(&allocator), sent);

    // The latch gap is still running; the next frame waits it out.
    session.clear().unwrap();
    let strip_frames =
        allocator.with_block(|pio| pio.strip(0).unwrap().latched_frames().to_vec());
    assert_eq!(strip_frames.len(), 2);
    assert_eq!(strip_frames[0], frame);
    assert!(strip_frames[1].iter().all(Pixel::is_off));
}

#[test]
fn zero_frames_are_idempotent() {
    let allocator = strip_allocator(ChipTiming::WS2812, 8);
    let mut session = allocator.acquire(SessionConfig::new(0, 8)).unwrap();
    session.enable().unwrap();

    session.write_frame(&[Pixel::rgb(7, 7, 7); 8]).unwrap();
    session.clear().unwrap();
    let after_first = words_seen(&allocator);
    session.send_frame(&[Pixel::OFF; 8], ChannelOrder::Grb).unwrap();
    let after_second = words_seen(&allocator);

    let first_zero = &after_first[8..];
    let second_zero = &after_second[16..];
    assert_eq!(first_zero, second_zero);
    assert!(first_zero.iter().all(|&word| word == 0));
    assert!(pixels_seen(&allocator).iter().all(Pixel::is_off));
}

#[test]
fn wrong_channel_order_shows_swapped_colors_without_error() {
    let allocator = strip_allocator(ChipTiming::WS2812, 4);
    let mut session = allocator.acquire(SessionConfig::new(0, 4)).unwrap();
    session.enable().unwrap();

    let stats = session
        .send_frame(&[Pixel::from(colors::RED); 4], ChannelOrder::Rgb)
        .unwrap();
    assert_eq!(stats.words, 4);
    assert_eq!(pixels_seen(&allocator), vec![Pixel::rgb(0, 255, 0); 4]);
}

#[test]
fn long_frames_are_forwarded_and_short_frames_update_the_head() {
    let allocator = strip_allocator(ChipTiming::WS2812, 3);
    let mut session = allocator.acquire(SessionConfig::new(0, 3)).unwrap();
    session.enable().unwrap();

    session.write_frame(&[Pixel::rgb(1, 1, 1); 5]).unwrap();
    session.write_frame(&[Pixel::rgb(2, 2, 2)]).unwrap();

    allocator.with_block(|pio| {
        let strip = pio.strip(0).unwrap();
        assert_eq!(strip.forwarded_bits(), 2 * 24);
        assert_eq!(
            strip.pixels(),
            &[Pixel::rgb(2, 2, 2), Pixel::rgb(1, 1, 1), Pixel::rgb(1, 1, 1)]
        );
    });
}

#[test]
fn rgbw_strip_gets_full_width_words() {
    let allocator = strip_allocator(ChipTiming::SK6812, 2);
    let mut session = allocator
        .acquire(SessionConfig::new(0, 2).with_chip(ChipTiming::SK6812))
        .unwrap();
    session.enable().unwrap();

    let frame = Frame::<2>::from([Pixel::rgbw(1, 2, 3, 4), Pixel::rgbw(0, 0, 0, 255)]);
    session.write_frame(&*frame).unwrap();

    assert_eq!(words_seen(&allocator), vec![0x0201_0304, 0x0000_00FF]);
    assert_eq!(pixels_seen(&allocator), frame.to_vec());
}

#[test]
fn narrow_shift_register_still_shows_red_as_red() {
    let mut pio = HostPio::rp2040().with_shift_register_bits(24);
    pio.attach_strip(0, ChipTiming::WS2812, 2);
    let allocator = PioAllocator::new(pio);
    let mut session = allocator.acquire(SessionConfig::new(0, 2)).unwrap();
    assert_eq!(session.encoder().shift(), 0);
    session.enable().unwrap();

    let red = [Pixel::rgb(255, 0, 0); 2];
    assert_eq!(session.write_frame(&red).unwrap().words, 2);

    assert_eq!(words_seen(&allocator), vec![0x0000_FF00; 2]);
    assert_eq!(pixels_seen(&allocator), red.to_vec());
}

#[test]
fn order_wider_than_the_shift_register_claims_nothing() {
    let mut pio = HostPio::rp2040().with_shift_register_bits(24);
    pio.attach_strip(0, ChipTiming::SK6812, 2);
    let allocator = PioAllocator::new(pio);

    assert_eq!(
        allocator
            .acquire(SessionConfig::new(0, 2).with_chip(ChipTiming::SK6812))
            .err(),
        Some(Error::WidthMismatch {
            expected: 24,
            requested: 32
        })
    );
    assert_eq!(allocator.free_state_machines(), 4);
    assert_eq!(allocator.resident_programs(), 0);
}

#[test]
fn frame_order_must_keep_the_session_width() {
    let allocator = strip_allocator(ChipTiming::SK6812, 2);
    let mut session = allocator
        .acquire(
            SessionConfig::new(0, 2)
                .with_chip(ChipTiming::SK6812)
                .with_order(ChannelOrder::Grb),
        )
        .unwrap();
    session.enable().unwrap();

    assert_eq!(
        session.send_frame(&[Pixel::rgbw(1, 2, 3, 4); 2], ChannelOrder::Grbw),
        Err(Error::WidthMismatch {
            expected: 24,
            requested: 32
        })
    );
    assert_eq!(session.state(), SessionState::Enabled);
    assert!(words_seen(&allocator).is_empty());

    let allocator = strip_allocator(ChipTiming::WS2812, 2);
    let mut session = allocator.acquire(SessionConfig::new(0, 2)).unwrap();
    session.enable().unwrap();
    assert_eq!(
        session.send_frame(&[Pixel::rgb(1, 2, 3); 2], ChannelOrder::Rgbw),
        Err(Error::WidthMismatch {
            expected: 24,
            requested: 32
        })
    );
    assert!(words_seen(&allocator).is_empty());

    // Same width, different order: accepted.
    assert!(session.send_frame(&[Pixel::rgb(1, 2, 3); 2], ChannelOrder::Rgb).is_ok());
    assert_eq!(words_seen(&allocator).len(), 2);
}

#[test]
fn smart_leds_writer_uses_the_configured_order() {
    let allocator = strip_allocator(ChipTiming::WS2812, 3);
    let mut session = allocator.acquire(SessionConfig::new(0, 3)).unwrap();
    session.enable().unwrap();

    let colors = [colors::RED, colors::LIME, RGB8::new(0, 0, 255)];
    session.write(colors.iter().copied()).unwrap();

    let expected: Vec<Pixel> = colors.iter().copied().map(Pixel::from).collect();
    assert_eq!(pixels_seen(&allocator), expected);
    let grb = PixelEncoder::new(ChannelOrder::Grb, 32);
    assert_eq!(
        words_seen(&allocator),
        expected
            .iter()
            .map(|pixel| grb.encode(*pixel).value())
            .collect::<Vec<_>>()
    );
}

#[test]
fn sessions_on_one_block_drive_their_own_strips() {
    let mut pio = HostPio::rp2040();
    pio.attach_strip(0, ChipTiming::WS2812, 2)
        .attach_strip(1, ChipTiming::WS2811, 2);
    let allocator = PioAllocator::new(pio);

    let mut fast = allocator.acquire(SessionConfig::new(0, 2)).unwrap();
    let mut slow = allocator
        .acquire(SessionConfig::new(1, 2).with_chip(ChipTiming::WS2811))
        .unwrap();
    fast.enable().unwrap();
    slow.enable().unwrap();

    fast.write_frame(&[Pixel::rgb(0, 0, 1); 2]).unwrap();
    slow.write_frame(&[Pixel::rgb(3, 0, 0); 2]).unwrap();

    allocator.with_block(|pio| {
        assert_eq!(pio.strip(0).unwrap().pixels(), &[Pixel::rgb(0, 0, 1); 2]);
        assert_eq!(pio.strip(1).unwrap().pixels(), &[Pixel::rgb(3, 0, 0); 2]);
    });
}

#[test]
fn disable_abandons_queued_words() {
    let allocator = strip_allocator(ChipTiming::WS2812, LEN);
    let mut session = allocator.acquire(SessionConfig::new(0, LEN)).unwrap();
    let sm = session.state_machine();
    session.enable().unwrap();

    let encoder = session.encoder();
    for _ in 0..JOINED_FIFO_DEPTH {
        let pushed = allocator.with_block(|pio| {
            pio_strip::pio_block::PioBlock::try_push(pio, sm, encoder.encode(Pixel::OFF).value())
        });
        assert!(pushed);
    }
    session.disable().unwrap();
    session.enable().unwrap();
    session.write_frame(&[Pixel::rgb(5, 5, 5); LEN]).unwrap();

    assert_eq!(words_seen(&allocator).len(), LEN);
    assert_eq!(pixels_seen(&allocator), vec![Pixel::rgb(5, 5, 5); LEN]);
}
