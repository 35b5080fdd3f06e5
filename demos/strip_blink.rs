#![allow(missing_docs)]
//! Blink an 8-LED strip between blue and white on the emulated PIO block and print
//! what the strip latched.

use std::process::ExitCode;

use pio_strip::pio_host::HostPio;
use pio_strip::pixel::{Frame, Pixel, colors};
use pio_strip::timing::ChipTiming;
use pio_strip::{PioAllocator, Result, SessionConfig};

const PIN: u8 = 0;
const LEN: usize = 8;

fn main() -> ExitCode {
    match inner_main() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{err}");
            ExitCode::FAILURE
        }
    }
}

fn inner_main() -> Result<()> {
    let mut pio = HostPio::rp2040();
    pio.attach_strip(PIN, ChipTiming::WS2812, LEN);
    let allocator = PioAllocator::new(pio);

    let mut session = allocator.acquire(SessionConfig::new(PIN, LEN))?;
    let timing = session.timing();
    println!(
        "state machine {}: divider {}+{}/256, {} ns per bit",
        session.state_machine(),
        timing.divider_int(),
        timing.divider_frac(),
        timing.bit_period_ns()
    );
    session.enable()?;

    let palette = [Pixel::from(colors::BLUE), Pixel::from(colors::LIGHT_GRAY)];
    let mut frame0 = Frame::<LEN>::new();
    let mut frame1 = frame0;
    for pixel_index in 0..LEN {
        frame0[pixel_index] = palette[pixel_index % 2];
        frame1[pixel_index] = palette[(pixel_index + 1) % 2];
    }

    for _ in 0..3 {
        for frame in [&frame0, &frame1] {
            let stats = session.write_frame(&**frame)?;
            println!("sent {} words ({} waited)", stats.words, stats.backpressure_waits);
        }
    }
    session.release()?;

    allocator.with_block(|pio| {
        if let Some(strip) = pio.strip(PIN) {
            println!("{} frames latched", strip.latch_count());
            if let Some(last) = strip.last_frame() {
                println!("last frame: {last:?}");
            }
        }
    });
    Ok(())
}
