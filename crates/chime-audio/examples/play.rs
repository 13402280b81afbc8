//! Load two WAV files and play them back to back through the single voice.
//!
//! Usage: `cargo run --example play -- beep.wav music.wav`

use std::time::Duration;

use chime_audio::Session;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut args = std::env::args().skip(1);
    let beep = args.next().unwrap_or_else(|| "assets/beep.wav".to_string());
    let music = args.next().unwrap_or_else(|| "assets/music.wav".to_string());

    let mut session = Session::open_default()?;
    session.load(&beep, "beep")?;
    session.load(&music, "music")?;

    for name in ["beep", "music", "beep"] {
        println!("playing {name}");
        session.play(name)?;
        session.wait_until_finished(Duration::from_millis(10))?;
    }

    Ok(())
}
