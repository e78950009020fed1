//! Webcam try-on smoke demo.
//!
//! Opens the first webcam, runs the overlay pipeline with scripted landmarks
//! (a face centered in the view, no inference backend required), and writes
//! a snapshot of the composited overlay to `tryon.png`.
//!
//! Usage: `cargo run --example tryon -- path/to/overlay.png`

use std::sync::Arc;
use std::time::Duration;

use kagami::assets::AssetCache;
use kagami::capture::{CaptureSession, Event, SessionOptions};
use kagami::compositor::RenderOptions;
use kagami::landmark::{FaceEstimate, Keypoint, LandmarkScheme, ScriptedModel};
use kagami::viewport::Resolution;
use kagami::webcam::Webcam;

fn main() -> anyhow::Result<()> {
    kagami::init_logger!();

    let asset = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "overlay.png".into());

    // A face roughly centered in a 640x480 view, eyes level and 120 px apart.
    let face = FaceEstimate::new(
        vec![Keypoint::new(260.0, 200.0), Keypoint::new(380.0, 200.0)],
        LandmarkScheme::default(),
    );

    let session = CaptureSession::new(
        SessionOptions::default()
            .container(Resolution::new(640, 480))
            .render(RenderOptions {
                asset,
                ..RenderOptions::default()
            }),
        Webcam::open,
        ScriptedModel::repeating(face, 100_000),
        Arc::new(AssetCache::new()),
    );
    session.start()?;

    let events = session.events();
    match events.recv() {
        Ok(Event::Ready) => println!("camera ready, compositing..."),
        Ok(Event::Error(e)) => anyhow::bail!("session failed: {e}"),
        other => anyhow::bail!("unexpected startup event: {other:?}"),
    }

    // Let the loop run for ~100 composited frames, then snapshot while the
    // overlay is still on the surface.
    while session.frames_composited() < 100 {
        if let Ok(Event::Error(e)) = events.recv_timeout(Duration::from_millis(50)) {
            anyhow::bail!("session failed: {e}");
        }
        if session.frames_processed() > 2000 {
            anyhow::bail!("no overlay after 2000 frames; did the asset load? (see log)");
        }
    }

    std::fs::write("tryon.png", session.snapshot()?)?;
    println!(
        "wrote tryon.png after {} frames ({} composited)",
        session.frames_processed(),
        session.frames_composited(),
    );
    session.stop();
    Ok(())
}
