//! End-to-end capture session tests with an injected frame source and a
//! scripted landmark model.

use std::sync::Arc;
use std::time::Duration;

use kagami::assets::{AssetCache, OverlayAsset, Payload};
use kagami::capture::{CaptureSession, Event, FrameSource, SessionOptions, SessionState};
use kagami::compositor::RenderOptions;
use kagami::image::Image;
use kagami::landmark::{FaceEstimate, Keypoint, LandmarkScheme, ScriptedModel};
use kagami::viewport::Resolution;

const TIMEOUT: Duration = Duration::from_secs(5);

/// Delivers blank frames at a few hundred FPS; the scripted model decides
/// what is "seen" in them.
struct TestSource {
    resolution: Resolution,
}

impl FrameSource for TestSource {
    fn next_frame(&mut self) -> anyhow::Result<Image> {
        std::thread::sleep(Duration::from_millis(2));
        Ok(Image::new(self.resolution.width(), self.resolution.height()))
    }
}

fn eyes_120px_apart() -> FaceEstimate {
    FaceEstimate::new(
        vec![Keypoint::new(100.0, 150.0), Keypoint::new(220.0, 150.0)],
        LandmarkScheme::default(),
    )
}

fn seeded_cache() -> Arc<AssetCache> {
    let mut sprite = Image::new(240, 80);
    sprite.clear(kagami::image::Color::WHITE);
    let cache = AssetCache::new();
    cache.insert(OverlayAsset::new("glasses.png", Payload::Image(sprite)));
    Arc::new(cache)
}

fn options() -> SessionOptions {
    SessionOptions::default()
        .container(Resolution::new(640, 480))
        .mirror(false)
        .render(RenderOptions {
            asset: "glasses.png".into(),
            scale: 1.0,
            opacity: 1.0,
        })
}

#[test]
fn full_scenario_single_face_frame() {
    let session = CaptureSession::new(
        options(),
        |res| {
            Ok(TestSource {
                resolution: res,
            })
        },
        // Exactly one frame contains a face; every later frame is empty.
        ScriptedModel::repeating(eyes_120px_apart(), 1),
        seeded_cache(),
    );
    session.start().unwrap();

    let events = session.events();
    assert!(matches!(events.recv_timeout(TIMEOUT), Ok(Event::Ready)));
    assert!(matches!(
        events.recv_timeout(TIMEOUT),
        Ok(Event::FaceDetected(true))
    ));
    assert!(matches!(
        events.recv_timeout(TIMEOUT),
        Ok(Event::FaceDetected(false))
    ));

    // The single face frame produced exactly one composite draw; the
    // face-less frame after it left the surface cleared.
    assert_eq!(session.frames_composited(), 1);
    let png = session.snapshot().unwrap();
    assert!(Image::decode(&png).unwrap().is_blank());
    assert!(session.frames_processed() >= 2);

    session.stop();
    assert_eq!(session.state(), SessionState::Stopped);
}

#[test]
fn no_draw_while_asset_is_unresolved() {
    // The referenced asset is never inserted and the default fetcher cannot
    // find it on disk, so the cache peek stays empty for the whole session.
    let session = CaptureSession::new(
        options(),
        |res| {
            Ok(TestSource {
                resolution: res,
            })
        },
        ScriptedModel::repeating(eyes_120px_apart(), 5),
        Arc::new(AssetCache::new()),
    );
    session.start().unwrap();

    let events = session.events();
    assert!(matches!(events.recv_timeout(TIMEOUT), Ok(Event::Ready)));
    assert!(matches!(
        events.recv_timeout(TIMEOUT),
        Ok(Event::FaceDetected(true))
    ));
    assert!(matches!(
        events.recv_timeout(TIMEOUT),
        Ok(Event::FaceDetected(false))
    ));

    assert_eq!(session.frames_composited(), 0);
    let png = session.snapshot().unwrap();
    assert!(Image::decode(&png).unwrap().is_blank());

    session.stop();
}

#[test]
fn stop_is_idempotent_and_clears() {
    let session = CaptureSession::new(
        options(),
        |res| {
            Ok(TestSource {
                resolution: res,
            })
        },
        ScriptedModel::repeating(eyes_120px_apart(), 10_000),
        seeded_cache(),
    );
    session.start().unwrap();

    let events = session.events();
    assert!(matches!(
        events.recv_timeout(TIMEOUT),
        Ok(Event::FaceDetected(true)) | Ok(Event::Ready)
    ));

    session.stop();
    session.stop();
    assert_eq!(session.state(), SessionState::Stopped);

    // The surface is left in its defined (cleared) state even though the
    // last processed frames drew an overlay.
    let png = session.snapshot().unwrap();
    assert!(Image::decode(&png).unwrap().is_blank());
}

#[test]
fn stop_during_initialization_is_safe() {
    let session = CaptureSession::new(
        options(),
        |res| {
            // Simulate a slow permission prompt / device bring-up.
            std::thread::sleep(Duration::from_millis(150));
            Ok(TestSource {
                resolution: res,
            })
        },
        ScriptedModel::repeating(eyes_120px_apart(), 10),
        seeded_cache(),
    );
    session.start().unwrap();
    std::thread::sleep(Duration::from_millis(10));
    session.stop();

    assert_eq!(session.state(), SessionState::Stopped);
    // The loop noticed the stop right after acquisition and never went live.
    assert!(session
        .events()
        .try_iter()
        .all(|e| !matches!(e, Event::Ready)));
    assert_eq!(session.frames_processed(), 0);
}

#[test]
fn live_option_updates_apply_to_later_frames() {
    let session = CaptureSession::new(
        options(),
        |res| {
            Ok(TestSource {
                resolution: res,
            })
        },
        ScriptedModel::repeating(eyes_120px_apart(), 10_000),
        seeded_cache(),
    );
    session.start().unwrap();

    let events = session.events();
    assert!(matches!(events.recv_timeout(TIMEOUT), Ok(Event::Ready)));

    session.set_opacity(0.25);
    session.set_scale(1.4);
    let updated = session.render_options();
    assert_eq!(updated.opacity, 0.25);
    assert_eq!(updated.scale, 1.4);

    // The loop keeps compositing with the new values.
    let before = session.frames_composited();
    std::thread::sleep(Duration::from_millis(50));
    assert!(session.frames_composited() > before);

    session.stop();
}
