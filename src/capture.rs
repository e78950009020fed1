//! The continuous acquisition→detect→composite cycle.
//!
//! A [`CaptureSession`] binds a frame source to a drawing surface and drives
//! the per-frame pipeline on a dedicated thread: read a frame, conform it to
//! the viewport, estimate landmarks, clear the surface, composite the overlay
//! when both a face and a loaded asset are available. Frames are processed
//! strictly sequentially; iteration N+1 only starts once iteration N has
//! settled, so nothing ever races on the surface.
//!
//! Lifecycle signals reach the host through a channel of [`Event`]s; fatal
//! errors ([`Error::is_fatal`]) halt the loop, per-frame problems are
//! absorbed and only suppress that frame's output.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::JoinHandle;

use crossbeam::channel::{unbounded, Receiver, Sender};

use crate::assets::AssetCache;
use crate::compositor::{Compositor, PlacementConfig, RenderOptions};
use crate::detector::Detector;
use crate::image::Image;
use crate::landmark::LandmarkModel;
use crate::surface::Surface;
use crate::timer::FpsCounter;
use crate::viewport::{Resolution, Viewport};
use crate::{Error, Result};

/// A source of camera frames.
///
/// [`next_frame`][Self::next_frame] blocks until a frame is available, which
/// is what paces the loop: the camera delivers at its negotiated rate, the
/// way a render-loop callback paces the original design. Implementations
/// should return within roughly a frame interval.
pub trait FrameSource: Send + 'static {
    fn next_frame(&mut self) -> anyhow::Result<Image>;
}

/// Lifecycle signals emitted by a [`CaptureSession`].
#[derive(Debug)]
pub enum Event {
    /// Detector bring-up finished; frames are being processed from now on.
    Ready,
    /// Face presence changed. Emitted on transitions, so a consumer sees
    /// the exact found/lost sequence without per-frame noise.
    FaceDetected(bool),
    /// A fatal error; the loop has halted.
    Error(Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Initializing,
    Detecting,
    Stopped,
}

/// Configuration for a [`CaptureSession`].
#[derive(Debug, Clone)]
pub struct SessionOptions {
    container: Resolution,
    mirror: bool,
    render: RenderOptions,
    placement: PlacementConfig,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            container: Resolution::RES_720P,
            mirror: true,
            render: RenderOptions::default(),
            placement: PlacementConfig::default(),
        }
    }
}

impl SessionOptions {
    /// Sets the host container size; camera and surface resolution follow it.
    pub fn container(mut self, container: Resolution) -> Self {
        self.container = container;
        self
    }

    /// Enables or disables the horizontal selfie mirror.
    pub fn mirror(mut self, mirror: bool) -> Self {
        self.mirror = mirror;
        self
    }

    pub fn render(mut self, render: RenderOptions) -> Self {
        self.render = render;
        self
    }

    pub fn placement(mut self, placement: PlacementConfig) -> Self {
        self.placement = placement;
        self
    }
}

type SourceFactory = Box<dyn FnOnce(Resolution) -> Result<Box<dyn FrameSource>> + Send>;

/// Everything the loop thread takes ownership of when it starts.
struct Deps {
    source_factory: SourceFactory,
    detector: Detector,
    compositor: Compositor,
}

struct Shared {
    active: AtomicBool,
    state: Mutex<SessionState>,
    surface: Mutex<Surface>,
    viewport: RwLock<Viewport>,
    render: RwLock<RenderOptions>,
    frames: AtomicU64,
    composited: AtomicU64,
    events: Sender<Event>,
    cache: Arc<AssetCache>,
}

impl Shared {
    fn alive(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    fn send(&self, event: Event) {
        // The host may have dropped its receiver; that only mutes signals.
        self.events.send(event).ok();
    }
}

/// The live binding between a camera stream and a drawing surface.
///
/// At most one detection loop runs per session, ever: `start` spawns the loop
/// thread at most once, `stop` is idempotent and terminal.
pub struct CaptureSession {
    shared: Arc<Shared>,
    deps: Mutex<Option<Deps>>,
    thread: Mutex<Option<JoinHandle<()>>>,
    events: Receiver<Event>,
}

impl CaptureSession {
    /// Creates an idle session.
    ///
    /// `source` is invoked on the loop thread with the capture resolution
    /// once `start` is called, so camera permission acquisition happens
    /// during initialization, not construction.
    pub fn new<F, S, M>(
        options: SessionOptions,
        source: F,
        model: M,
        cache: Arc<AssetCache>,
    ) -> Self
    where
        F: FnOnce(Resolution) -> Result<S> + Send + 'static,
        S: FrameSource,
        M: LandmarkModel,
    {
        let viewport = Viewport::new(options.container).mirror(options.mirror);
        let (events_tx, events_rx) = unbounded();
        let shared = Arc::new(Shared {
            active: AtomicBool::new(false),
            state: Mutex::new(SessionState::Idle),
            surface: Mutex::new(Surface::new(viewport.capture_request())),
            viewport: RwLock::new(viewport),
            render: RwLock::new(options.render),
            frames: AtomicU64::new(0),
            composited: AtomicU64::new(0),
            events: events_tx,
            cache,
        });
        let deps = Deps {
            source_factory: Box::new(move |res| {
                source(res).map(|s| Box::new(s) as Box<dyn FrameSource>)
            }),
            detector: Detector::new(model),
            compositor: Compositor::new(options.placement),
        };
        Self {
            shared,
            deps: Mutex::new(Some(deps)),
            thread: Mutex::new(None),
            events: events_rx,
        }
    }

    /// Starts the capture loop.
    ///
    /// Idempotent: calling `start` while the loop is running (or after the
    /// session stopped) does nothing rather than spawning a second loop.
    pub fn start(&self) -> std::io::Result<()> {
        let Some(deps) = self.deps.lock().unwrap().take() else {
            log::debug!("start: capture loop already started");
            return Ok(());
        };

        self.shared.active.store(true, Ordering::SeqCst);
        *self.shared.state.lock().unwrap() = SessionState::Initializing;

        let shared = self.shared.clone();
        let handle = std::thread::Builder::new()
            .name("capture-loop".into())
            .spawn(move || run_loop(&shared, deps))?;
        *self.thread.lock().unwrap() = Some(handle);
        Ok(())
    }

    /// Stops the session.
    ///
    /// Halts the loop, joins its thread (releasing the camera), and leaves
    /// the surface cleared. Safe to call multiple times and safe to call
    /// while initialization is still in flight: every suspension point in the
    /// loop re-checks the active flag before acting on its result.
    pub fn stop(&self) {
        self.shared.active.store(false, Ordering::SeqCst);
        // A never-started session must not become startable after stop.
        self.deps.lock().unwrap().take();

        if let Some(handle) = self.thread.lock().unwrap().take() {
            if handle.join().is_err() {
                log::error!("capture loop thread panicked");
            }
        }
        *self.shared.state.lock().unwrap() = SessionState::Stopped;
        self.shared.surface.lock().unwrap().clear();
    }

    pub fn state(&self) -> SessionState {
        *self.shared.state.lock().unwrap()
    }

    /// The lifecycle signal channel.
    ///
    /// The receiver can be cloned or moved to whatever thread renders the
    /// host UI.
    pub fn events(&self) -> Receiver<Event> {
        self.events.clone()
    }

    /// Serializes the current surface contents as PNG.
    ///
    /// A pure read of the surface state; the loop is unaffected.
    pub fn snapshot(&self) -> anyhow::Result<Vec<u8>> {
        self.shared.surface.lock().unwrap().snapshot_png()
    }

    pub fn render_options(&self) -> RenderOptions {
        self.shared.render.read().unwrap().clone()
    }

    /// Replaces the render options; the next frame re-reads them.
    pub fn set_render_options(&self, options: RenderOptions) {
        *self.shared.render.write().unwrap() = options;
    }

    /// Slider entry point: adjusts only the scale multiplier.
    pub fn set_scale(&self, scale: f32) {
        self.shared.render.write().unwrap().scale = scale;
    }

    /// Slider entry point: adjusts only the overlay opacity.
    pub fn set_opacity(&self, opacity: f32) {
        self.shared.render.write().unwrap().opacity = opacity;
    }

    /// Host container resize; frames conform to the new size from the next
    /// iteration on.
    pub fn resize(&self, container: Resolution) {
        self.shared.viewport.write().unwrap().set_container(container);
    }

    pub fn frames_processed(&self) -> u64 {
        self.shared.frames.load(Ordering::Relaxed)
    }

    /// Number of frames on which an overlay was actually drawn.
    pub fn frames_composited(&self) -> u64 {
        self.shared.composited.load(Ordering::Relaxed)
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_loop(shared: &Shared, deps: Deps) {
    let Deps {
        source_factory,
        mut detector,
        mut compositor,
    } = deps;

    // Suspension point: camera acquisition (permission prompt included).
    let request = shared.viewport.read().unwrap().capture_request();
    let mut source = match source_factory(request) {
        Ok(source) => source,
        Err(e) => return halt(shared, Some(e)),
    };
    if !shared.alive() {
        return halt(shared, None);
    }

    // Suspension point: one-time model bring-up.
    if let Err(e) = detector.initialize() {
        return halt(shared, Some(e));
    }
    if !shared.alive() {
        return halt(shared, None);
    }

    // Warm the asset cache without holding up the first frame; the loop polls
    // the cache and starts drawing once the asset resolves.
    let asset = shared.render.read().unwrap().asset.clone();
    if !asset.is_empty() {
        let cache = shared.cache.clone();
        std::thread::Builder::new()
            .name("asset-preload".into())
            .spawn(move || {
                cache.preload([asset.as_str()]);
            })
            .ok();
    }

    *shared.state.lock().unwrap() = SessionState::Detecting;
    shared.send(Event::Ready);
    log::debug!("capture loop ready, entering detection");

    let mut fps = FpsCounter::new("capture");
    let mut last_presence = None;

    while shared.alive() {
        let frame = match source.next_frame() {
            Ok(frame) => frame,
            Err(e) => return halt(shared, Some(Error::Camera(e.to_string()))),
        };
        if !shared.alive() {
            break;
        }

        let viewport = *shared.viewport.read().unwrap();
        let frame = viewport.conform(frame);
        shared.frames.fetch_add(1, Ordering::Relaxed);

        let faces = match detector.estimate(&frame) {
            Ok(faces) => faces,
            Err(e) => {
                // Transient: suppress this frame's output, keep the loop.
                log::trace!("estimate failed, skipping frame: {:#}", e);
                continue;
            }
        };

        let render = shared.render.read().unwrap().clone();
        let asset = shared.cache.get(&render.asset);
        let present = !faces.is_empty();

        {
            let mut surface = shared.surface.lock().unwrap();
            surface.match_resolution(viewport.capture_request());
            // One clear per iteration, drawn or not: no accumulation, and a
            // lost face leaves no stale overlay behind.
            surface.clear();
            if let (Some(face), Some(asset)) = (faces.first(), asset.as_deref()) {
                match compositor.composite(face, asset, &render, &mut surface) {
                    Ok(_) => {
                        shared.composited.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(skip) => log::trace!("composite skipped: {:?}", skip),
                }
            }
        }

        if !present {
            compositor.reset();
        }
        if last_presence != Some(present) {
            shared.send(Event::FaceDetected(present));
            last_presence = Some(present);
        }
        fps.tick();
    }

    halt(shared, None);
}

/// Common loop exit: publish a fatal error if there is one, mark the session
/// stopped, and leave the surface in its defined (cleared) state.
fn halt(shared: &Shared, error: Option<Error>) {
    if let Some(error) = error {
        log::error!("capture session halted: {}", error);
        shared.send(Event::Error(error));
    } else {
        log::debug!("capture loop exited");
    }
    shared.active.store(false, Ordering::SeqCst);
    *shared.state.lock().unwrap() = SessionState::Stopped;
    shared.surface.lock().unwrap().clear();
}

#[cfg(test)]
mod tests {
    use crate::landmark::ScriptedModel;

    use super::*;

    struct NeverSource;

    impl FrameSource for NeverSource {
        fn next_frame(&mut self) -> anyhow::Result<Image> {
            // Deliver frames slowly enough for tests to interleave stops.
            std::thread::sleep(std::time::Duration::from_millis(1));
            Ok(Image::new(4, 4))
        }
    }

    fn idle_session() -> CaptureSession {
        CaptureSession::new(
            SessionOptions::default().container(Resolution::new(4, 4)),
            |_res| Ok(NeverSource),
            ScriptedModel::new([]),
            Arc::new(AssetCache::new()),
        )
    }

    #[test]
    fn stop_before_start_is_safe() {
        let session = idle_session();
        session.stop();
        session.stop();
        assert_eq!(session.state(), SessionState::Stopped);
        // Stopped is terminal: start afterwards must not spawn a loop.
        session.start().unwrap();
        assert_eq!(session.state(), SessionState::Stopped);
    }

    #[test]
    fn permission_failure_surfaces_and_halts() {
        let session = CaptureSession::new(
            SessionOptions::default(),
            |_res| -> Result<NeverSource> { Err(Error::Permission("denied by user".into())) },
            ScriptedModel::new([]),
            Arc::new(AssetCache::new()),
        );
        session.start().unwrap();
        let event = session
            .events()
            .recv_timeout(std::time::Duration::from_secs(5))
            .unwrap();
        assert!(matches!(event, Event::Error(Error::Permission(_))));
        session.stop();
        assert_eq!(session.state(), SessionState::Stopped);
    }

    #[test]
    fn start_twice_spawns_one_loop() {
        let session = idle_session();
        session.start().unwrap();
        session.start().unwrap();
        let events = session.events();
        // Exactly one Ready, from the single loop.
        assert!(matches!(
            events.recv_timeout(std::time::Duration::from_secs(5)),
            Ok(Event::Ready)
        ));
        session.stop();
        assert!(events.try_iter().all(|e| !matches!(e, Event::Ready)));
    }
}
