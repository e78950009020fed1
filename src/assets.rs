//! Overlay asset loading and caching.
//!
//! Assets are keyed by their source reference and memoized for the lifetime
//! of the cache: one fetch+decode per distinct reference per session, no
//! eviction. Loads are single-flight: concurrent [`AssetCache::load`] calls
//! for the same reference collapse onto one underlying fetch, and every
//! caller receives the same shared asset.
//!
//! Supported reference forms: `http://` URLs (fetched with a minimal
//! HTTP/1.1 GET), filesystem paths, `data:` URIs with base64 payloads, and
//! raw base64 strings (decoded as PNG by default).

use std::collections::HashMap;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpStream;
use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::{bail, Context};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use once_cell::sync::OnceCell;

use crate::image::Image;
use crate::{Error, Result};

/// The decoded contents of an overlay asset.
#[derive(Debug)]
pub enum Payload {
    /// A decoded raster image; drawable by the compositor.
    Image(Image),
    /// An opaque byte payload (3D model formats). Cached and shared, but
    /// never composited by this crate.
    Blob(Vec<u8>),
}

/// A fully loaded overlay asset.
///
/// Immutable after insertion into the cache; shared read-only across all
/// frames (and sessions) that use it.
#[derive(Debug)]
pub struct OverlayAsset {
    reference: String,
    payload: Payload,
}

impl OverlayAsset {
    pub fn new(reference: impl Into<String>, payload: Payload) -> Self {
        Self {
            reference: reference.into(),
            payload,
        }
    }

    pub fn reference(&self) -> &str {
        &self.reference
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// The decoded image, if this asset is drawable.
    pub fn image(&self) -> Option<&Image> {
        match &self.payload {
            Payload::Image(image) => Some(image),
            Payload::Blob(_) => None,
        }
    }
}

/// Fetches the raw bytes behind an asset reference.
///
/// The default implementation handles the reference forms listed in the
/// module docs; tests substitute their own to count fetches or inject
/// failures.
pub trait AssetFetcher: Send + Sync + 'static {
    fn fetch(&self, reference: &str) -> anyhow::Result<Vec<u8>>;
}

/// Memoizing asset store with single-flight loads.
pub struct AssetCache {
    fetcher: Box<dyn AssetFetcher>,
    // One cell per reference; the cell's blocking initialization doubles as
    // the in-flight registration. A failed init leaves the cell empty, so a
    // later load can retry.
    slots: Mutex<HashMap<String, Arc<OnceCell<Arc<OverlayAsset>>>>>,
}

impl Default for AssetCache {
    fn default() -> Self {
        Self::new()
    }
}

impl AssetCache {
    pub fn new() -> Self {
        Self::with_fetcher(DefaultFetcher)
    }

    pub fn with_fetcher<F: AssetFetcher>(fetcher: F) -> Self {
        Self {
            fetcher: Box::new(fetcher),
            slots: Mutex::new(HashMap::new()),
        }
    }

    fn slot(&self, reference: &str) -> Arc<OnceCell<Arc<OverlayAsset>>> {
        let mut slots = self.slots.lock().unwrap();
        slots
            .entry(reference.to_string())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone()
    }

    /// Returns the asset for `reference`, fetching and decoding it if this is
    /// the first request.
    ///
    /// Blocks while another caller is already loading the same reference and
    /// then returns that caller's result without a second fetch.
    pub fn load(&self, reference: &str) -> Result<Arc<OverlayAsset>> {
        let slot = self.slot(reference);
        slot.get_or_try_init(|| self.fetch_and_decode(reference).map(Arc::new))
            .cloned()
    }

    /// Non-blocking peek: the asset if it is fully loaded, `None` while it is
    /// absent or still in flight.
    ///
    /// This is what the capture loop polls each frame; it can never observe a
    /// partially decoded asset.
    pub fn get(&self, reference: &str) -> Option<Arc<OverlayAsset>> {
        self.slots.lock().unwrap().get(reference)?.get().cloned()
    }

    /// Best-effort batch warm-up.
    ///
    /// Failures are isolated per reference: they are logged and the rest of
    /// the batch proceeds. Returns how many of the given references are
    /// resolved afterwards.
    pub fn preload<I, S>(&self, references: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut loaded = 0;
        for reference in references {
            let reference = reference.as_ref();
            match self.load(reference) {
                Ok(_) => loaded += 1,
                Err(e) => log::warn!("preload: {}", e),
            }
        }
        loaded
    }

    /// Seeds the cache with an already-decoded asset.
    ///
    /// Insert-if-absent: an existing entry for the same reference wins and
    /// the new asset is dropped.
    pub fn insert(&self, asset: OverlayAsset) {
        let slot = self.slot(asset.reference());
        if slot.set(Arc::new(asset)).is_err() {
            log::debug!("insert: reference already cached, keeping existing asset");
        }
    }

    fn fetch_and_decode(&self, reference: &str) -> Result<OverlayAsset> {
        let bytes = self
            .fetcher
            .fetch(reference)
            .map_err(|e| Error::asset(reference, format_args!("{:#}", e)))?;

        let payload = if is_model_reference(reference) {
            Payload::Blob(bytes)
        } else {
            Payload::Image(Image::decode(&bytes).map_err(|e| Error::asset(reference, e))?)
        };

        match &payload {
            Payload::Image(image) => {
                log::debug!("loaded overlay image '{}' ({:?})", reference, image)
            }
            Payload::Blob(bytes) => {
                log::debug!("cached model payload '{}' ({} bytes)", reference, bytes.len())
            }
        }
        Ok(OverlayAsset::new(reference, payload))
    }
}

/// Decides between image decoding and opaque blob storage from the reference
/// alone (extension or data-URI mime type).
fn is_model_reference(reference: &str) -> bool {
    if let Some(rest) = reference.strip_prefix("data:") {
        let mime = rest.split([';', ',']).next().unwrap_or("");
        return mime.starts_with("model/");
    }
    let path = reference.split(['?', '#']).next().unwrap_or(reference);
    matches!(
        Path::new(path).extension().and_then(|e| e.to_str()),
        Some("glb" | "gltf")
    )
}

/// Reference dispatch for [`AssetCache::new`].
struct DefaultFetcher;

impl AssetFetcher for DefaultFetcher {
    fn fetch(&self, reference: &str) -> anyhow::Result<Vec<u8>> {
        if let Some(rest) = reference.strip_prefix("data:") {
            return decode_data_uri(rest);
        }
        if reference.starts_with("https://") {
            // The built-in fetcher speaks plain HTTP only; hosts fetch TLS
            // assets themselves and hand them over as paths or data URIs.
            bail!("https references are not supported by the built-in fetcher");
        }
        if let Some(rest) = reference.strip_prefix("http://") {
            return http_get(rest);
        }
        if Path::new(reference).exists() {
            return std::fs::read(reference).context("failed to read asset file");
        }
        // Raw base64 payload, PNG by convention.
        BASE64
            .decode(reference.trim())
            .map_err(|_| anyhow::anyhow!("reference is neither an existing path nor base64 data"))
    }
}

fn decode_data_uri(rest: &str) -> anyhow::Result<Vec<u8>> {
    let (header, payload) = rest
        .split_once(',')
        .context("malformed data URI (missing ',')")?;
    if !header.ends_with(";base64") {
        bail!("only base64 data URIs are supported");
    }
    BASE64
        .decode(payload.trim())
        .context("invalid base64 payload in data URI")
}

/// Minimal HTTP/1.1 GET. `rest` is the URL with the `http://` prefix already
/// stripped.
fn http_get(rest: &str) -> anyhow::Result<Vec<u8>> {
    let (host_port, path) = match rest.split_once('/') {
        Some((hp, path)) => (hp, format!("/{path}")),
        None => (rest, "/".to_string()),
    };
    let host = host_port.split(':').next().unwrap_or(host_port);
    let addr = if host_port.contains(':') {
        host_port.to_string()
    } else {
        format!("{host_port}:80")
    };

    let mut stream = TcpStream::connect(&addr).with_context(|| format!("connect to {addr}"))?;
    write!(
        stream,
        "GET {path} HTTP/1.1\r\nHost: {host}\r\nConnection: close\r\n\r\n"
    )?;

    let mut stream = BufReader::new(stream);
    let mut line = String::new();
    stream.read_line(&mut line)?;
    log::trace!("response: {}", line.trim());
    if !line.starts_with("HTTP/1.1 200") && !line.starts_with("HTTP/1.0 200") {
        bail!("unexpected response: {}", line.trim());
    }

    // Skip headers; `Connection: close` lets us read the body to EOF.
    loop {
        line.clear();
        stream.read_line(&mut line)?;
        if line == "\r\n" || line == "\n" || line.is_empty() {
            break;
        }
        log::trace!("response header: {}", line.trim());
    }

    let mut body = Vec::new();
    stream.read_to_end(&mut body)?;
    Ok(body)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;
    use std::time::Duration;

    use super::*;

    /// Serves a tiny generated PNG for `ok*` references, errors otherwise.
    struct CountingFetcher {
        calls: AtomicUsize,
        delay: Duration,
    }

    impl CountingFetcher {
        fn new(delay: Duration) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                delay,
            }
        }
    }

    impl AssetFetcher for CountingFetcher {
        fn fetch(&self, reference: &str) -> anyhow::Result<Vec<u8>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(self.delay);
            if reference.starts_with("ok") {
                Ok(Image::new(2, 2).encode_png().unwrap())
            } else {
                bail!("404")
            }
        }
    }

    fn cache_with_counter(delay: Duration) -> (Arc<AssetCache>, Arc<CountingFetcher>) {
        // The counter needs to stay observable after the cache takes the
        // fetcher, so the test fetcher is a forwarding handle.
        struct Handle(Arc<CountingFetcher>);
        impl AssetFetcher for Handle {
            fn fetch(&self, reference: &str) -> anyhow::Result<Vec<u8>> {
                self.0.fetch(reference)
            }
        }

        let counter = Arc::new(CountingFetcher::new(delay));
        let cache = Arc::new(AssetCache::with_fetcher(Handle(counter.clone())));
        (cache, counter)
    }

    #[test]
    fn load_memoizes() {
        let (cache, counter) = cache_with_counter(Duration::ZERO);
        let a = cache.load("ok.png").unwrap();
        let b = cache.load("ok.png").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(counter.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn concurrent_loads_are_single_flight() {
        let (cache, counter) = cache_with_counter(Duration::from_millis(30));
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    cache.load("ok.png").unwrap()
                })
            })
            .collect();

        let assets: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(counter.calls.load(Ordering::SeqCst), 1);
        assert!(assets.iter().all(|a| Arc::ptr_eq(a, &assets[0])));
    }

    #[test]
    fn failed_load_can_retry() {
        struct FlakyFetcher(AtomicUsize);
        impl AssetFetcher for FlakyFetcher {
            fn fetch(&self, _: &str) -> anyhow::Result<Vec<u8>> {
                if self.0.fetch_add(1, Ordering::SeqCst) == 0 {
                    bail!("connection reset")
                }
                Ok(Image::new(1, 1).encode_png().unwrap())
            }
        }

        let cache = AssetCache::with_fetcher(FlakyFetcher(AtomicUsize::new(0)));
        assert!(matches!(
            cache.load("flaky.png"),
            Err(Error::AssetLoad { .. })
        ));
        assert!(cache.get("flaky.png").is_none());
        assert!(cache.load("flaky.png").is_ok());
    }

    #[test]
    fn preload_isolates_failures() {
        let (cache, _) = cache_with_counter(Duration::ZERO);
        assert_eq!(cache.preload(["ok-a.png", "missing.png", "ok-b.png"]), 2);
        assert!(cache.get("ok-a.png").is_some());
        assert!(cache.get("missing.png").is_none());
        assert!(cache.get("ok-b.png").is_some());
    }

    #[test]
    fn get_does_not_trigger_loads() {
        let (cache, counter) = cache_with_counter(Duration::ZERO);
        assert!(cache.get("ok.png").is_none());
        assert_eq!(counter.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn insert_does_not_overwrite() {
        let cache = AssetCache::new();
        cache.insert(OverlayAsset::new("seed", Payload::Blob(vec![1])));
        cache.insert(OverlayAsset::new("seed", Payload::Blob(vec![2])));
        let asset = cache.get("seed").unwrap();
        match asset.payload() {
            Payload::Blob(bytes) => assert_eq!(bytes, &[1]),
            Payload::Image(_) => panic!("expected blob"),
        }
    }

    #[test]
    fn data_uri_decodes() {
        let png = Image::new(3, 2).encode_png().unwrap();
        let reference = format!("data:image/png;base64,{}", BASE64.encode(&png));
        let cache = AssetCache::new();
        let asset = cache.load(&reference).unwrap();
        let image = asset.image().unwrap();
        assert_eq!((image.width(), image.height()), (3, 2));
    }

    #[test]
    fn raw_base64_defaults_to_image() {
        let png = Image::new(2, 2).encode_png().unwrap();
        let cache = AssetCache::new();
        let asset = cache.load(&BASE64.encode(&png)).unwrap();
        assert!(asset.image().is_some());
    }

    #[test]
    fn model_references_become_blobs() {
        assert!(is_model_reference("http://cdn.example/frames.glb"));
        assert!(is_model_reference("data:model/gltf-binary;base64,AAAA"));
        assert!(!is_model_reference("glasses.png"));

        struct Raw;
        impl AssetFetcher for Raw {
            fn fetch(&self, _: &str) -> anyhow::Result<Vec<u8>> {
                Ok(vec![0x67, 0x6c, 0x54, 0x46])
            }
        }
        let cache = AssetCache::with_fetcher(Raw);
        let asset = cache.load("http://cdn.example/frames.glb").unwrap();
        assert!(asset.image().is_none());
    }

    #[test]
    fn https_is_rejected_with_context() {
        let cache = AssetCache::new();
        let err = cache.load("https://cdn.example/glasses.png").unwrap_err();
        assert!(err.to_string().contains("https"));
    }
}
