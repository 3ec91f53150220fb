//! # Retrieval Manager
//!
//! The orchestration core: one retrieve call sequences cache lookup,
//! cache-bypass policy, network download, and cache write-back, and
//! reports through the caller's callbacks.
//!
//! ## Delivery model
//!
//! `retrieve` never blocks; it spawns one driver task per request, and
//! that driver is the single delivery context for the request's progress
//! and completion callbacks. The completion callback fires exactly once
//! per call across every branch — hit, not-cached, not-modified,
//! download success, failure, cancellation — enforced mechanically by a
//! consume-once slot rather than by discipline across branches. A
//! cancelled request completes with [`RetrieveError::Cancelled`]; it
//! never reports a spurious success and never goes silent.
//!
//! Cancellation is best-effort and asynchronous: the token is signalled
//! immediately, the transport stops at its next poll. A cancel landing
//! between a cache lookup and its delivery may still deliver the cached
//! image.

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::binding::{BindingTable, ConsumerId};
use crate::cache::{CacheConfig, CacheType, DefaultImageCache, ImageCache};
use crate::config::DownloaderConfig;
use crate::downloader::{DownloadError, Downloader, HttpDownloader, ProgressFn};
use crate::error::RetrieveError;
use crate::image::{Image, ImageSerializer, PassthroughSerializer};
use crate::options::RetrieveOptions;
use crate::resource::ImageResource;
use crate::task::RetrievalTask;

/// Completion callback consuming the terminal result of one retrieval.
pub type CompletionFn = Box<dyn FnOnce(RetrieveResult) + Send>;

/// Terminal result delivered to a completion callback.
///
/// Exactly one of `image` and `error` is set, except for the no-op
/// retrieval of an absent resource which carries neither.
#[derive(Debug)]
pub struct RetrieveResult {
    /// The retrieved image, if the request succeeded.
    pub image: Option<Image>,
    /// The terminal error, if it failed.
    pub error: Option<RetrieveError>,
    /// Where the image came from.
    pub cache_type: CacheType,
    /// The location of the resource the result belongs to.
    pub source: Option<String>,
}

impl RetrieveResult {
    fn empty() -> Self {
        Self {
            image: None,
            error: None,
            cache_type: CacheType::None,
            source: None,
        }
    }

    fn hit(image: Image, cache_type: CacheType, location: &str) -> Self {
        Self {
            image: Some(image),
            error: None,
            cache_type,
            source: Some(location.to_owned()),
        }
    }

    fn downloaded(image: Image, location: &str) -> Self {
        Self::hit(image, CacheType::None, location)
    }

    fn failure(error: RetrieveError, location: &str) -> Self {
        Self {
            image: None,
            error: Some(error),
            cache_type: CacheType::None,
            source: Some(location.to_owned()),
        }
    }

    /// Whether the request produced an image.
    pub fn is_success(&self) -> bool {
        self.error.is_none() && self.image.is_some()
    }

    /// Convert into a `Result`, treating the empty no-op outcome as
    /// not-cached.
    pub fn into_retrieved(self) -> Result<RetrievedImage, RetrieveError> {
        if let Some(error) = self.error {
            return Err(error);
        }
        match self.image {
            Some(image) => Ok(RetrievedImage {
                image,
                cache_type: self.cache_type,
                source: self.source,
            }),
            None => Err(RetrieveError::NotCached(self.source.unwrap_or_default())),
        }
    }
}

/// Successful outcome of [`RetrieveManager::retrieve_async`].
#[derive(Debug)]
pub struct RetrievedImage {
    pub image: Image,
    pub cache_type: CacheType,
    pub source: Option<String>,
}

/// Holds a completion callback until its single use.
///
/// Every delivery branch funnels through [`CompletionSlot::fire`]; the
/// callback is taken out of the slot on the first call, so a second fire
/// finds nothing to run.
struct CompletionSlot {
    inner: Mutex<Option<CompletionFn>>,
}

impl CompletionSlot {
    fn new(completion: Option<CompletionFn>) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(completion),
        })
    }

    fn fire(&self, result: RetrieveResult) {
        let completion = self.inner.lock().take();
        if let Some(completion) = completion {
            completion(result);
        }
    }
}

/// Orchestrates image retrieval across a cache and a downloader.
#[derive(Clone)]
pub struct RetrieveManager {
    cache: Arc<dyn ImageCache>,
    downloader: Arc<dyn Downloader>,
    serializer: Arc<dyn ImageSerializer>,
}

impl RetrieveManager {
    /// Create a manager over explicit collaborators.
    pub fn new(cache: Arc<dyn ImageCache>, downloader: Arc<dyn Downloader>) -> Self {
        Self {
            cache,
            downloader,
            serializer: Arc::new(PassthroughSerializer),
        }
    }

    /// Create a manager with the default cache engine and HTTP downloader.
    pub async fn with_defaults() -> Result<Self, DownloadError> {
        Self::with_config(CacheConfig::default(), DownloaderConfig::default()).await
    }

    /// Create a manager from cache and downloader configurations.
    pub async fn with_config(
        cache_config: CacheConfig,
        downloader_config: DownloaderConfig,
    ) -> Result<Self, DownloadError> {
        let cache = DefaultImageCache::new(cache_config).await?;
        let downloader = HttpDownloader::with_config(downloader_config)?;
        Ok(Self::new(Arc::new(cache), Arc::new(downloader)))
    }

    /// Replace the serializer used when a request does not supply one.
    pub fn with_serializer(mut self, serializer: Arc<dyn ImageSerializer>) -> Self {
        self.serializer = serializer;
        self
    }

    /// Retrieve an image, reporting through callbacks.
    ///
    /// An absent `resource` is a no-op retrieval: the completion is
    /// invoked synchronously with an empty result and the shared terminal
    /// task is returned without touching cache or network. Must be called
    /// within a tokio runtime.
    pub fn retrieve(
        &self,
        resource: Option<ImageResource>,
        options: RetrieveOptions,
        progress: Option<ProgressFn>,
        completion: Option<CompletionFn>,
    ) -> RetrievalTask {
        let slot = CompletionSlot::new(completion);

        let Some(resource) = resource else {
            slot.fire(RetrieveResult::empty());
            return RetrievalTask::empty();
        };

        let task = RetrievalTask::new();
        self.spawn_driver(task.clone(), resource, options, progress, slot);
        task
    }

    /// Retrieve an image and await its terminal result.
    ///
    /// Same pipeline and semantics as [`retrieve`](Self::retrieve), with
    /// the completion callback folded into a future.
    pub async fn retrieve_async(
        &self,
        resource: ImageResource,
        options: RetrieveOptions,
        progress: Option<ProgressFn>,
    ) -> Result<RetrievedImage, RetrieveError> {
        let (tx, rx) = oneshot::channel();
        let completion: CompletionFn = Box::new(move |result| {
            let _ = tx.send(result);
        });

        self.retrieve(Some(resource), options, progress, Some(completion));

        match rx.await {
            Ok(result) => result.into_retrieved(),
            Err(_) => Err(RetrieveError::Cancelled),
        }
    }

    /// Retrieve an image on behalf of a bound consumer.
    ///
    /// The consumer's binding is updated to this request before any I/O
    /// starts, and both callbacks re-check the binding at delivery time:
    /// results belonging to a superseded request are discarded silently.
    pub fn retrieve_bound(
        &self,
        bindings: &Arc<BindingTable>,
        consumer: ConsumerId,
        resource: ImageResource,
        options: RetrieveOptions,
        progress: Option<ProgressFn>,
        completion: Option<CompletionFn>,
    ) -> RetrievalTask {
        let location = resource.location().to_owned();

        let guarded_progress = progress.map(|inner| {
            let bindings = Arc::clone(bindings);
            let location = location.clone();
            Arc::new(move |received, total| {
                if bindings.is_current(consumer, &location) {
                    inner(received, total);
                }
            }) as ProgressFn
        });

        let guarded_completion = completion.map(|inner| {
            let bindings = Arc::clone(bindings);
            let location = location.clone();
            Box::new(move |result: RetrieveResult| {
                // Re-read the binding at delivery time: it may have moved
                // on while this request was in flight.
                if bindings.is_current(consumer, &location) {
                    inner(result);
                }
            }) as CompletionFn
        });

        let task = RetrievalTask::new();
        bindings.bind(consumer, &location, task.clone());
        self.spawn_driver(
            task.clone(),
            resource,
            options,
            guarded_progress,
            CompletionSlot::new(guarded_completion),
        );
        task
    }

    fn spawn_driver(
        &self,
        task: RetrievalTask,
        resource: ImageResource,
        options: RetrieveOptions,
        progress: Option<ProgressFn>,
        slot: Arc<CompletionSlot>,
    ) {
        let driver = RequestDriver {
            cache: options
                .target_cache
                .clone()
                .unwrap_or_else(|| self.cache.clone()),
            downloader: options
                .downloader
                .clone()
                .unwrap_or_else(|| self.downloader.clone()),
            serializer: options
                .serializer
                .clone()
                .unwrap_or_else(|| self.serializer.clone()),
            resource,
            options,
            progress,
            slot,
            task,
        };

        tokio::spawn(async move { driver.run().await });
    }
}

/// One request's worth of orchestration state.
struct RequestDriver {
    cache: Arc<dyn ImageCache>,
    downloader: Arc<dyn Downloader>,
    serializer: Arc<dyn ImageSerializer>,
    resource: ImageResource,
    options: RetrieveOptions,
    progress: Option<ProgressFn>,
    slot: Arc<CompletionSlot>,
    task: RetrievalTask,
}

impl RequestDriver {
    /// Finish the task, then fire the completion.
    fn deliver(&self, result: RetrieveResult) {
        self.task.finish();
        self.slot.fire(result);
    }

    async fn run(self) {
        if self.task.is_cancelled() {
            self.deliver(RetrieveResult::failure(
                RetrieveError::Cancelled,
                self.resource.location(),
            ));
            return;
        }

        // Policy branch, evaluated once: force-refresh only bypasses the
        // lookup for resources the network can actually serve.
        let bypass_lookup = self.options.force_refresh && self.resource.is_network();

        if !bypass_lookup {
            match self.cache.lookup(&self.resource, &self.options).await {
                Ok(Some((image, cache_type))) => {
                    debug!(
                        location = %self.resource.location(),
                        cache = ?cache_type,
                        "Serving image from cache"
                    );
                    self.deliver(RetrieveResult::hit(
                        image,
                        cache_type,
                        self.resource.location(),
                    ));
                    return;
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(
                        location = %self.resource.location(),
                        error = %e,
                        "Cache lookup failed, treating as miss"
                    );
                }
            }

            // A miss ends the request unless the resource is network
            // fetchable and policy allows going out for it.
            if self.options.only_from_cache || !self.resource.is_network() {
                self.deliver(RetrieveResult::failure(
                    RetrieveError::NotCached(self.resource.location().to_owned()),
                    self.resource.location(),
                ));
                return;
            }
        }

        self.download_and_cache().await;
    }

    async fn download_and_cache(self) {
        let url = match self.resource.network_url() {
            Ok(url) => url,
            Err(e) => {
                self.deliver(RetrieveResult::failure(
                    RetrieveError::Download(e),
                    self.resource.location(),
                ));
                return;
            }
        };

        let token = CancellationToken::new();
        if !self.task.attach_download(token.clone()) {
            // Cancelled before the download could start; the token is
            // already cancelled and no network work proceeds.
            self.slot.fire(RetrieveResult::failure(
                RetrieveError::Cancelled,
                self.resource.location(),
            ));
            return;
        }

        let outcome = self
            .downloader
            .fetch(&url, &self.options, self.progress.clone(), &token)
            .await;

        match outcome {
            Ok(payload) => {
                let image = match self
                    .serializer
                    .decode(&payload.data, payload.content_type.as_deref())
                {
                    Some(image) => image,
                    None => {
                        self.deliver(RetrieveResult::failure(
                            RetrieveError::Download(DownloadError::Decode(url.to_string())),
                            self.resource.location(),
                        ));
                        return;
                    }
                };

                self.issue_store(&image, payload.data);
                self.deliver(RetrieveResult::downloaded(
                    image,
                    self.resource.location(),
                ));
            }
            Err(DownloadError::NotModified) => self.redeliver_from_cache().await,
            Err(DownloadError::Cancelled) => {
                self.deliver(RetrieveResult::failure(
                    RetrieveError::Cancelled,
                    self.resource.location(),
                ));
            }
            Err(e) => {
                self.deliver(RetrieveResult::failure(
                    RetrieveError::Download(e),
                    self.resource.location(),
                ));
            }
        }
    }

    /// Write-through, fire-and-forget: the completion does not wait for
    /// the store to land.
    fn issue_store(&self, image: &Image, raw: Bytes) {
        let cache = self.cache.clone();
        let serializer = self.serializer.clone();
        let image = image.clone();
        let cache_key = self.resource.cache_key().to_owned();
        let processor_ident = self.options.processor_ident.clone();
        let to_disk = !self.options.cache_memory_only;

        tokio::spawn(async move {
            if let Err(e) = cache
                .store(
                    &image,
                    raw,
                    &cache_key,
                    processor_ident.as_deref(),
                    serializer.as_ref(),
                    to_disk,
                )
                .await
            {
                warn!(key = %cache_key, error = %e, "Failed to store retrieved image");
            }
        });
    }

    /// The server says our copy is still valid; hand the cached entry
    /// back. A miss here means cache and validators disagree, which is
    /// its own error rather than a silent empty image.
    async fn redeliver_from_cache(self) {
        match self.cache.lookup(&self.resource, &self.options).await {
            Ok(Some((image, cache_type))) => {
                debug!(
                    location = %self.resource.location(),
                    "Content not modified, serving cached image"
                );
                self.deliver(RetrieveResult::hit(
                    image,
                    cache_type,
                    self.resource.location(),
                ));
            }
            Ok(None) => {
                self.deliver(RetrieveResult::failure(
                    RetrieveError::RevalidatedWithoutCache(self.resource.location().to_owned()),
                    self.resource.location(),
                ));
            }
            Err(e) => {
                warn!(
                    location = %self.resource.location(),
                    error = %e,
                    "Cache re-read after not-modified failed"
                );
                self.deliver(RetrieveResult::failure(
                    RetrieveError::RevalidatedWithoutCache(self.resource.location().to_owned()),
                    self.resource.location(),
                ));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheResult;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;
    use url::Url;

    struct FakeCache {
        lookups: AtomicUsize,
        stores: AtomicUsize,
        entries: Mutex<HashMap<String, Bytes>>,
    }

    impl FakeCache {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                lookups: AtomicUsize::new(0),
                stores: AtomicUsize::new(0),
                entries: Mutex::new(HashMap::new()),
            })
        }

        fn seed(&self, key: &str, data: &'static [u8]) {
            self.entries
                .lock()
                .insert(key.to_owned(), Bytes::from_static(data));
        }

        fn entry(&self, key: &str) -> Option<Bytes> {
            self.entries.lock().get(key).cloned()
        }
    }

    #[async_trait::async_trait]
    impl ImageCache for FakeCache {
        async fn lookup(
            &self,
            resource: &ImageResource,
            _options: &RetrieveOptions,
        ) -> CacheResult<Option<(Image, CacheType)>> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            Ok(self
                .entry(resource.cache_key())
                .map(|data| (Image::from_bytes(data), CacheType::Memory)))
        }

        async fn store(
            &self,
            _image: &Image,
            raw: Bytes,
            cache_key: &str,
            _processor_ident: Option<&str>,
            _serializer: &dyn ImageSerializer,
            _to_disk: bool,
        ) -> CacheResult<()> {
            self.stores.fetch_add(1, Ordering::SeqCst);
            self.entries.lock().insert(cache_key.to_owned(), raw);
            Ok(())
        }

        async fn remove(
            &self,
            cache_key: &str,
            _processor_ident: Option<&str>,
        ) -> CacheResult<()> {
            self.entries.lock().remove(cache_key);
            Ok(())
        }

        async fn clear(&self) -> CacheResult<()> {
            self.entries.lock().clear();
            Ok(())
        }
    }

    #[derive(Clone)]
    enum FakeBehavior {
        Succeed(Bytes),
        NotModified,
        FailStatus,
        WaitForCancel,
        Gated(Arc<Notify>, Bytes),
    }

    struct FakeDownloader {
        behaviors: Mutex<HashMap<String, FakeBehavior>>,
        fallback: FakeBehavior,
        calls: AtomicUsize,
    }

    impl FakeDownloader {
        fn new(fallback: FakeBehavior) -> Arc<Self> {
            Arc::new(Self {
                behaviors: Mutex::new(HashMap::new()),
                fallback,
                calls: AtomicUsize::new(0),
            })
        }

        fn set_behavior(&self, url: &str, behavior: FakeBehavior) {
            self.behaviors.lock().insert(url.to_owned(), behavior);
        }
    }

    #[async_trait::async_trait]
    impl Downloader for FakeDownloader {
        async fn fetch(
            &self,
            url: &Url,
            _options: &RetrieveOptions,
            progress: Option<ProgressFn>,
            cancel: &CancellationToken,
        ) -> Result<crate::downloader::DownloadPayload, DownloadError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let behavior = self
                .behaviors
                .lock()
                .get(url.as_str())
                .cloned()
                .unwrap_or_else(|| self.fallback.clone());

            let payload = |data: Bytes| crate::downloader::DownloadPayload {
                data,
                content_type: Some("image/png".to_owned()),
                final_url: url.clone(),
            };

            match behavior {
                FakeBehavior::Succeed(data) => {
                    if let Some(progress) = &progress {
                        let total = data.len() as u64;
                        progress(total / 2, Some(total));
                        progress(total, Some(total));
                    }
                    Ok(payload(data))
                }
                FakeBehavior::NotModified => Err(DownloadError::NotModified),
                FakeBehavior::FailStatus => Err(DownloadError::StatusCode(
                    reqwest::StatusCode::INTERNAL_SERVER_ERROR,
                )),
                FakeBehavior::WaitForCancel => {
                    cancel.cancelled().await;
                    Err(DownloadError::Cancelled)
                }
                FakeBehavior::Gated(gate, data) => {
                    tokio::select! {
                        _ = cancel.cancelled() => Err(DownloadError::Cancelled),
                        _ = gate.notified() => Ok(payload(data)),
                    }
                }
            }
        }
    }

    #[inline]
    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_test_writer() // Write to test output
            .try_init();
    }

    fn manager(cache: &Arc<FakeCache>, downloader: &Arc<FakeDownloader>) -> RetrieveManager {
        RetrieveManager::new(
            cache.clone() as Arc<dyn ImageCache>,
            downloader.clone() as Arc<dyn Downloader>,
        )
    }

    /// Run one retrieve and collect (result, completion count, task).
    fn start(
        mgr: &RetrieveManager,
        resource: Option<ImageResource>,
        options: RetrieveOptions,
    ) -> (
        oneshot::Receiver<RetrieveResult>,
        Arc<AtomicUsize>,
        RetrievalTask,
    ) {
        let (tx, rx) = oneshot::channel();
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_in_cb = fired.clone();
        let completion: CompletionFn = Box::new(move |result| {
            fired_in_cb.fetch_add(1, Ordering::SeqCst);
            let _ = tx.send(result);
        });
        let task = mgr.retrieve(resource, options, None, Some(completion));
        (rx, fired, task)
    }

    async fn settle() {
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_cache_hit_completes_once_without_download() {
        let cache = FakeCache::new();
        cache.seed("https://e.com/a.png", b"cached");
        let downloader = FakeDownloader::new(FakeBehavior::FailStatus);
        let mgr = manager(&cache, &downloader);

        let resource = ImageResource::new("https://e.com/a.png");
        let (rx, fired, task) = start(&mgr, Some(resource), RetrieveOptions::default());

        let result = rx.await.unwrap();
        assert!(result.is_success());
        assert_eq!(result.image.unwrap().as_bytes(), &Bytes::from_static(b"cached"));
        assert_eq!(result.cache_type, CacheType::Memory);
        assert_eq!(result.source.as_deref(), Some("https://e.com/a.png"));

        settle().await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(downloader.calls.load(Ordering::SeqCst), 0);
        assert!(task.is_terminal());
    }

    #[tokio::test]
    async fn test_miss_downloads_stores_and_completes() {
        let cache = FakeCache::new();
        let downloader = FakeDownloader::new(FakeBehavior::Succeed(Bytes::from_static(b"fresh")));
        let mgr = manager(&cache, &downloader);

        let resource = ImageResource::new("https://e.com/b.png");
        let (rx, fired, _task) = start(&mgr, Some(resource), RetrieveOptions::default());

        let result = rx.await.unwrap();
        assert!(result.is_success());
        assert_eq!(result.image.unwrap().as_bytes(), &Bytes::from_static(b"fresh"));
        // A fresh download is not a cache hit
        assert_eq!(result.cache_type, CacheType::None);

        settle().await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(downloader.calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.stores.load(Ordering::SeqCst), 1);
        assert_eq!(
            cache.entry("https://e.com/b.png"),
            Some(Bytes::from_static(b"fresh"))
        );
    }

    #[tokio::test]
    async fn test_nil_resource_is_synchronous_noop() {
        let cache = FakeCache::new();
        let downloader = FakeDownloader::new(FakeBehavior::FailStatus);
        let mgr = manager(&cache, &downloader);

        let delivered: Arc<Mutex<Option<RetrieveResult>>> = Arc::new(Mutex::new(None));
        let delivered_in_cb = delivered.clone();
        let completion: CompletionFn = Box::new(move |result| {
            *delivered_in_cb.lock() = Some(result);
        });

        let task = mgr.retrieve(None, RetrieveOptions::default(), None, Some(completion));

        // Completion already ran, before any await point
        let result = delivered.lock().take().expect("completion should be synchronous");
        assert!(result.image.is_none());
        assert!(result.error.is_none());
        assert_eq!(result.cache_type, CacheType::None);
        assert!(result.source.is_none());

        assert!(task.is_terminal());
        assert_eq!(cache.lookups.load(Ordering::SeqCst), 0);
        assert_eq!(downloader.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_only_from_cache_miss_reports_not_cached() {
        let cache = FakeCache::new();
        let downloader = FakeDownloader::new(FakeBehavior::Succeed(Bytes::from_static(b"x")));
        let mgr = manager(&cache, &downloader);

        // Network resource
        let (rx, _, _) = start(
            &mgr,
            Some(ImageResource::new("https://e.com/c.png")),
            RetrieveOptions::default().with_only_from_cache(true),
        );
        let result = rx.await.unwrap();
        assert!(matches!(result.error, Some(RetrieveError::NotCached(_))));

        // Named resource
        let (rx, _, _) = start(
            &mgr,
            Some(ImageResource::new("missing-asset")),
            RetrieveOptions::default().with_only_from_cache(true),
        );
        let result = rx.await.unwrap();
        assert!(matches!(result.error, Some(RetrieveError::NotCached(_))));

        assert_eq!(downloader.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_non_network_miss_never_downloads() {
        let cache = FakeCache::new();
        let downloader = FakeDownloader::new(FakeBehavior::Succeed(Bytes::from_static(b"x")));
        let mgr = manager(&cache, &downloader);

        let (rx, _, _) = start(
            &mgr,
            Some(ImageResource::new("bundled-placeholder")),
            RetrieveOptions::default(),
        );
        let result = rx.await.unwrap();

        assert!(matches!(result.error, Some(RetrieveError::NotCached(_))));
        assert_eq!(cache.lookups.load(Ordering::SeqCst), 1);
        assert_eq!(downloader.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_force_refresh_skips_lookup_and_stores() {
        let cache = FakeCache::new();
        cache.seed("https://e.com/d.png", b"stale");
        let downloader = FakeDownloader::new(FakeBehavior::Succeed(Bytes::from_static(b"fresh")));
        let mgr = manager(&cache, &downloader);

        let (rx, _, _) = start(
            &mgr,
            Some(ImageResource::new("https://e.com/d.png")),
            RetrieveOptions::default().with_force_refresh(true),
        );
        let result = rx.await.unwrap();

        assert!(result.is_success());
        assert_eq!(result.image.unwrap().as_bytes(), &Bytes::from_static(b"fresh"));
        // The lookup was bypassed entirely, and the fresh bytes were
        // written back over the stale entry.
        assert_eq!(cache.lookups.load(Ordering::SeqCst), 0);
        assert_eq!(downloader.calls.load(Ordering::SeqCst), 1);

        settle().await;
        assert_eq!(cache.stores.load(Ordering::SeqCst), 1);
        assert_eq!(
            cache.entry("https://e.com/d.png"),
            Some(Bytes::from_static(b"fresh"))
        );
    }

    #[tokio::test]
    async fn test_force_refresh_non_network_uses_normal_lookup() {
        let cache = FakeCache::new();
        let downloader = FakeDownloader::new(FakeBehavior::Succeed(Bytes::from_static(b"x")));
        let mgr = manager(&cache, &downloader);

        let (rx, _, _) = start(
            &mgr,
            Some(ImageResource::new("named-asset")),
            RetrieveOptions::default()
                .with_force_refresh(true)
                .with_only_from_cache(true),
        );
        let result = rx.await.unwrap();

        // Not network fetchable: force_refresh does not win, normal
        // lookup order applies and the miss reports not-cached.
        assert!(matches!(result.error, Some(RetrieveError::NotCached(_))));
        assert_eq!(cache.lookups.load(Ordering::SeqCst), 1);
        assert_eq!(downloader.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cancel_before_start_prevents_download() {
        let cache = FakeCache::new();
        let downloader = FakeDownloader::new(FakeBehavior::Succeed(Bytes::from_static(b"x")));
        let mgr = manager(&cache, &downloader);

        let (rx, fired, task) = start(
            &mgr,
            Some(ImageResource::new("https://e.com/e.png")),
            RetrieveOptions::default(),
        );
        // The driver has not run yet on this runtime; cancel lands first
        task.cancel();

        let result = rx.await.unwrap();
        assert!(matches!(result.error, Some(RetrieveError::Cancelled)));
        assert!(result.image.is_none());

        settle().await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(downloader.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cancel_during_download_reports_cancelled() {
        let cache = FakeCache::new();
        let downloader = FakeDownloader::new(FakeBehavior::WaitForCancel);
        let mgr = manager(&cache, &downloader);

        let (rx, fired, task) = start(
            &mgr,
            Some(ImageResource::new("https://e.com/f.png")),
            RetrieveOptions::default(),
        );

        // Let the driver reach the downloader and block on the token
        settle().await;
        assert_eq!(downloader.calls.load(Ordering::SeqCst), 1);

        task.cancel();
        task.cancel(); // idempotent

        let result = rx.await.unwrap();
        assert!(matches!(result.error, Some(RetrieveError::Cancelled)));
        assert!(result.image.is_none());

        settle().await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(cache.stores.load(Ordering::SeqCst), 0);
        assert!(task.is_terminal());
    }

    #[tokio::test]
    async fn test_not_modified_redelivers_cached_image() {
        let cache = FakeCache::new();
        cache.seed("https://e.com/g.png", b"still-valid");
        let downloader = FakeDownloader::new(FakeBehavior::NotModified);
        let mgr = manager(&cache, &downloader);

        let (rx, _, _) = start(
            &mgr,
            Some(ImageResource::new("https://e.com/g.png")),
            RetrieveOptions::default()
                .with_force_refresh(true)
                .with_etag("\"v1\""),
        );
        let result = rx.await.unwrap();

        assert!(result.is_success());
        assert_eq!(
            result.image.unwrap().as_bytes(),
            &Bytes::from_static(b"still-valid")
        );
        assert_eq!(result.cache_type, CacheType::Memory);
        // Exactly the one re-read after the 304
        assert_eq!(cache.lookups.load(Ordering::SeqCst), 1);
        assert_eq!(cache.stores.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_not_modified_without_cached_copy_is_distinct_error() {
        let cache = FakeCache::new();
        let downloader = FakeDownloader::new(FakeBehavior::NotModified);
        let mgr = manager(&cache, &downloader);

        let (rx, _, _) = start(
            &mgr,
            Some(ImageResource::new("https://e.com/h.png")),
            RetrieveOptions::default().with_force_refresh(true),
        );
        let result = rx.await.unwrap();

        assert!(matches!(
            result.error,
            Some(RetrieveError::RevalidatedWithoutCache(_))
        ));
        assert!(result.image.is_none());
    }

    #[tokio::test]
    async fn test_download_failure_reports_error_without_store() {
        let cache = FakeCache::new();
        let downloader = FakeDownloader::new(FakeBehavior::FailStatus);
        let mgr = manager(&cache, &downloader);

        let (rx, fired, _) = start(
            &mgr,
            Some(ImageResource::new("https://e.com/i.png")),
            RetrieveOptions::default(),
        );
        let result = rx.await.unwrap();

        assert!(matches!(
            result.error,
            Some(RetrieveError::Download(DownloadError::StatusCode(_)))
        ));

        settle().await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(cache.stores.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_progress_ticks_forwarded_unmodified() {
        let cache = FakeCache::new();
        let downloader =
            FakeDownloader::new(FakeBehavior::Succeed(Bytes::from_static(b"0123456789")));
        let mgr = manager(&cache, &downloader);

        let ticks: Arc<Mutex<Vec<(u64, Option<u64>)>>> = Arc::new(Mutex::new(Vec::new()));
        let ticks_in_cb = ticks.clone();
        let progress: ProgressFn = Arc::new(move |received, total| {
            ticks_in_cb.lock().push((received, total));
        });

        let retrieved = mgr
            .retrieve_async(
                ImageResource::new("https://e.com/j.png"),
                RetrieveOptions::default(),
                Some(progress),
            )
            .await
            .unwrap();

        assert_eq!(retrieved.image.as_bytes(), &Bytes::from_static(b"0123456789"));
        assert_eq!(*ticks.lock(), vec![(5, Some(10)), (10, Some(10))]);
    }

    #[tokio::test]
    async fn test_target_cache_override_leaves_default_untouched() {
        let default_cache = FakeCache::new();
        let request_cache = FakeCache::new();
        request_cache.seed("https://e.com/k.png", b"routed");
        let downloader = FakeDownloader::new(FakeBehavior::FailStatus);
        let mgr = manager(&default_cache, &downloader);

        let retrieved = mgr
            .retrieve_async(
                ImageResource::new("https://e.com/k.png"),
                RetrieveOptions::default()
                    .with_target_cache(request_cache.clone() as Arc<dyn ImageCache>),
                None,
            )
            .await
            .unwrap();

        assert_eq!(retrieved.image.as_bytes(), &Bytes::from_static(b"routed"));
        assert_eq!(default_cache.lookups.load(Ordering::SeqCst), 0);
        assert_eq!(request_cache.lookups.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_binding_guard_discards_stale_delivery() {
        init_tracing();
        let cache = FakeCache::new();
        let gate = Arc::new(Notify::new());
        let downloader = FakeDownloader::new(FakeBehavior::Succeed(Bytes::from_static(b"b-img")));
        downloader.set_behavior(
            "https://e.com/slow-a.png",
            FakeBehavior::Gated(gate.clone(), Bytes::from_static(b"a-img")),
        );
        let mgr = manager(&cache, &downloader);

        let bindings = Arc::new(BindingTable::new());
        let consumer = bindings.register();

        let applied: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));

        let record = |label: &'static str| -> CompletionFn {
            let applied = applied.clone();
            Box::new(move |result: RetrieveResult| {
                if result.is_success() {
                    applied.lock().push(label.to_owned());
                }
            })
        };

        // Request A is in flight when the consumer is re-bound to B
        let task_a = mgr.retrieve_bound(
            &bindings,
            consumer,
            ImageResource::new("https://e.com/slow-a.png"),
            RetrieveOptions::default(),
            None,
            Some(record("a")),
        );
        settle().await;

        let (tx_b, rx_b) = oneshot::channel();
        let applied_b = applied.clone();
        let completion_b: CompletionFn = Box::new(move |result: RetrieveResult| {
            if result.is_success() {
                applied_b.lock().push("b".to_owned());
            }
            let _ = tx_b.send(());
        });
        mgr.retrieve_bound(
            &bindings,
            consumer,
            ImageResource::new("https://e.com/fast-b.png"),
            RetrieveOptions::default(),
            None,
            Some(completion_b),
        );

        rx_b.await.unwrap();

        // A's download completes only now, after it was superseded
        gate.notify_one();
        settle().await;

        // A was never cancelled, but its late result is discarded
        assert!(!task_a.is_cancelled());
        assert!(task_a.is_terminal());
        assert_eq!(*applied.lock(), vec!["b".to_owned()]);
    }

    #[tokio::test]
    async fn test_retrieve_async_surfaces_errors() {
        let cache = FakeCache::new();
        let downloader = FakeDownloader::new(FakeBehavior::FailStatus);
        let mgr = manager(&cache, &downloader);

        let err = mgr
            .retrieve_async(
                ImageResource::new("https://e.com/l.png"),
                RetrieveOptions::default(),
                None,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, RetrieveError::Download(_)));
    }
}
