//! Lazily loaded, process-shared encoder engine.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::watch;

use reelfx_common::config::TranscodeConfig;

use crate::error::{TranscodeError, TranscodeResult};
use crate::ffmpeg::FfmpegLoader;

/// Raw engine progress, 0..=100.
pub type TranscodeProgress = Arc<dyn Fn(f64) + Send + Sync>;

/// A loaded encoder that converts intermediate bytes into the target container.
#[async_trait]
pub trait EncoderEngine: Send + Sync {
    fn name(&self) -> &str;

    /// Convert `input`. `duration_secs` is used to scale progress.
    async fn transcode(
        &self,
        input: Bytes,
        duration_secs: f64,
        progress: TranscodeProgress,
    ) -> TranscodeResult<Bytes>;
}

/// Loads an encoder engine. Called at most once per successful load.
#[async_trait]
pub trait EngineLoader: Send + Sync {
    async fn load(&self) -> TranscodeResult<Arc<dyn EncoderEngine>>;
}

type LoadOutcome = TranscodeResult<Arc<dyn EncoderEngine>>;

enum Slot {
    Empty,
    /// A load is in flight; resolves to `Some` once it finishes.
    Loading(watch::Receiver<Option<LoadOutcome>>),
    Ready(Arc<dyn EncoderEngine>),
}

/// Memoized engine handle.
///
/// The first caller starts one load on a background task and every caller
/// that arrives while it runs awaits that same load, success or failure. A
/// failed or timed-out load leaves the slot empty, so only a `get` issued
/// after the failure retries. The slot lock is never held across an await.
pub struct SharedEngine {
    loader: Arc<dyn EngineLoader>,
    init_timeout: Duration,
    slot: Arc<Mutex<Slot>>,
    load_attempts: AtomicU64,
}

impl SharedEngine {
    pub fn new(loader: Arc<dyn EngineLoader>, init_timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            loader,
            init_timeout,
            slot: Arc::new(Mutex::new(Slot::Empty)),
            load_attempts: AtomicU64::new(0),
        })
    }

    /// The process-wide ffmpeg engine handle, created on first use.
    ///
    /// `config` only takes effect on the first call.
    pub fn process_wide(config: &TranscodeConfig) -> Arc<Self> {
        static PROCESS_ENGINE: OnceLock<Arc<SharedEngine>> = OnceLock::new();
        Arc::clone(PROCESS_ENGINE.get_or_init(|| {
            Self::new(
                Arc::new(FfmpegLoader::new(config.clone())),
                config.init_timeout(),
            )
        }))
    }

    /// The loaded engine, loading it if needed.
    pub async fn get(&self) -> TranscodeResult<Arc<dyn EncoderEngine>> {
        let mut pending = {
            let mut slot = lock(&self.slot);
            match &*slot {
                Slot::Ready(engine) => return Ok(Arc::clone(engine)),
                Slot::Loading(pending) => pending.clone(),
                Slot::Empty => {
                    let pending = self.start_load();
                    *slot = Slot::Loading(pending.clone());
                    pending
                }
            }
        };

        let outcome = match pending.wait_for(Option::is_some).await {
            Ok(outcome) => outcome.clone(),
            Err(_) => None,
        };
        outcome.unwrap_or_else(|| {
            // The load task went away without reporting, e.g. it panicked.
            let mut slot = lock(&self.slot);
            if matches!(*slot, Slot::Loading(_)) {
                *slot = Slot::Empty;
            }
            Err(TranscodeError::EngineUnavailable(
                "encoder engine load was aborted".to_string(),
            ))
        })
    }

    /// Spawn the single load attempt. Called with the slot lock held.
    fn start_load(&self) -> watch::Receiver<Option<LoadOutcome>> {
        let attempt = self.load_attempts.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::info!(attempt, "Loading encoder engine");

        let (done, pending) = watch::channel(None);
        let loader = Arc::clone(&self.loader);
        let slot = Arc::clone(&self.slot);
        let init_timeout = self.init_timeout;
        tokio::spawn(async move {
            let outcome = match tokio::time::timeout(init_timeout, loader.load()).await {
                Ok(Ok(engine)) => {
                    tracing::info!(engine = engine.name(), "Encoder engine ready");
                    Ok(engine)
                }
                Ok(Err(e)) => {
                    tracing::warn!(error = %e, attempt, "Encoder engine failed to load");
                    Err(e)
                }
                Err(_) => {
                    tracing::warn!(
                        timeout_secs = init_timeout.as_secs_f64(),
                        attempt,
                        "Encoder engine load timed out"
                    );
                    Err(TranscodeError::InitTimeout(init_timeout))
                }
            };

            *lock(&slot) = match &outcome {
                Ok(engine) => Slot::Ready(Arc::clone(engine)),
                Err(_) => Slot::Empty,
            };
            done.send_replace(Some(outcome));
        });
        pending
    }

    /// Drop the cached engine; the next `get` loads a fresh one. A load in
    /// flight is left to finish.
    pub fn invalidate(&self) {
        let mut slot = lock(&self.slot);
        if matches!(*slot, Slot::Ready(_)) {
            *slot = Slot::Empty;
            tracing::debug!("Encoder engine invalidated");
        }
    }

    pub fn is_loaded(&self) -> bool {
        matches!(*lock(&self.slot), Slot::Ready(_))
    }

    /// Number of load attempts made so far.
    pub fn load_attempts(&self) -> u64 {
        self.load_attempts.load(Ordering::SeqCst)
    }
}

fn lock(slot: &Mutex<Slot>) -> MutexGuard<'_, Slot> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    struct Echo;

    #[async_trait]
    impl EncoderEngine for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        async fn transcode(
            &self,
            input: Bytes,
            _duration_secs: f64,
            _progress: TranscodeProgress,
        ) -> TranscodeResult<Bytes> {
            Ok(input)
        }
    }

    /// Sleeps `delay`, then fails while `fail` is set.
    struct TestLoader {
        delay: Duration,
        fail: AtomicBool,
    }

    #[async_trait]
    impl EngineLoader for TestLoader {
        async fn load(&self) -> TranscodeResult<Arc<dyn EncoderEngine>> {
            tokio::time::sleep(self.delay).await;
            if self.fail.load(Ordering::SeqCst) {
                return Err(TranscodeError::EngineUnavailable("not installed".into()));
            }
            Ok(Arc::new(Echo))
        }
    }

    fn loader(delay_ms: u64, fail: bool) -> Arc<TestLoader> {
        Arc::new(TestLoader {
            delay: Duration::from_millis(delay_ms),
            fail: AtomicBool::new(fail),
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_share_one_load() {
        let shared = SharedEngine::new(loader(500, false), Duration::from_secs(30));
        let mut tasks = Vec::new();
        for _ in 0..8 {
            let shared = Arc::clone(&shared);
            tasks.push(tokio::spawn(async move { shared.get().await.map(|_| ()) }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }
        assert_eq!(shared.load_attempts(), 1);
        assert!(shared.is_loaded());
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_share_one_failure() {
        let shared = SharedEngine::new(loader(500, true), Duration::from_secs(30));
        let mut tasks = Vec::new();
        for _ in 0..4 {
            let shared = Arc::clone(&shared);
            tasks.push(tokio::spawn(async move { shared.get().await.map(|_| ()) }));
        }
        for task in tasks {
            assert!(matches!(
                task.await.unwrap(),
                Err(TranscodeError::EngineUnavailable(_))
            ));
        }
        assert_eq!(shared.load_attempts(), 1);
        assert!(!shared.is_loaded());

        // Only a call made after the failure retries.
        assert!(shared.get().await.is_err());
        assert_eq!(shared.load_attempts(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_share_one_timeout() {
        let shared = SharedEngine::new(loader(60_000, false), Duration::from_secs(30));
        let mut tasks = Vec::new();
        for _ in 0..4 {
            let shared = Arc::clone(&shared);
            tasks.push(tokio::spawn(async move { shared.get().await.map(|_| ()) }));
        }
        let started = tokio::time::Instant::now();
        for task in tasks {
            assert!(matches!(
                task.await.unwrap(),
                Err(TranscodeError::InitTimeout(_))
            ));
        }
        assert!(started.elapsed() < Duration::from_secs(31));
        assert_eq!(shared.load_attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_reads_do_not_wait_for_load() {
        let shared = SharedEngine::new(loader(10_000, false), Duration::from_secs(30));
        let loading = {
            let shared = Arc::clone(&shared);
            tokio::spawn(async move { shared.get().await.map(|_| ()) })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(shared.load_attempts(), 1);
        assert!(!shared.is_loaded());
        shared.invalidate();

        loading.await.unwrap().unwrap();
        assert!(shared.is_loaded());
        assert_eq!(shared.load_attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_load_retries_fresh() {
        let loader = loader(10, true);
        let shared = SharedEngine::new(loader.clone(), Duration::from_secs(30));

        assert!(matches!(
            shared.get().await,
            Err(TranscodeError::EngineUnavailable(_))
        ));
        assert!(!shared.is_loaded());

        loader.fail.store(false, Ordering::SeqCst);
        assert!(shared.get().await.is_ok());
        assert_eq!(shared.load_attempts(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_init_timeout_then_retry() {
        let shared = SharedEngine::new(loader(60_000, false), Duration::from_secs(30));
        let err = shared.get().await.err().unwrap();
        assert!(err.is_timeout());
        assert!(matches!(err, TranscodeError::InitTimeout(_)));
        assert!(!shared.is_loaded());
        assert_eq!(shared.load_attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalidate_forces_reload() {
        let shared = SharedEngine::new(loader(1, false), Duration::from_secs(30));
        shared.get().await.unwrap();
        shared.get().await.unwrap();
        assert_eq!(shared.load_attempts(), 1);
        shared.invalidate();
        shared.get().await.unwrap();
        assert_eq!(shared.load_attempts(), 2);
    }
}
