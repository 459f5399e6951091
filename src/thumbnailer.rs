//! Background thumbnail generation for the rows of the image list.
//!
//! Every identity has at most one job in flight. Results are delivered to the
//! job's callback only if that exact job is still in the pending table when
//! its task completes; cancelling removes the entry, so a late result is
//! dropped no matter how far its decode got.

use crate::bitmap::ThumbnailBitmap;
use crate::cache::{find_cached_thumbnail, CacheLayout, FreedesktopLayout, NoCache};
use crate::config::ThumbnailsConfig;
use crate::decoder::{decode_thumbnail, DecodeError};
use crate::placeholder::Placeholder;
use rayon::{ThreadPool, ThreadPoolBuildError, ThreadPoolBuilder};
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use thiserror::Error;
use tracing::{debug, error, info, trace, warn};

#[derive(Debug, Error)]
pub enum ThumbnailerError {
    #[error("failed to start thumbnail workers: {0}")]
    Pool(#[from] ThreadPoolBuildError),
}

/// Receives the identity and the finished preview (or the placeholder).
pub type Callback<K> = Box<dyn FnOnce(K, Arc<ThumbnailBitmap>) + Send + 'static>;

type DecodeFn = dyn Fn(&Path, u32) -> Result<ThumbnailBitmap, DecodeError> + Send + Sync;

struct PendingJob<K> {
    job_id: u64,
    canceled: Arc<AtomicBool>,
    callback: Callback<K>,
}

struct State<K> {
    pending: HashMap<K, PendingJob<K>>,
    pool: ThreadPool,
    next_job_id: u64,
}

struct Shared<K> {
    state: Mutex<State<K>>,
    placeholder: Placeholder,
    decode: Arc<DecodeFn>,
}

pub struct Thumbnailer<K> {
    shared: Arc<Shared<K>>,
    cache: Arc<dyn CacheLayout>,
    workers: usize,
    target_size: u32,
}

impl<K> Thumbnailer<K>
where
    K: Eq + Hash + Clone + fmt::Debug + Send + 'static,
{
    /// Builds a thumbnailer that consults the system thumbnail cache as
    /// `config` describes.
    pub fn new(
        config: &ThumbnailsConfig,
        placeholder: Placeholder,
    ) -> Result<Self, ThumbnailerError> {
        Self::with_cache_layout(config, placeholder, cache_layout_for(config))
    }

    pub fn with_cache_layout(
        config: &ThumbnailsConfig,
        placeholder: Placeholder,
        cache: Arc<dyn CacheLayout>,
    ) -> Result<Self, ThumbnailerError> {
        Self::with_decoder(config, placeholder, cache, Arc::new(decode_thumbnail))
    }

    fn with_decoder(
        config: &ThumbnailsConfig,
        placeholder: Placeholder,
        cache: Arc<dyn CacheLayout>,
        decode: Arc<DecodeFn>,
    ) -> Result<Self, ThumbnailerError> {
        assert!(config.size > 0, "thumbnail target size must be positive");
        let pool = build_pool(config.workers)?;
        Ok(Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    pending: HashMap::new(),
                    pool,
                    next_job_id: 0,
                }),
                placeholder,
                decode,
            }),
            cache,
            workers: config.workers,
            target_size: config.size,
        })
    }

    pub fn target_size(&self) -> u32 {
        self.target_size
    }

    /// Queues a preview of `source` at the configured size.
    ///
    /// Returns `false` without touching the existing job when `identity` is
    /// already pending. The callback runs on a worker thread after the job
    /// has left the table, with the table unlocked; it may call back into
    /// this thumbnailer, and should hand the bitmap over to the caller's own
    /// thread.
    pub fn generate<F>(&self, identity: K, source: impl AsRef<Path>, callback: F) -> bool
    where
        F: FnOnce(K, Arc<ThumbnailBitmap>) + Send + 'static,
    {
        self.generate_sized(identity, source, self.target_size, callback)
    }

    pub fn generate_sized<F>(
        &self,
        identity: K,
        source: impl AsRef<Path>,
        target_size: u32,
        callback: F,
    ) -> bool
    where
        F: FnOnce(K, Arc<ThumbnailBitmap>) + Send + 'static,
    {
        assert!(target_size > 0, "thumbnail target size must be positive");
        if self.is_pending(&identity) {
            return false;
        }

        let source = source.as_ref();
        let path = match find_cached_thumbnail(self.cache.as_ref(), source) {
            Some(cached) => {
                trace!(
                    source = %source.display(),
                    cached = %cached.display(),
                    "using cached thumbnail"
                );
                cached
            }
            None => source.to_path_buf(),
        };

        let mut state = self.shared.lock();
        if state.pending.contains_key(&identity) {
            return false;
        }
        let job_id = state.next_job_id;
        state.next_job_id += 1;
        let canceled = Arc::new(AtomicBool::new(false));
        state.pending.insert(
            identity.clone(),
            PendingJob {
                job_id,
                canceled: Arc::clone(&canceled),
                callback: Box::new(callback),
            },
        );
        debug!(?identity, job_id, path = %path.display(), "queued thumbnail");

        let shared = Arc::downgrade(&self.shared);
        state
            .pool
            .spawn(move || run_job(shared, identity, job_id, path, target_size, canceled));
        true
    }

    /// Drops the job for `identity`; its callback will never run.
    ///
    /// Returns `false` when nothing was pending.
    pub fn cancel(&self, identity: &K) -> bool {
        let job = self.shared.lock().pending.remove(identity);
        match job {
            Some(job) => {
                job.canceled.store(true, Ordering::Release);
                debug!(?identity, job_id = job.job_id, "canceled thumbnail");
                true
            }
            None => false,
        }
    }

    /// Drops every pending job and replaces the worker pool without waiting
    /// for running decodes.
    pub fn cancel_all(&self) -> Result<(), ThumbnailerError> {
        let fresh = build_pool(self.workers);
        let mut state = self.shared.lock();
        let dropped = state.cancel_pending();
        let stale = match fresh {
            Ok(pool) => std::mem::replace(&mut state.pool, pool),
            Err(err) => {
                drop(state);
                error!(%err, "failed to rebuild thumbnail workers");
                return Err(err.into());
            }
        };
        drop(state);
        drop(stale);
        info!(dropped = dropped.len(), "reset thumbnail workers");
        Ok(())
    }

    pub fn is_pending(&self, identity: &K) -> bool {
        self.shared.lock().pending.contains_key(identity)
    }

    pub fn pending_count(&self) -> usize {
        self.shared.lock().pending.len()
    }
}

impl<K> Drop for Thumbnailer<K> {
    fn drop(&mut self) {
        let dropped = self.shared.lock().cancel_pending();
        drop(dropped);
    }
}

impl<K> Shared<K> {
    fn lock(&self) -> MutexGuard<'_, State<K>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<K> State<K> {
    /// Empties the table, flagging every job canceled. The callbacks are
    /// returned so they can be dropped after the lock is released.
    fn cancel_pending(&mut self) -> Vec<PendingJob<K>> {
        self.pending
            .drain()
            .map(|(_, job)| {
                job.canceled.store(true, Ordering::Release);
                job
            })
            .collect()
    }
}

fn run_job<K>(
    shared: Weak<Shared<K>>,
    identity: K,
    job_id: u64,
    path: PathBuf,
    target_size: u32,
    canceled: Arc<AtomicBool>,
) where
    K: Eq + Hash + fmt::Debug,
{
    if canceled.load(Ordering::Acquire) {
        trace!(?identity, job_id, "skipping canceled thumbnail");
        return;
    }
    let Some(decode) = shared.upgrade().map(|shared| Arc::clone(&shared.decode)) else {
        return;
    };
    let result = decode(path.as_path(), target_size);
    let Some(shared) = shared.upgrade() else {
        return;
    };

    let job = {
        let mut state = shared.lock();
        let current = state.pending.get(&identity).map(|job| job.job_id);
        if current != Some(job_id) {
            trace!(?identity, job_id, "discarding result of canceled thumbnail");
            return;
        }
        state.pending.remove(&identity)
    };
    let Some(job) = job else {
        return;
    };
    let bitmap = match result {
        Ok(bitmap) => Arc::new(bitmap),
        Err(err) => {
            warn!(path = %path.display(), %err, "failed to generate thumbnail");
            shared.placeholder.bitmap()
        }
    };
    drop(shared);

    // The entry is gone, so a cancel from here on sees the identity as
    // absent. The table is unlocked while the callback runs.
    trace!(?identity, job_id, "delivering thumbnail");
    (job.callback)(identity, bitmap);
}

fn build_pool(workers: usize) -> Result<ThreadPool, ThreadPoolBuildError> {
    ThreadPoolBuilder::new()
        .num_threads(workers.max(1))
        .thread_name(|i| format!("thumbnail-{i}"))
        .panic_handler(|_| error!("thumbnail worker panicked"))
        .build()
}

fn cache_layout_for(config: &ThumbnailsConfig) -> Arc<dyn CacheLayout> {
    if !config.use_system_cache {
        return Arc::new(NoCache);
    }
    let layout = config
        .cache_home()
        .map(|home| FreedesktopLayout::new(home))
        .or_else(FreedesktopLayout::from_env);
    match layout {
        Some(layout) => Arc::new(layout),
        None => {
            warn!("no cache directory found, system thumbnails disabled");
            Arc::new(NoCache)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbaImage;
    use std::fs;
    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc;
    use std::sync::Condvar;
    use std::time::Duration;

    const WAIT: Duration = Duration::from_secs(10);

    /// Decoder double that blocks until opened and returns a
    /// `target_size x 1` bitmap.
    #[derive(Default)]
    struct Gate {
        open: Mutex<bool>,
        changed: Condvar,
        started: AtomicUsize,
    }

    impl Gate {
        fn open(&self) {
            *self.open.lock().unwrap() = true;
            self.changed.notify_all();
        }

        fn wait_started(&self, count: usize) {
            let mut open = self.open.lock().unwrap();
            while self.started.load(Ordering::SeqCst) < count {
                open = self.changed.wait_timeout(open, WAIT).unwrap().0;
            }
        }

        fn decoder(self: &Arc<Self>) -> Arc<DecodeFn> {
            let gate = Arc::clone(self);
            Arc::new(move |_path: &Path, size: u32| -> Result<ThumbnailBitmap, DecodeError> {
                let mut open = gate.open.lock().unwrap();
                gate.started.fetch_add(1, Ordering::SeqCst);
                gate.changed.notify_all();
                while !*open {
                    open = gate.changed.wait(open).unwrap();
                }
                Ok(ThumbnailBitmap::from_rgba(RgbaImage::new(size, 1)))
            })
        }
    }

    fn config(workers: usize) -> ThumbnailsConfig {
        ThumbnailsConfig {
            workers,
            use_system_cache: false,
            ..ThumbnailsConfig::default()
        }
    }

    fn gated(workers: usize) -> (Thumbnailer<u32>, Arc<Gate>) {
        let gate = Arc::new(Gate::default());
        let thumbnailer = Thumbnailer::with_decoder(
            &config(workers),
            Placeholder::bundled(64).unwrap(),
            Arc::new(NoCache),
            gate.decoder(),
        )
        .unwrap();
        (thumbnailer, gate)
    }

    type Delivery = (u32, Arc<ThumbnailBitmap>);

    fn sender(
        tx: &mpsc::Sender<Delivery>,
    ) -> impl FnOnce(u32, Arc<ThumbnailBitmap>) + Send + 'static {
        let tx = tx.clone();
        move |id, bitmap| {
            let _ = tx.send((id, bitmap));
        }
    }

    #[test]
    fn cancel_before_completion_suppresses_callback() {
        let (thumbnailer, gate) = gated(1);
        let (tx, rx) = mpsc::channel();

        assert!(thumbnailer.generate(1, "a.png", sender(&tx)));
        assert!(thumbnailer.cancel(&1));
        assert!(!thumbnailer.is_pending(&1));
        assert!(!thumbnailer.cancel(&1));

        thumbnailer.generate(2, "b.png", sender(&tx));
        gate.open();
        let (id, _) = rx.recv_timeout(WAIT).unwrap();
        assert_eq!(id, 2);
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
    }

    #[test]
    fn cancel_after_decode_started_discards_result() {
        let (thumbnailer, gate) = gated(1);
        let (tx, rx) = mpsc::channel();

        thumbnailer.generate(1, "a.png", sender(&tx));
        gate.wait_started(1);
        assert!(thumbnailer.cancel(&1));
        thumbnailer.generate(2, "b.png", sender(&tx));
        gate.open();

        assert_eq!(rx.recv_timeout(WAIT).unwrap().0, 2);
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
        assert_eq!(thumbnailer.pending_count(), 0);
    }

    #[test]
    fn duplicate_generate_is_ignored() {
        let (thumbnailer, gate) = gated(2);
        let (tx, rx) = mpsc::channel();

        assert!(thumbnailer.generate(7, "a.png", sender(&tx)));
        assert!(!thumbnailer.generate(7, "a.png", sender(&tx)));
        assert_eq!(thumbnailer.pending_count(), 1);
        gate.open();

        assert_eq!(rx.recv_timeout(WAIT).unwrap().0, 7);
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
        assert_eq!(gate.started.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn stale_task_never_reaches_resubmitted_job() {
        let (thumbnailer, gate) = gated(2);
        let (tx, rx) = mpsc::channel();

        thumbnailer.generate_sized(1, "a.png", 10, sender(&tx));
        gate.wait_started(1);
        thumbnailer.cancel(&1);
        thumbnailer.generate_sized(1, "a.png", 20, sender(&tx));
        gate.wait_started(2);
        gate.open();

        let (id, bitmap) = rx.recv_timeout(WAIT).unwrap();
        assert_eq!((id, bitmap.width()), (1, 20));
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
    }

    #[test]
    fn cancel_all_drops_running_and_queued_jobs() {
        let (thumbnailer, gate) = gated(2);
        let (tx, rx) = mpsc::channel();

        for id in 0..6 {
            thumbnailer.generate(id, "a.png", sender(&tx));
        }
        gate.wait_started(2);
        thumbnailer.cancel_all().unwrap();
        assert_eq!(thumbnailer.pending_count(), 0);
        gate.open();
        assert!(rx.recv_timeout(Duration::from_millis(300)).is_err());
        assert_eq!(gate.started.load(Ordering::SeqCst), 2);

        assert!(thumbnailer.generate(0, "a.png", sender(&tx)));
        assert_eq!(rx.recv_timeout(WAIT).unwrap().0, 0);
    }

    #[test]
    fn callback_can_resubmit_on_the_same_thumbnailer() {
        let (thumbnailer, gate) = gated(1);
        let thumbnailer = Arc::new(thumbnailer);
        let (tx, rx) = mpsc::channel();
        let (accepted_tx, accepted_rx) = mpsc::channel();
        gate.open();

        let weak = Arc::downgrade(&thumbnailer);
        let resubmit = sender(&tx);
        thumbnailer.generate(1, "a.png", move |id, _| {
            let accepted = weak
                .upgrade()
                .map(|thumbnailer| thumbnailer.generate(id + 1, "b.png", resubmit));
            let _ = accepted_tx.send(accepted);
        });

        assert_eq!(accepted_rx.recv_timeout(WAIT).unwrap(), Some(true));
        assert_eq!(rx.recv_timeout(WAIT).unwrap().0, 2);
        assert_eq!(thumbnailer.pending_count(), 0);
    }

    #[test]
    fn running_callback_does_not_hold_the_table() {
        let (thumbnailer, gate) = gated(2);
        let thumbnailer = Arc::new(thumbnailer);
        let (tx, rx) = mpsc::channel();
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        gate.open();

        thumbnailer.generate(1, "a.png", move |_, _| {
            let _ = entered_tx.send(());
            let _ = release_rx.recv();
        });
        entered_rx.recv_timeout(WAIT).unwrap();

        // Run the calls elsewhere so a held lock fails the test instead of
        // hanging it.
        let (done_tx, done_rx) = mpsc::channel();
        let caller = Arc::clone(&thumbnailer);
        let resubmit = sender(&tx);
        std::thread::spawn(move || {
            let canceled = caller.cancel(&9);
            let pending = caller.is_pending(&1);
            let accepted = caller.generate(3, "c.png", resubmit);
            let _ = done_tx.send((canceled, pending, accepted));
        });
        assert_eq!(done_rx.recv_timeout(WAIT).unwrap(), (false, false, true));
        assert_eq!(rx.recv_timeout(WAIT).unwrap().0, 3);

        release_tx.send(()).unwrap();
        assert_eq!(thumbnailer.pending_count(), 0);
    }

    #[test]
    fn decode_failure_delivers_placeholder() {
        let dir = tempfile::tempdir().unwrap();
        let corrupt = dir.path().join("corrupt.jpg");
        fs::write(&corrupt, b"\xFF\xD8\xFF\xE0 not really a jpeg").unwrap();

        let placeholder = Placeholder::bundled(64).unwrap();
        let thumbnailer =
            Thumbnailer::with_cache_layout(&config(2), placeholder.clone(), Arc::new(NoCache))
                .unwrap();
        let (tx, rx) = mpsc::channel();
        thumbnailer.generate(3, &corrupt, sender(&tx));
        thumbnailer.generate(4, dir.path().join("missing.png"), sender(&tx));

        for _ in 0..2 {
            let (_, bitmap) = rx.recv_timeout(WAIT).unwrap();
            assert!(placeholder.is(&bitmap));
        }
        assert_eq!(thumbnailer.pending_count(), 0);
    }

    #[test]
    fn dropping_the_thumbnailer_discards_results() {
        let (thumbnailer, gate) = gated(1);
        let (tx, rx) = mpsc::channel();
        thumbnailer.generate(1, "a.png", sender(&tx));
        gate.wait_started(1);
        drop(thumbnailer);
        gate.open();
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
    }
}
