use std::sync::{Arc, Mutex};
use std::time::Duration;

use stipple_core::ModelLike;
use stipple_storage::{Bucket, GCS_PUBLIC_URL_BASE};
use tokio::sync::Semaphore;

const DEFAULT_QUEUE_TIMEOUT: Duration = Duration::from_secs(300);

// Application state owning the loaded model and the bucket images go to.
pub struct AppState {
    pub(crate) model: Arc<Mutex<Box<dyn ModelLike>>>,
    /// One permit: a single generation runs at a time, the rest queue.
    pub(crate) generation_slot: Semaphore,
    pub(crate) bucket: Bucket,
    pub(crate) public_url_base: String,
    pub(crate) queue_timeout: Duration,
    pub(crate) clock: fn() -> i64,
}

impl AppState {
    pub fn new(model: Box<dyn ModelLike>, bucket: Bucket) -> Self {
        Self {
            model: Arc::new(Mutex::new(model)),
            generation_slot: Semaphore::new(1),
            bucket,
            public_url_base: GCS_PUBLIC_URL_BASE.to_string(),
            queue_timeout: DEFAULT_QUEUE_TIMEOUT,
            clock: unix_now,
        }
    }

    pub fn with_public_url_base(mut self, base: impl Into<String>) -> Self {
        self.public_url_base = base.into();
        self
    }

    /// How long a request may wait for the model before failing.
    pub fn with_queue_timeout(mut self, timeout: Duration) -> Self {
        self.queue_timeout = timeout;
        self
    }

    /// Source of the unix timestamp embedded in image keys.
    pub fn with_clock(mut self, clock: fn() -> i64) -> Self {
        self.clock = clock;
        self
    }
}

fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}
