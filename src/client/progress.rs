use std::sync::atomic::{AtomicU32, Ordering};
use tokio::sync::watch;

/// Completion-count progress for one upload at a time.
///
/// The published value is `floor(completed * 100 / total)` and never goes
/// down, whatever order parts finish in.
#[derive(Debug)]
pub struct UploadProgress {
    completed: AtomicU32,
    total: AtomicU32,
    tx: watch::Sender<u8>,
}

impl Default for UploadProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl UploadProgress {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(0);
        Self {
            completed: AtomicU32::new(0),
            total: AtomicU32::new(0),
            tx,
        }
    }

    /// Watch the percentage as it changes.
    pub fn subscribe(&self) -> watch::Receiver<u8> {
        self.tx.subscribe()
    }

    pub fn percent(&self) -> u8 {
        *self.tx.borrow()
    }

    /// Start tracking a new upload of `total` parts.
    pub fn reset(&self, total: u32) {
        self.completed.store(0, Ordering::SeqCst);
        self.total.store(total, Ordering::SeqCst);
        self.tx.send_replace(0);
    }

    /// Count one finished part and return the resulting percentage.
    pub fn record_part(&self) -> u8 {
        let done = self.completed.fetch_add(1, Ordering::SeqCst) + 1;
        let pct = percent_of(done, self.total.load(Ordering::SeqCst));
        self.tx.send_if_modified(|current| {
            if pct > *current {
                *current = pct;
                true
            } else {
                false
            }
        });
        self.percent()
    }
}

/// `floor(done / total * 100)`, computed without floating point.
pub fn percent_of(done: u32, total: u32) -> u8 {
    if total == 0 {
        return 0;
    }
    (u64::from(done) * 100 / u64::from(total)).min(100) as u8
}
