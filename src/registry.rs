use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::debug;

use crate::blob::Blob;

/// Result of looking up a handle in the registry.
pub enum BlobLookup {
    /// Nothing was ever registered under the handle, or it was already taken.
    NotFound,
    /// The handle was explicitly marked as expired.
    Gone,
    Found(Arc<dyn Blob>),
}

impl fmt::Debug for BlobLookup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlobLookup::NotFound => f.write_str("NotFound"),
            BlobLookup::Gone => f.write_str("Gone"),
            BlobLookup::Found(blob) => f
                .debug_tuple("Found")
                .field(&blob.filename())
                .finish(),
        }
    }
}

enum Entry {
    Blob(Arc<dyn Blob>),
    Gone,
}

/// Session-scoped store of pending downloads.
///
/// Each handle can be taken at most once: [`SessionRegistry::take`] removes
/// the entry in the same critical section that reads it, so concurrent
/// requests for the same handle see exactly one `Found`.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, HashMap<String, Entry>>>,
    counter: AtomicU64,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, HashMap<String, Entry>>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register `blob` under a freshly generated handle and return the handle.
    pub fn register(&self, session: &str, blob: Arc<dyn Blob>) -> String {
        let handle = self.generate_handle();
        self.insert(session, &handle, blob);
        handle
    }

    /// Register `blob` under `handle`, replacing any previous entry.
    pub fn insert(&self, session: &str, handle: &str, blob: Arc<dyn Blob>) {
        debug!(session, handle, "registering blob");
        self.lock()
            .entry(session.to_string())
            .or_default()
            .insert(handle.to_string(), Entry::Blob(blob));
    }

    /// Mark `handle` as expired: the next lookup answers [`BlobLookup::Gone`].
    pub fn mark_gone(&self, session: &str, handle: &str) {
        self.lock()
            .entry(session.to_string())
            .or_default()
            .insert(handle.to_string(), Entry::Gone);
    }

    /// Look up `handle` and invalidate it in one step.
    ///
    /// A request without a session, or with an unknown one, finds nothing.
    pub fn take(&self, session: Option<&str>, handle: &str) -> BlobLookup {
        let Some(session) = session else {
            return BlobLookup::NotFound;
        };

        let mut sessions = self.lock();
        let Some(handles) = sessions.get_mut(session) else {
            return BlobLookup::NotFound;
        };

        let lookup = match handles.remove(handle) {
            Some(Entry::Blob(blob)) => BlobLookup::Found(blob),
            Some(Entry::Gone) => BlobLookup::Gone,
            None => BlobLookup::NotFound,
        };
        if handles.is_empty() {
            sessions.remove(session);
        }
        lookup
    }

    /// Drop every pending handle of `session`.
    pub fn remove_session(&self, session: &str) {
        self.lock().remove(session);
    }

    /// Number of handles still pending for `session`.
    pub fn pending(&self, session: &str) -> usize {
        self.lock().get(session).map_or(0, HashMap::len)
    }

    fn generate_handle(&self) -> String {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |elapsed| elapsed.as_nanos());
        let sequence = self.counter.fetch_add(1, Ordering::Relaxed);
        format!("{timestamp:x}-{sequence:x}")
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use assert_matches::assert_matches;

    use super::*;
    use crate::MemoryBlob;

    fn blob() -> Arc<dyn Blob> {
        Arc::new(MemoryBlob::new("payload").with_filename("payload.bin"))
    }

    #[test]
    fn test_take_is_single_use() {
        let registry = SessionRegistry::new();
        registry.insert("s1", "abc", blob());

        assert_matches!(registry.take(Some("s1"), "abc"), BlobLookup::Found(b) => {
            assert_eq!(Some("payload.bin"), b.filename());
        });
        assert_matches!(registry.take(Some("s1"), "abc"), BlobLookup::NotFound);
    }

    #[test]
    fn test_take_is_scoped_to_session() {
        let registry = SessionRegistry::new();
        registry.insert("s1", "abc", blob());

        assert_matches!(registry.take(Some("s2"), "abc"), BlobLookup::NotFound);
        assert_matches!(registry.take(None, "abc"), BlobLookup::NotFound);
        assert_eq!(1, registry.pending("s1"));
        assert_matches!(registry.take(Some("s1"), "abc"), BlobLookup::Found(_));
        assert_eq!(0, registry.pending("s1"));
    }

    #[test]
    fn test_gone_is_reported_once() {
        let registry = SessionRegistry::new();
        registry.mark_gone("s1", "old");

        assert_matches!(registry.take(Some("s1"), "old"), BlobLookup::Gone);
        assert_matches!(registry.take(Some("s1"), "old"), BlobLookup::NotFound);
    }

    #[test]
    fn test_register_generates_distinct_handles() {
        let registry = SessionRegistry::new();
        let first = registry.register("s1", blob());
        let second = registry.register("s1", blob());

        assert_ne!(first, second);
        assert_eq!(2, registry.pending("s1"));

        registry.remove_session("s1");
        assert_matches!(registry.take(Some("s1"), &first), BlobLookup::NotFound);
    }

    #[test]
    fn test_concurrent_take_finds_once() {
        let registry = Arc::new(SessionRegistry::new());
        registry.insert("s1", "shared", blob());

        let workers: Vec<_> = (0..16)
            .map(|_| {
                let registry = registry.clone();
                thread::spawn(move || {
                    matches!(registry.take(Some("s1"), "shared"), BlobLookup::Found(_))
                })
            })
            .collect();

        let found = workers
            .into_iter()
            .map(|worker| worker.join().unwrap())
            .filter(|found| *found)
            .count();
        assert_eq!(1, found);
    }
}
