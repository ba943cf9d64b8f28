//! Instrumented codebook stores

use codebook::{CodebookState, CodebookStore, StorageError, StorageResult};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Delegates to another store and counts saves.
pub struct CountingStore<S> {
    inner: S,
    saves: AtomicUsize,
}

impl<S: CodebookStore> CountingStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            saves: AtomicUsize::new(0),
        }
    }

    pub fn saves(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }
}

impl<S: CodebookStore> CodebookStore for CountingStore<S> {
    fn load(&self) -> StorageResult<CodebookState> {
        self.inner.load()
    }

    fn save(&self, state: &CodebookState) -> StorageResult<()> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        self.inner.save(state)
    }
}

/// Lets a fixed number of saves through, then fails every save.
pub struct FailAfterStore<S> {
    inner: S,
    allowed: AtomicUsize,
}

impl<S: CodebookStore> FailAfterStore<S> {
    pub fn new(inner: S, allowed: usize) -> Self {
        Self {
            inner,
            allowed: AtomicUsize::new(allowed),
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }
}

impl<S: CodebookStore> CodebookStore for FailAfterStore<S> {
    fn load(&self) -> StorageResult<CodebookState> {
        self.inner.load()
    }

    fn save(&self, state: &CodebookState) -> StorageResult<()> {
        let allowed = self
            .allowed
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if !allowed {
            return Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "disk full",
            )));
        }
        self.inner.save(state)
    }
}
