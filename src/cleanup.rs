//! Per-test cleanup registry
//!
//! Helpers never tear down what they create. The test case registers one
//! callback per resource and runs them all at the end, newest first, so pods
//! go before the claims they mount and claims before their volumes.

use std::future::Future;

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::error::{E2eError, Result};

type CleanupFn = Box<dyn FnOnce() -> BoxFuture<'static, Result<()>> + Send>;

struct Entry {
    name: String,
    action: CleanupFn,
}

/// Ordered set of cleanup callbacks owned by one test case
#[derive(Default)]
pub struct CleanupRegistry {
    entries: Mutex<Vec<Entry>>,
}

impl CleanupRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback; it runs before everything registered earlier
    pub fn register<F, Fut>(&self, name: impl Into<String>, action: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let name = name.into();
        debug!("Registered cleanup: {}", name);
        self.entries.lock().push(Entry {
            name,
            action: Box::new(move || action().boxed()),
        });
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Run every callback in reverse registration order.
    ///
    /// A failing callback does not stop the rest; all failures are returned
    /// together.
    pub async fn run(&self) -> Result<()> {
        let entries = std::mem::take(&mut *self.entries.lock());
        let mut errors = Vec::new();

        for entry in entries.into_iter().rev() {
            match (entry.action)().await {
                Ok(()) => debug!("Cleanup {} done", entry.name),
                Err(e) => {
                    warn!("Cleanup {} failed: {}", entry.name, e);
                    errors.push(e);
                }
            }
        }

        E2eError::aggregate("cleanup", errors)
    }

    /// Drop every callback without running it, returning their names
    pub fn discard(&self) -> Vec<String> {
        let entries = std::mem::take(&mut *self.entries.lock());
        let names: Vec<String> = entries.into_iter().map(|e| e.name).collect();
        if !names.is_empty() {
            info!("Leaving {} resource(s) in place: {}", names.len(), names.join(", "));
        }
        names
    }
}
