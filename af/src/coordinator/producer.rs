//! Producer trait - the data source a Coordinator keeps fresh

use std::future::Future;

use async_trait::async_trait;
use eyre::Result;

use super::config::DependencyKey;

/// Asynchronous source of data for a Coordinator
///
/// Implementations receive the current dependency key so a single producer
/// can serve every key the owning component moves through (page number,
/// selected lot, date range, ...).
#[async_trait]
pub trait Producer<T>: Send + Sync {
    /// Produce a fresh value for the given dependency key
    async fn produce(&self, key: DependencyKey) -> Result<T>;
}

/// Producer built from an async closure
pub struct FnProducer<F> {
    f: F,
}

/// Wrap an async closure as a [`Producer`]
///
/// ```ignore
/// let producer = from_fn(|key| async move { fetch_spots(&key).await });
/// ```
pub fn from_fn<F, Fut, T>(f: F) -> FnProducer<F>
where
    F: Fn(DependencyKey) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
{
    FnProducer { f }
}

#[async_trait]
impl<F, Fut, T> Producer<T> for FnProducer<F>
where
    F: Fn(DependencyKey) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
    T: Send + 'static,
{
    async fn produce(&self, key: DependencyKey) -> Result<T> {
        (self.f)(key).await
    }
}
