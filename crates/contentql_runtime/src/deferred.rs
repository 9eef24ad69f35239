//! Deferred values.
//!
//! A [`Deferred`] wraps a zero-argument async thunk. The thunk runs the first
//! time the value is resolved; every later resolution replays the memoized
//! outcome, failures included. A resolution dropped before completion leaves
//! the started computation in place for the next one.

use crate::resolver::ResolverError;
use futures_util::future::{FutureExt, Shared};
use std::fmt;
use std::future::Future;
use std::pin::Pin;

/// Boxed future used by deferred thunks and batch loaders.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

type Outcome<T> = Result<T, ResolverError>;

enum Repr<T> {
    Settled(Outcome<T>),
    Running(Shared<BoxFuture<'static, Outcome<T>>>),
}

/// A lazily computed value, evaluated at most once.
///
/// Cloning a `Deferred` shares the underlying computation.
pub struct Deferred<T> {
    repr: Repr<T>,
}

impl<T: Clone> Clone for Deferred<T> {
    fn clone(&self) -> Self {
        let repr = match &self.repr {
            Repr::Settled(outcome) => Repr::Settled(outcome.clone()),
            Repr::Running(shared) => Repr::Running(shared.clone()),
        };
        Self { repr }
    }
}

impl<T: Clone> fmt::Debug for Deferred<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deferred")
            .field("resolved", &self.is_resolved())
            .finish()
    }
}

impl<T: Clone> Deferred<T> {
    /// Returns true once the outcome is known.
    pub fn is_resolved(&self) -> bool {
        match &self.repr {
            Repr::Settled(_) => true,
            Repr::Running(shared) => shared.peek().is_some(),
        }
    }
}

impl<T> Deferred<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Creates a deferred value from an async thunk.
    pub fn new<F, Fut>(thunk: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Outcome<T>> + Send + 'static,
    {
        let computation: BoxFuture<'static, Outcome<T>> = async move { thunk().await }.boxed();
        Self {
            repr: Repr::Running(computation.shared()),
        }
    }

    /// Creates an already resolved value.
    pub fn ready(value: T) -> Self {
        Self {
            repr: Repr::Settled(Ok(value)),
        }
    }

    /// Creates an already failed value.
    pub fn failed(error: ResolverError) -> Self {
        Self {
            repr: Repr::Settled(Err(error)),
        }
    }

    /// Resolves the value, running the thunk if nobody has yet.
    pub async fn resolve(&self) -> Outcome<T> {
        match &self.repr {
            Repr::Settled(outcome) => outcome.clone(),
            Repr::Running(shared) => shared.clone().await,
        }
    }

    /// Returns a deferred value applying `f` to this one's result.
    ///
    /// Neither value is evaluated until the returned one is resolved.
    pub fn map<U, F>(&self, f: F) -> Deferred<U>
    where
        U: Clone + Send + Sync + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        let source = self.clone();
        Deferred::new(move || async move { source.resolve().await.map(f) })
    }

    /// Like [`Deferred::map`] with a fallible step.
    pub fn and_then<U, F>(&self, f: F) -> Deferred<U>
    where
        U: Clone + Send + Sync + 'static,
        F: FnOnce(T) -> Result<U, ResolverError> + Send + 'static,
    {
        let source = self.clone();
        Deferred::new(move || async move { source.resolve().await.and_then(f) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_resolve_runs_thunk_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let value = Deferred::new(move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(42)
        });

        assert!(!value.is_resolved());
        assert_eq!(value.resolve().await.unwrap(), 42);
        assert_eq!(value.clone().resolve().await.unwrap(), 42);
        assert!(value.is_resolved());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failure_is_memoized() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let value: Deferred<i32> = Deferred::new(move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(ResolverError::Load("storage offline".to_string()))
        });

        assert!(value.resolve().await.is_err());
        let err = value.resolve().await.unwrap_err();
        assert!(err.to_string().contains("storage offline"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_map_is_lazy() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let source = Deferred::new(move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(20)
        });
        let doubled = source.map(|n| n * 2);

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(doubled.resolve().await.unwrap(), 40);
        assert_eq!(source.resolve().await.unwrap(), 20);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_nested_resolution() {
        let inner = Deferred::ready("inner".to_string());
        let outer = {
            let inner = inner.clone();
            Deferred::new(move || async move {
                let value = inner.resolve().await?;
                Ok(format!("outer({value})"))
            })
        };

        assert_eq!(outer.resolve().await.unwrap(), "outer(inner)");
    }

    #[tokio::test]
    async fn test_and_then_propagates_errors() {
        let value = Deferred::ready(3).and_then(|n| {
            if n > 2 {
                Err(ResolverError::Custom("too large".to_string()))
            } else {
                Ok(n)
            }
        });

        assert!(value.resolve().await.is_err());
        assert!(Deferred::<i32>::failed(ResolverError::Custom("x".into()))
            .map(|n| n + 1)
            .resolve()
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_dropped_resolution_resumes() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let (tx, rx) = tokio::sync::oneshot::channel::<u32>();
        let value = Deferred::new(move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            rx.await
                .map_err(|_| ResolverError::Internal("sender dropped".to_string()))
        });

        assert!(value.resolve().now_or_never().is_none());
        assert!(!value.is_resolved());

        tx.send(7).unwrap();
        assert_eq!(value.resolve().await.unwrap(), 7);
        assert_eq!(value.clone().resolve().await.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
