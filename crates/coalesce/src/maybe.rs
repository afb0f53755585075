use std::convert::Infallible;
use std::sync::{Arc, Mutex};

use crate::handle::ComputationHandle;

/// The outcome of requesting a value from a [`CachedComputation`].
///
/// The distinction between the two cases is structural on purpose: callers
/// can special-case a value that arrived without waiting (for instance to
/// suppress a loading indicator) instead of treating every request as
/// asynchronous.
///
/// [`CachedComputation`]: crate::CachedComputation
pub enum MaybeCached<T, E> {
    /// A still-fresh value, available without waiting.
    Cached(T),
    /// The value has to be awaited through the shared handle.
    Pending(ComputationHandle<T, E>),
}

impl<T: std::fmt::Debug, E> std::fmt::Debug for MaybeCached<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MaybeCached::Cached(value) => f.debug_tuple("Cached").field(value).finish(),
            MaybeCached::Pending(handle) => f.debug_tuple("Pending").field(handle).finish(),
        }
    }
}

/// Moves both slot values out once both have arrived.
fn take_pair<A, B>(slots: &mut (Option<A>, Option<B>)) -> Option<(A, B)> {
    if slots.0.is_some() && slots.1.is_some() {
        Some((slots.0.take()?, slots.1.take()?))
    } else {
        None
    }
}

impl<T, E> MaybeCached<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    /// Returns `true` if the value arrived without waiting.
    pub fn is_cached(&self) -> bool {
        matches!(self, MaybeCached::Cached(_))
    }

    /// Transforms the value, preserving the cached/pending shape.
    ///
    /// No subscription is triggered; a pending result stays a conduit to the
    /// same shared computation.
    pub fn map<U, F>(self, f: F) -> MaybeCached<U, E>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        match self {
            MaybeCached::Cached(value) => MaybeCached::Cached(f(value)),
            MaybeCached::Pending(handle) => MaybeCached::Pending(handle.map(f)),
        }
    }

    /// Transforms the error, preserving the cached/pending shape.
    ///
    /// A cached value carries no error and passes through unchanged.
    pub fn map_err<E2, F>(self, f: F) -> MaybeCached<T, E2>
    where
        E2: Clone + Send + 'static,
        F: FnOnce(E) -> E2 + Send + 'static,
    {
        match self {
            MaybeCached::Cached(value) => MaybeCached::Cached(value),
            MaybeCached::Pending(handle) => MaybeCached::Pending(handle.map_err(f)),
        }
    }

    /// Chains a dependent cached-or-pending computation.
    ///
    /// For a cached value, `f` runs immediately and its result is returned
    /// as-is, so a synchronous continuation stays synchronous. For a pending
    /// value the result is always pending, even when `f` itself yields
    /// `Cached`: the inner value is then wrapped in an already-resolved
    /// handle, so downstream code always receives something subscribable.
    /// An error from the outer computation short-circuits without running
    /// `f`.
    pub fn and_then<U, F>(self, f: F) -> MaybeCached<U, E>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> MaybeCached<U, E> + Send + 'static,
    {
        match self {
            MaybeCached::Cached(value) => f(value),
            MaybeCached::Pending(handle) => {
                let chained = ComputationHandle::unresolved();
                let on_value = {
                    let chained = chained.clone();
                    move |value| match f(value) {
                        MaybeCached::Cached(inner) => chained.resolve(Ok(inner)),
                        MaybeCached::Pending(inner) => {
                            let forward = chained.clone();
                            let _ = inner.subscribe(
                                move |value| forward.resolve(Ok(value)),
                                move |error| chained.resolve(Err(error)),
                            );
                        }
                    }
                };
                let on_error = {
                    let chained = chained.clone();
                    move |error| chained.resolve(Err(error))
                };
                let _ = handle.subscribe(on_value, on_error);
                MaybeCached::Pending(chained)
            }
        }
    }

    /// Pairs this result with another one.
    ///
    /// Two cached values combine synchronously. Any other combination
    /// subscribes to both sides and resolves once both have terminated; the
    /// first error fails the pair.
    pub fn zip<U>(self, other: MaybeCached<U, E>) -> MaybeCached<(T, U), E>
    where
        U: Clone + Send + 'static,
    {
        match (self, other) {
            (MaybeCached::Cached(left), MaybeCached::Cached(right)) => {
                MaybeCached::Cached((left, right))
            }
            (left, right) => {
                let combined = ComputationHandle::unresolved();
                let slots = Arc::new(Mutex::new((None::<T>, None::<U>)));

                let _ = left.into_handle().subscribe(
                    {
                        let combined = combined.clone();
                        let slots = Arc::clone(&slots);
                        move |value| {
                            let ready = {
                                let mut slots = slots.lock().unwrap();
                                slots.0 = Some(value);
                                take_pair(&mut slots)
                            };
                            if let Some(pair) = ready {
                                combined.resolve(Ok(pair));
                            }
                        }
                    },
                    {
                        let combined = combined.clone();
                        move |error| combined.resolve(Err(error))
                    },
                );

                let _ = right.into_handle().subscribe(
                    {
                        let combined = combined.clone();
                        let slots = Arc::clone(&slots);
                        move |value| {
                            let ready = {
                                let mut slots = slots.lock().unwrap();
                                slots.1 = Some(value);
                                take_pair(&mut slots)
                            };
                            if let Some(pair) = ready {
                                combined.resolve(Ok(pair));
                            }
                        }
                    },
                    {
                        let combined = combined.clone();
                        move |error| combined.resolve(Err(error))
                    },
                );

                MaybeCached::Pending(combined)
            }
        }
    }

    /// Runs `f` with the value once it is available.
    ///
    /// For a cached value `f` runs synchronously before this returns; for a
    /// pending one it runs at completion. Shape and value are unchanged, and
    /// errors bypass `f`.
    pub fn inspect<F>(self, f: F) -> Self
    where
        F: FnOnce(&T) + Send + 'static,
    {
        match &self {
            MaybeCached::Cached(value) => f(value),
            MaybeCached::Pending(handle) => {
                let _ = handle.subscribe(move |value| f(&value), |_| {});
            }
        }
        self
    }

    /// Converts any error outcome into a success carrying `default`.
    pub fn replace_error(self, default: T) -> MaybeCached<T, Infallible> {
        match self {
            MaybeCached::Cached(value) => MaybeCached::Cached(value),
            MaybeCached::Pending(handle) => MaybeCached::Pending(handle.replace_err(default)),
        }
    }

    /// Erases the cached/pending distinction into a uniform handle.
    ///
    /// A cached value becomes an already-resolved handle; a pending one is
    /// returned unchanged.
    pub fn into_handle(self) -> ComputationHandle<T, E> {
        match self {
            MaybeCached::Cached(value) => ComputationHandle::resolved(value),
            MaybeCached::Pending(handle) => handle,
        }
    }
}
