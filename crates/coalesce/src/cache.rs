use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::handle::ComputationHandle;
use crate::maybe::MaybeCached;
use crate::time::Instant;

/// A successfully computed value and the time it was computed.
///
/// Replaced wholesale on the next successful completion, never mutated in
/// place.
struct CachedValue<T> {
    value: T,
    computed_at: Instant,
}

struct SharedState<T, E> {
    cached: Option<CachedValue<T>>,
    /// `Some` only between the start of a new computation and the delivery
    /// of its terminal outcome back into this state.
    in_flight: Option<ComputationHandle<T, E>>,
}

struct Inner<T, E, F> {
    ttl: Duration,
    producer: F,
    state: Mutex<SharedState<T, E>>,
}

/// A single-slot, single-flight cache around one asynchronous computation.
///
/// [`get`](Self::get) returns the last successful value as long as it is
/// younger than the configured time-to-live. When the value is stale or
/// absent, at most one producer runs at a time no matter how many callers
/// request the value concurrently; all of them share the same
/// [`ComputationHandle`] and receive the same outcome.
///
/// A failed computation is not cached: the error is fanned out to every
/// attached observer and the next request starts a clean attempt. There is
/// no retry logic here; callers wanting retries wrap the producer
/// themselves.
///
/// Each instance has its own state and lock, so unrelated caches never
/// contend. Cloning is cheap and yields a view onto the same cache slot.
///
/// Driving a started producer uses [`tokio::spawn`], so [`get`](Self::get)
/// must be called within a tokio runtime.
pub struct CachedComputation<T, E, F> {
    inner: Arc<Inner<T, E, F>>,
}

impl<T, E, F> Clone for CachedComputation<T, E, F> {
    fn clone(&self) -> Self {
        CachedComputation {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T, E, F> std::fmt::Debug for CachedComputation<T, E, F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (has_value, in_flight) = self
            .inner
            .state
            .try_lock()
            .map(|s| (s.cached.is_some(), s.in_flight.is_some()))
            .unwrap_or_default();
        f.debug_struct("CachedComputation")
            .field("ttl", &self.inner.ttl)
            .field("has_value", &has_value)
            .field("in_flight", &in_flight)
            .finish()
    }
}

impl<T, E, F, Fut> CachedComputation<T, E, F>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
{
    /// Creates a cache around `producer` with the given time-to-live.
    ///
    /// `initial`, if given, seeds the cache as fresh at construction time.
    /// A `ttl` of zero means a value is never considered fresh; every
    /// request goes through the single-flight path.
    pub fn new(ttl: Duration, initial: Option<T>, producer: F) -> Self {
        let cached = initial.map(|value| CachedValue {
            value,
            computed_at: Instant::now(),
        });
        CachedComputation {
            inner: Arc::new(Inner {
                ttl,
                producer,
                state: Mutex::new(SharedState {
                    cached,
                    in_flight: None,
                }),
            }),
        }
    }

    /// Returns the cached value, or a handle to the one running computation.
    ///
    /// The read-decide-write sequence runs inside a single critical section,
    /// so two callers can never both observe "no fresh value, nothing in
    /// flight" and start duplicate producers. The lock is only held for
    /// in-memory bookkeeping; the producer's work runs on its own task.
    pub fn get(&self) -> MaybeCached<T, E> {
        let now = Instant::now();
        let mut state = self.inner.state.lock().unwrap();

        if let Some(cached) = &state.cached {
            if now.saturating_duration_since(cached.computed_at) < self.inner.ttl {
                tracing::trace!("Returning fresh cached value");
                return MaybeCached::Cached(cached.value.clone());
            }
            // Stale. Drop it before deciding how to recompute.
            state.cached = None;
        }

        if let Some(handle) = &state.in_flight {
            tracing::trace!("Attaching to in-flight computation");
            return MaybeCached::Pending(handle.clone());
        }

        let handle = ComputationHandle::unresolved();
        state.in_flight = Some(handle.clone());
        drop(state);

        tracing::trace!(ttl = ?self.inner.ttl, "Spawning new computation");
        self.spawn_computation(handle.clone());

        MaybeCached::Pending(handle)
    }

    /// Starts the producer exactly once and drives it to completion.
    ///
    /// The caller has already stored `handle` into `in_flight`, so
    /// concurrent requests attach to it instead of arriving here.
    fn spawn_computation(&self, handle: ComputationHandle<T, E>) {
        let future = (self.inner.producer)();
        let inner = Arc::clone(&self.inner);

        tokio::spawn(async move {
            let outcome = future.await;

            {
                let mut state = inner.state.lock().unwrap();
                match &outcome {
                    Ok(value) => {
                        state.cached = Some(CachedValue {
                            value: value.clone(),
                            computed_at: Instant::now(),
                        });
                    }
                    Err(_) => {
                        // Failed attempts are not cached; the next request
                        // starts a clean attempt.
                        state.cached = None;
                    }
                }
                state.in_flight = None;
            }

            // Observers run outside the state lock.
            handle.resolve(outcome);
        });
    }
}
