use std::sync::{Arc, Mutex, Weak};

use tokio::sync::oneshot;

type Observer<T, E> = Box<dyn FnOnce(Result<T, E>) + Send>;

struct HandleState<T, E> {
    /// The terminal outcome, once it has been recorded.
    outcome: Option<Result<T, E>>,
    /// Observers waiting for the outcome. Drained on resolution.
    observers: Vec<(u64, Observer<T, E>)>,
    next_observer: u64,
}

/// A shareable, multicast handle to one running or completed computation.
///
/// Any number of observers can [`subscribe`](Self::subscribe) to the handle;
/// all of them receive the same terminal outcome exactly once each. An
/// observer attaching after the outcome has been recorded receives an
/// immediate replay, without re-triggering any work.
pub struct ComputationHandle<T, E> {
    state: Arc<Mutex<HandleState<T, E>>>,
}

impl<T, E> Clone for ComputationHandle<T, E> {
    fn clone(&self) -> Self {
        ComputationHandle {
            state: Arc::clone(&self.state),
        }
    }
}

impl<T, E> std::fmt::Debug for ComputationHandle<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (resolved, observers) = self
            .state
            .try_lock()
            .map(|s| (s.outcome.is_some(), s.observers.len()))
            .unwrap_or_default();
        f.debug_struct("ComputationHandle")
            .field("resolved", &resolved)
            .field("observers", &observers)
            .finish()
    }
}

impl<T, E> ComputationHandle<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    /// Creates a handle whose outcome has not been decided yet.
    pub(crate) fn unresolved() -> Self {
        ComputationHandle {
            state: Arc::new(Mutex::new(HandleState {
                outcome: None,
                observers: Vec::new(),
                next_observer: 0,
            })),
        }
    }

    /// Creates a handle that has already completed with `value`.
    pub fn resolved(value: T) -> Self {
        let handle = Self::unresolved();
        handle.resolve(Ok(value));
        handle
    }

    /// Creates a handle that has already failed with `error`.
    pub fn failed(error: E) -> Self {
        let handle = Self::unresolved();
        handle.resolve(Err(error));
        handle
    }

    /// Records the terminal outcome and notifies all attached observers.
    ///
    /// Only the first call has any effect; a handle delivers exactly one
    /// outcome. Observers run outside the handle's lock.
    pub(crate) fn resolve(&self, outcome: Result<T, E>) {
        let observers = {
            let mut state = self.state.lock().unwrap();
            if state.outcome.is_some() {
                return;
            }
            state.outcome = Some(outcome.clone());
            std::mem::take(&mut state.observers)
        };

        for (_, observer) in observers {
            observer(outcome.clone());
        }
    }

    fn attach(&self, observer: Observer<T, E>) -> Subscription<T, E> {
        let mut state = self.state.lock().unwrap();
        if let Some(outcome) = state.outcome.clone() {
            drop(state);
            observer(outcome);
            // Already delivered, there is nothing left to cancel.
            return Subscription {
                state: Weak::new(),
                id: 0,
            };
        }

        let id = state.next_observer;
        state.next_observer += 1;
        state.observers.push((id, observer));

        Subscription {
            state: Arc::downgrade(&self.state),
            id,
        }
    }

    /// Attaches a pair of one-shot observers for the value and error case.
    ///
    /// Exactly one of the two callbacks runs, when the computation reaches
    /// its terminal outcome. If the handle is already resolved, the callback
    /// runs immediately on the calling thread.
    pub fn subscribe<V, F>(&self, on_value: V, on_error: F) -> Subscription<T, E>
    where
        V: FnOnce(T) + Send + 'static,
        F: FnOnce(E) + Send + 'static,
    {
        self.attach(Box::new(move |outcome| match outcome {
            Ok(value) => on_value(value),
            Err(error) => on_error(error),
        }))
    }

    /// Waits for the terminal outcome.
    ///
    /// This is a convenience bridge into `async` code, equivalent to a
    /// subscription that forwards the outcome through a oneshot channel.
    pub async fn wait(&self) -> Result<T, E> {
        let (tx, rx) = oneshot::channel();
        let _ = self.attach(Box::new(move |outcome| {
            let _ = tx.send(outcome);
        }));
        rx.await
            .expect("computation abandoned without delivering an outcome")
    }

    /// Returns a handle that resolves with the value transformed by `f`.
    pub fn map<U, F>(self, f: F) -> ComputationHandle<U, E>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        let mapped = ComputationHandle::unresolved();
        let resolve = mapped.clone();
        let _ = self.attach(Box::new(move |outcome| resolve.resolve(outcome.map(f))));
        mapped
    }

    /// Returns a handle that resolves with the error transformed by `f`.
    pub fn map_err<E2, F>(self, f: F) -> ComputationHandle<T, E2>
    where
        E2: Clone + Send + 'static,
        F: FnOnce(E) -> E2 + Send + 'static,
    {
        let mapped = ComputationHandle::unresolved();
        let resolve = mapped.clone();
        let _ = self.attach(Box::new(move |outcome| resolve.resolve(outcome.map_err(f))));
        mapped
    }

    /// Returns a handle that resolves successfully in all cases, substituting
    /// `default` for any error outcome.
    pub fn replace_err(self, default: T) -> ComputationHandle<T, std::convert::Infallible> {
        let replaced = ComputationHandle::unresolved();
        let resolve = replaced.clone();
        let _ = self.attach(Box::new(move |outcome| {
            resolve.resolve(Ok(outcome.unwrap_or(default)))
        }));
        replaced
    }
}

/// Cancellation token for one observer attached to a [`ComputationHandle`].
///
/// Cancelling removes that observer only. The underlying computation keeps
/// running and every other observer still receives the outcome; in-flight
/// work is owned collectively, not by any single subscriber.
#[must_use = "dropping a subscription leaves the observer attached; call `cancel` to detach it"]
pub struct Subscription<T, E> {
    state: Weak<Mutex<HandleState<T, E>>>,
    id: u64,
}

impl<T, E> Subscription<T, E> {
    /// Detaches the observer, if the outcome has not been delivered yet.
    pub fn cancel(self) {
        if let Some(state) = self.state.upgrade() {
            let mut state = state.lock().unwrap();
            state.observers.retain(|(id, _)| *id != self.id);
        }
    }
}

impl<T, E> std::fmt::Debug for Subscription<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::Mutex;

    use super::*;

    fn recorder() -> (Arc<Mutex<Vec<Result<u32, String>>>>, impl Fn() -> Observer<u32, String>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let make = {
            let seen = Arc::clone(&seen);
            move || -> Observer<u32, String> {
                let seen = Arc::clone(&seen);
                Box::new(move |outcome| seen.lock().unwrap().push(outcome))
            }
        };
        (seen, make)
    }

    #[test]
    fn fans_out_to_all_observers() {
        let handle: ComputationHandle<u32, String> = ComputationHandle::unresolved();
        let (seen, observer) = recorder();

        let _ = handle.attach(observer());
        let _ = handle.attach(observer());

        handle.resolve(Ok(7));
        assert_eq!(*seen.lock().unwrap(), vec![Ok(7), Ok(7)]);

        // A handle delivers exactly one outcome.
        handle.resolve(Ok(8));
        assert_eq!(*seen.lock().unwrap(), vec![Ok(7), Ok(7)]);
    }

    #[test]
    fn late_attach_replays_the_outcome() {
        let handle = ComputationHandle::<u32, String>::resolved(3);
        let (seen, observer) = recorder();

        // The replay happens synchronously during attach.
        let _ = handle.attach(observer());
        assert_eq!(*seen.lock().unwrap(), vec![Ok(3)]);

        let failed = ComputationHandle::<u32, String>::failed("nope".into());
        let _ = failed.attach(observer());
        assert_eq!(
            *seen.lock().unwrap(),
            vec![Ok(3), Err("nope".to_string())]
        );
    }

    #[test]
    fn cancel_detaches_one_observer_only() {
        let handle: ComputationHandle<u32, String> = ComputationHandle::unresolved();
        let (seen, observer) = recorder();

        let cancelled = handle.attach(observer());
        let _kept = handle.attach(observer());
        cancelled.cancel();

        handle.resolve(Ok(1));
        assert_eq!(*seen.lock().unwrap(), vec![Ok(1)]);
    }

    #[test]
    fn cancel_after_resolution_is_a_noop() {
        let handle = ComputationHandle::<u32, String>::resolved(1);
        let (seen, observer) = recorder();

        let subscription = handle.attach(observer());
        subscription.cancel();
        assert_eq!(*seen.lock().unwrap(), vec![Ok(1)]);
    }

    #[test]
    fn subscribe_routes_by_outcome() {
        let seen = Arc::new(Mutex::new(Vec::new()));

        let ok = ComputationHandle::<u32, String>::resolved(5);
        let _ = ok.subscribe(
            {
                let seen = Arc::clone(&seen);
                move |v| seen.lock().unwrap().push(format!("value {v}"))
            },
            |_| panic!("value handles must not deliver errors"),
        );

        let failed = ComputationHandle::<u32, String>::failed("boom".into());
        let _ = failed.subscribe(
            |_| panic!("failed handles must not deliver values"),
            {
                let seen = Arc::clone(&seen);
                move |e| seen.lock().unwrap().push(format!("error {e}"))
            },
        );

        assert_eq!(*seen.lock().unwrap(), vec!["value 5", "error boom"]);
    }

    #[tokio::test]
    async fn wait_returns_the_outcome() {
        let handle = ComputationHandle::<u32, String>::resolved(9);
        assert_eq!(handle.wait().await, Ok(9));

        let pending: ComputationHandle<u32, String> = ComputationHandle::unresolved();
        let waiter = {
            let pending = pending.clone();
            tokio::spawn(async move { pending.wait().await })
        };
        pending.resolve(Err("gone".into()));
        assert_eq!(waiter.await.unwrap(), Err("gone".to_string()));
    }

    #[test]
    fn map_and_map_err_transform_the_outcome() {
        let (seen, observer) = recorder();

        let mapped = ComputationHandle::<u32, String>::resolved(4).map(|v| v * 10);
        let _ = mapped.attach(observer());

        let remapped = ComputationHandle::<u32, u32>::failed(404)
            .map_err(|code| format!("status {code}"));
        let _ = remapped.attach(observer());

        assert_eq!(
            *seen.lock().unwrap(),
            vec![Ok(40), Err("status 404".to_string())]
        );
    }

    #[test]
    fn replace_err_substitutes_the_default() {
        let handle = ComputationHandle::<u32, String>::failed("boom".into()).replace_err(0);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let _ = handle.subscribe(
            {
                let seen = Arc::clone(&seen);
                move |v| seen.lock().unwrap().push(v)
            },
            |infallible| match infallible {},
        );
        assert_eq!(*seen.lock().unwrap(), vec![0]);
    }
}
