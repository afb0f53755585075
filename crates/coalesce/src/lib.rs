//! A single-flight, time-bounded cache for asynchronous computations.
//!
//! The primitives here wrap a computation that yields exactly one value or
//! one error. A [`CachedComputation`] remembers the last successful value for
//! a configurable time-to-live, coalesces concurrent requests into a single
//! running computation, and fans the eventual outcome out to every caller
//! through a multicast [`ComputationHandle`].
//!
//! Each request yields a [`MaybeCached`], which distinguishes structurally
//! between a value that is available right away and one that has to be
//! awaited, so callers can special-case the synchronous path.

#![warn(missing_docs)]

mod cache;
mod handle;
mod maybe;

pub use cache::*;
pub use handle::*;
pub use maybe::*;


#[cfg(any(test, feature = "test"))]
pub(crate) use tokio::time;

#[cfg(not(any(test, feature = "test")))]
pub(crate) use std::time;
