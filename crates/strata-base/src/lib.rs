//! Foundation types for strata byte streams.
//!
//! Every Reader, Writer, decorator, and codec in the workspace builds on the
//! pieces defined here.
//!
//! # Key Types
//!
//! - [`Status`] / [`ErrorKind`] -- failure value with an ordered annotation chain
//! - [`ObjectState`] -- open/closed/failed lifecycle with sticky first failure
//! - [`Dependency`] -- borrow-or-own wrapper held by every decorator
//! - [`CapabilityCell`] -- memoized answer to "does the backend support X, and if not, why"
//! - [`KeyedRecyclingPool`] -- bounded, thread-safe cache of expensive backend engines

pub mod capability;
pub mod dependency;
pub mod error;
pub mod object;
pub mod pool;

pub use capability::{CapabilityCell, Support};
pub use dependency::{AnyDependency, Dependency, Owned};
pub use error::{ErrorKind, Result, Status};
pub use object::{ObjectState, State};
pub use pool::{KeyedRecyclingPool, PoolStats, Recycled, RecyclingPool, DEFAULT_MAX_IDLE};

/// An absolute byte position in a stream.
pub type Position = u64;
