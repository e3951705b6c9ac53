//! Synchronization with a remote CI service.
//!
//! Each remote builder gets a [`BuilderSynchronizer`]. Polling a synchronizer
//! yields a [`SyncCycle`] through which build requests are scheduled onto the
//! builder's slaves. The [`Poller`] drives every synchronizer periodically.

pub mod entry;
pub mod error;
pub mod poller;
pub mod properties;
pub mod remote;
pub mod syncer;

#[cfg(test)]
mod testing;

pub use entry::{RemoteBuildEntry, StatusUpdate};
pub use error::{SyncError, SyncResult};
pub use poller::{BuilderFailure, CycleReport, Poller, PollerConfig, StatusReport};
pub use remote::{HttpRemote, RemoteService};
pub use syncer::{BuilderSynchronizer, ScheduledBuild, SyncCycle};
