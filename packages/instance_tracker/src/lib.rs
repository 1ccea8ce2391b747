//! Live-object population tracking for memory profiling.
//!
//! The crate maintains, per class of tracked object, the set of instances
//! that are currently alive: an allocation hook registers each new instance
//! under a weak reference, periodic scans observe which targets have been
//! reclaimed, and two-tier statistics roll the population up into counts,
//! sizes and capacities. Query utilities sort and group point-in-time
//! snapshots for reporting.
//!
//! The engine never keeps a tracked object alive and never crashes the
//! program it is profiling: every call into target-owned code is contained.
//!
//! Reclamation is detected lazily. An instance whose last strong reference
//! is dropped stays in the live count until the next scan of its class
//! observes the dead weak reference, so `live()` is an upper bound between
//! refreshes and exact immediately after one.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//!
//! use instance_tracker::{Catalog, Options, Tracked};
//!
//! struct Session {
//!     buffer: Vec<u8>,
//! }
//!
//! impl Tracked for Session {
//!     fn size_hint(&self) -> Option<u64> {
//!         Some(self.buffer.len() as u64)
//!     }
//!
//!     fn capacity_count(&self) -> Option<u64> {
//!         Some(self.buffer.capacity() as u64)
//!     }
//! }
//!
//! let options = Options::builder()
//!     .capture_size(true)
//!     .capture_capacity(true)
//!     .build()?;
//! let catalog = Catalog::new(options);
//!
//! let tracker = catalog
//!     .tracker(None, "myapp::Session", size_of::<Session>())
//!     .expect("a fixed-options catalog declines nothing");
//!
//! let session: Arc<dyn Tracked> = Arc::new(Session {
//!     buffer: vec![0; 64],
//! });
//! tracker.record(&session);
//!
//! tracker.refresh();
//! assert_eq!(tracker.overall_stats().live(), 1);
//! assert_eq!(tracker.overall_stats().size_sum(), 64);
//!
//! drop(session);
//! tracker.refresh();
//! assert_eq!(tracker.overall_stats().live(), 0);
//! assert_eq!(tracker.overall_stats().reclaimed(), 1);
//! # Ok::<(), instance_tracker::OptionsError>(())
//! ```

mod aggregate;
mod catalog;
mod class_tracker;
mod constants;
mod group;
mod live_set;
mod options;
mod record;
mod sort;
mod stack;
mod sweeper;
mod tracked;

pub use aggregate::Aggregate;
pub use catalog::{Catalog, OptionsResolver};
pub use class_tracker::ClassTracker;
pub use group::{GroupCount, GroupKey, GroupValue, TimeBucket, group};
pub use options::{Options, OptionsBuilder, OptionsError};
pub use record::InstanceRecord;
pub use sort::{Direction, SortKey, sort};
pub use stack::{CallStack, FrameInfo};
pub use sweeper::{DEFAULT_SWEEP_INTERVAL, Sweeper};
pub use tracked::Tracked;
