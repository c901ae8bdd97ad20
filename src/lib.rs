//! Core library for the caravan cluster migration tool.
//!
//! The crate coordinates data migrations run by a remote cluster: it
//! submits start, estimate, and cancel requests over a coordination
//! channel, follows the shared status document to a terminal state, and
//! collects the migration report and diagnostic logs on the way out.

pub mod bundle;
pub mod cancel;
pub mod channel;
pub mod config;
pub mod error;
pub mod estimate;
pub mod grid;
pub mod protocol;
pub mod query;
pub mod report;
pub mod stage;
pub mod start;
pub mod store;
pub mod test_support;
pub mod tracker;

pub use bundle::{BundleError, BundleFile, ConfigBundle};
pub use cancel::CancelFlow;
pub use channel::{Channel, ChannelFuture, Subscription};
pub use config::{ConfigError, CoordinatorConfig};
pub use error::MigrationError;
pub use estimate::{EstimateFlow, EstimateSummary};
pub use grid::{GridChannel, GridError};
pub use protocol::{
    CancelRequest, CodecError, InProgressMarker, MigrationItem, MigrationRequest, RequestKind,
    Status, StatusDocument, UpdateMessage, WireValue,
};
pub use query::QueryFlow;
pub use stage::{PipelineError, Reporter, Stage, StageFailure, StageStatus};
pub use start::{StartFlow, StartRequest};
pub use tracker::ProgressTracker;
