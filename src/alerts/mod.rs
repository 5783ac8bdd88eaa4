mod dispatcher;
mod sink;
mod snapshot;
mod types;

pub use dispatcher::AlertDispatcher;
pub use sink::{AlertSink, HttpAlertSink};
pub use snapshot::SnapshotStore;
pub use types::{AlertEvent, AlertPayload};
