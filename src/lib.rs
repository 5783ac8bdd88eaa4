pub mod alerts;
pub mod analyzer;
pub mod config;
pub mod error;
pub mod events;
pub mod frame;
pub mod pipeline;
pub mod process;
pub mod session;

#[cfg(feature = "http")]
pub mod server;

#[cfg(test)]
pub(crate) mod testing;

pub use alerts::{AlertDispatcher, AlertEvent, AlertPayload, AlertSink, HttpAlertSink, SnapshotStore};
pub use analyzer::{Detector, DetectorFactory, FrameSampler, MotionDetector, MotionDetectorFactory};
pub use config::WorkerConfig;
pub use error::{Result, WorkerError};
pub use events::{EventBus, EventFilter, EventReceiver, WorkerEvent};
pub use frame::{BoundingBox, FrameGeometry, FrameReader, FrameWriter, RawFrame};
pub use pipeline::{PipelinePlan, PipelineSupervisor};
pub use process::{CommandPlanner, FfmpegPlanner, ProcessHandle, ProcessRole};
pub use session::{
    SessionContext, SessionManager, SessionRegistry, SessionSettings, StartOutcome, StopOutcome,
    StreamSession,
};

#[cfg(feature = "http")]
pub use server::{ControlServer, ControlServerBuilder};
