use thiserror::Error;

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Process error: {0}")]
    Process(#[from] ProcessError),

    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("Detector error: {0}")]
    Detector(#[from] DetectorError),

    #[error("Alert error: {0}")]
    Alert(#[from] AlertError),

    #[error("Server error: {0}")]
    Server(#[from] ServerError),

    #[error("Component error in {component}: {message}")]
    Component { component: String, message: String },
}

/// Failures of an external media process
#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("Failed to spawn {role} process '{program}': {source}")]
    Spawn {
        role: String,
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to signal {role} process (pid {pid}): {source}")]
    Signal {
        role: String,
        pid: u32,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to wait for {role} process: {source}")]
    Wait {
        role: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{role} process was never started")]
    NotStarted { role: String },

    #[error("{role} process has no piped {stream}")]
    MissingPipe { role: String, stream: &'static str },
}

/// Fixed-size framing failures on raw frame streams
#[derive(Error, Debug)]
pub enum FrameError {
    #[error("Short frame read: expected {expected} bytes, got {actual}")]
    ShortRead { expected: usize, actual: usize },

    #[error("Frame buffer has {actual} bytes, geometry requires {expected}")]
    SizeMismatch { expected: usize, actual: usize },

    #[error("Frame stream read failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Detection capability failures
#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("Detection capability unavailable: {details}")]
    Unavailable { details: String },

    #[error("Detection failed: {details}")]
    Detection { details: String },
}

/// Alert dispatch failures (snapshot persistence and sink delivery)
#[derive(Error, Debug)]
pub enum AlertError {
    #[error("Failed to write snapshot {path}: {details}")]
    SnapshotWrite { path: String, details: String },

    #[error("Alert sink request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Alert sink returned unexpected status {status}")]
    UnexpectedStatus { status: u16 },
}

/// Control server failures
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Failed to bind {address}: {source}")]
    BindFailed {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Server failed: {details}")]
    ServeFailed { details: String },
}

impl WorkerError {
    pub fn component<S: Into<String>>(component: S, message: S) -> Self {
        Self::Component {
            component: component.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, WorkerError>;
