mod manager;
mod registry;
mod runner;
mod state;
mod stream;


pub use manager::{
    Health, SessionContext, SessionManager, SessionSettings, StartOutcome, StopOutcome,
};
pub use registry::SessionRegistry;
pub use state::{SessionMode, SessionState};
pub use stream::{ProcessInfo, SessionInfo, StreamSession};
