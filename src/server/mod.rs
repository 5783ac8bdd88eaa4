mod control;
mod handlers;


pub use control::{router, ControlServer, ControlServerBuilder, ServerState};
pub use handlers::{StartStreamRequest, StopStreamRequest};
