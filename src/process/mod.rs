mod command;
mod handle;

pub use command::{CommandPlanner, FfmpegPlanner};
pub use handle::{ProcessHandle, ProcessPhase, ProcessRole, ProcessSpec, StdioMode};
