mod supervisor;

pub use supervisor::{AnalysisPlan, AnalysisStreams, PipelinePlan, PipelineSupervisor, TeardownReport};
