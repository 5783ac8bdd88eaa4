use crate::error::{ProcessError, Result};
use crate::frame::FrameGeometry;
use crate::process::{CommandPlanner, ProcessHandle, ProcessPhase, ProcessRole, ProcessSpec};
use futures::future::join_all;
use std::process::ExitStatus;
use std::time::Duration;
use tokio::process::{ChildStdin, ChildStdout};
use tracing::{error, info, warn};

/// Analysis parameters for a pipeline that samples frames
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnalysisPlan {
    pub geometry: FrameGeometry,
    pub fps: u32,
    /// Spawn an analysis-encode process that republishes annotated frames
    pub annotate: bool,
}

/// Launch specifications for every process of one session, in start order
#[derive(Debug, Clone)]
pub struct PipelinePlan {
    specs: Vec<ProcessSpec>,
}

impl PipelinePlan {
    /// Build the plan: analysis-decode, then analysis-encode, then ingress-relay
    pub fn build(
        planner: &dyn CommandPlanner,
        camera_id: &str,
        source_url: &str,
        analysis: Option<AnalysisPlan>,
    ) -> Self {
        let mut specs = Vec::with_capacity(3);

        if let Some(plan) = analysis {
            specs.push(planner.analysis_decode(camera_id, source_url, plan.geometry, plan.fps));
            if plan.annotate {
                specs.push(planner.analysis_encode(camera_id, plan.geometry, plan.fps));
            }
        }

        specs.push(planner.ingress_relay(camera_id, source_url));

        Self { specs }
    }

    pub fn roles(&self) -> Vec<ProcessRole> {
        self.specs.iter().map(|spec| spec.role).collect()
    }
}

/// Pipes handed to the frame sampler
pub struct AnalysisStreams {
    pub frames: ChildStdout,
    pub annotated: Option<ChildStdin>,
}

/// Outcome of a full teardown
#[derive(Debug, Clone, Default)]
pub struct TeardownReport {
    /// Processes that exited after SIGTERM or on their own
    pub exited: usize,
    /// Processes whose termination reported an error
    pub failures: usize,
}

/// Owns and coordinates every process of one session
pub struct PipelineSupervisor {
    session_id: String,
    handles: Vec<ProcessHandle>,
    grace_period: Duration,
}

impl PipelineSupervisor {
    pub fn new(session_id: impl Into<String>, plan: PipelinePlan, grace_period: Duration) -> Self {
        let session_id = session_id.into();
        let handles = plan
            .specs
            .into_iter()
            .map(|spec| ProcessHandle::new(session_id.clone(), spec))
            .collect();

        Self {
            session_id,
            handles,
            grace_period,
        }
    }

    /// Start every process in plan order. If any fails, the ones already
    /// running are torn down before the error is returned.
    pub async fn start(&mut self) -> Result<()> {
        for idx in 0..self.handles.len() {
            if let Err(e) = self.handles[idx].start() {
                error!(camera_id = %self.session_id, "Pipeline start failed: {}", e);
                let report = self.shutdown().await;
                if report.failures > 0 {
                    warn!(
                        camera_id = %self.session_id,
                        "{} sibling process(es) failed to terminate cleanly after start failure",
                        report.failures
                    );
                }
                return Err(e.into());
            }
        }

        info!(
            camera_id = %self.session_id,
            "Pipeline started with {} process(es)",
            self.handles.len()
        );
        Ok(())
    }

    /// Hand over the decode stdout and, when present, the encode stdin
    pub fn take_analysis_streams(&mut self) -> Result<Option<AnalysisStreams>> {
        let frames = match self.handle_mut(ProcessRole::AnalysisDecode) {
            Some(decode) => decode.take_stdout()?,
            None => return Ok(None),
        };

        let annotated = match self.handle_mut(ProcessRole::AnalysisEncode) {
            Some(encode) => Some(encode.take_stdin()?),
            None => None,
        };

        Ok(Some(AnalysisStreams { frames, annotated }))
    }

    /// Wait for the ingress-relay to exit. Cancel safe.
    pub async fn wait_ingress(&mut self) -> Result<ExitStatus> {
        let session_id = self.session_id.clone();
        let ingress = self
            .handle_mut(ProcessRole::IngressRelay)
            .ok_or_else(|| ProcessError::NotStarted {
                role: ProcessRole::IngressRelay.to_string(),
            })?;

        let status = ingress.wait().await?;
        info!(camera_id = %session_id, "Ingress relay exited with {}", status);
        Ok(status)
    }

    /// Signal every running process, wait for each with kill escalation
    pub async fn shutdown(&mut self) -> TeardownReport {
        let grace = self.grace_period;
        let session_id = self.session_id.clone();

        let results = join_all(
            self.handles
                .iter_mut()
                .map(|handle| async move { (handle.role(), handle.terminate(grace).await) }),
        )
        .await;

        let mut report = TeardownReport::default();
        for (role, result) in results {
            match result {
                Ok(Some(_)) => report.exited += 1,
                Ok(None) => {}
                Err(e) => {
                    report.failures += 1;
                    error!(camera_id = %session_id, "Failed to terminate {} process: {}", role, e);
                }
            }
        }

        info!(
            camera_id = %session_id,
            "Pipeline terminated ({} exited, {} failed)",
            report.exited,
            report.failures
        );
        report
    }

    /// True once no owned process is still running
    /// Repeat `shutdown` until every started process has been reaped, pausing
    /// `retry` between passes. Returns the number of passes taken.
    pub async fn shutdown_until_exited(&mut self, retry: Duration) -> u32 {
        let mut passes = 0;
        loop {
            self.shutdown().await;
            passes += 1;
            if self.all_exited() {
                return passes;
            }

            error!(
                camera_id = %self.session_id,
                "Processes still alive after teardown pass {}: {:?}",
                passes,
                self.phases()
            );
            tokio::time::sleep(retry).await;
        }
    }

    pub fn all_exited(&self) -> bool {
        self.handles
            .iter()
            .all(|h| matches!(h.phase(), ProcessPhase::Exited | ProcessPhase::NotStarted))
    }

    pub fn phases(&self) -> Vec<(ProcessRole, ProcessPhase)> {
        self.handles.iter().map(|h| (h.role(), h.phase())).collect()
    }

    pub fn pids(&self) -> Vec<(ProcessRole, u32)> {
        self.handles
            .iter()
            .filter_map(|h| h.pid().map(|pid| (h.role(), pid)))
            .collect()
    }

    fn handle_mut(&mut self, role: ProcessRole) -> Option<&mut ProcessHandle> {
        self.handles.iter_mut().find(|h| h.role() == role)
    }
}
