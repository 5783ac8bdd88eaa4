use super::manager::SessionContext;
use super::registry::SessionRegistry;
use super::state::SessionState;
use super::stream::StreamSession;
use crate::alerts::AlertDispatcher;
use crate::analyzer::{Detector, FrameSampler, SamplerReport};
use crate::events::WorkerEvent;
use crate::frame::{FrameReader, FrameWriter};
use crate::pipeline::{AnalysisPlan, PipelinePlan, PipelineSupervisor};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Supervision task of one session, from process start to registry removal
pub(super) async fn run_session(
    session: Arc<StreamSession>,
    registry: Arc<SessionRegistry>,
    ctx: Arc<SessionContext>,
) {
    let camera_id = session.camera_id().to_string();
    let settings = &ctx.settings;

    let detector = if session.mode().analysis() {
        load_detector(&session, &ctx).await
    } else {
        None
    };

    if session.stop_requested() {
        info!(camera_id = %camera_id, "Stopped before pipeline start");
        finish(&session, &registry, &ctx);
        return;
    }

    let analysis = detector.as_ref().map(|_| AnalysisPlan {
        geometry: settings.geometry,
        fps: settings.fps,
        annotate: settings.annotate,
    });
    let plan = PipelinePlan::build(
        ctx.planner.as_ref(),
        &camera_id,
        session.source_url(),
        analysis,
    );
    let mut supervisor = PipelineSupervisor::new(camera_id.clone(), plan, settings.grace_period);

    if let Err(e) = supervisor.start().await {
        error!(camera_id = %camera_id, "Failed to start stream: {}", e);
        session.request_stop("process start failure");
        finish(&session, &registry, &ctx);
        return;
    }

    let pids = supervisor.pids();
    let process_count = pids.len();
    session.record_processes(pids);
    if session.advance(SessionState::Running) {
        ctx.events.publish(WorkerEvent::SessionRunning {
            camera_id: camera_id.clone(),
            processes: process_count,
        });
    }

    let dispatcher = Arc::new(AlertDispatcher::new(
        camera_id.clone(),
        ctx.sink.clone(),
        ctx.snapshots.clone(),
        settings.suppression_window,
    ));

    let mut sampler = match detector {
        Some(detector) => spawn_sampler(&camera_id, &mut supervisor, detector, &dispatcher, &ctx),
        None => None,
    };

    let reason = tokio::select! {
        _ = session.cancelled() => session
            .stop_reason()
            .unwrap_or_else(|| "stop requested".to_string()),
        status = supervisor.wait_ingress() => match status {
            Ok(status) => format!("ingress relay exited ({})", status),
            Err(e) => format!("ingress relay wait failed: {}", e),
        },
        report = join_sampler(&mut sampler) => match report {
            Some(report) => format!("frame sampling ended: {:?}", report.end),
            None => "frame sampler task failed".to_string(),
        },
    };

    session.request_stop(&reason);
    info!(camera_id = %camera_id, "Stopping stream: {}", reason);
    ctx.events.publish(WorkerEvent::SessionStopping {
        camera_id: camera_id.clone(),
        reason,
    });

    // The entry must outlive every process, so teardown repeats until all are reaped
    let passes = supervisor.shutdown_until_exited(settings.grace_period).await;
    if passes > 1 {
        warn!(camera_id = %camera_id, "Teardown needed {} passes", passes);
    }

    if let Some(mut handle) = sampler.take() {
        match tokio::time::timeout(settings.dispatch_drain, &mut handle).await {
            Ok(Ok(report)) => debug!(
                camera_id = %camera_id,
                "Sampler finished: {} frame(s), {} alert(s)",
                report.frames,
                report.alerts
            ),
            Ok(Err(e)) => warn!(camera_id = %camera_id, "Sampler task failed: {}", e),
            Err(_) => {
                warn!(camera_id = %camera_id, "Sampler did not finish after teardown, aborting");
                handle.abort();
            }
        }
    }

    dispatcher.drain(settings.dispatch_drain).await;
    finish(&session, &registry, &ctx);
}

async fn load_detector(
    session: &Arc<StreamSession>,
    ctx: &Arc<SessionContext>,
) -> Option<Box<dyn Detector>> {
    let factory = ctx.detectors.clone();
    let loaded = tokio::task::spawn_blocking(move || factory.load()).await;

    let reason = match loaded {
        Ok(Ok(detector)) => return Some(detector),
        Ok(Err(e)) => e.to_string(),
        Err(e) => format!("detector load task failed: {}", e),
    };

    session.disable_analysis();
    ctx.events.publish(WorkerEvent::AnalysisDisabled {
        camera_id: session.camera_id().to_string(),
        reason,
    });
    None
}

fn spawn_sampler(
    camera_id: &str,
    supervisor: &mut PipelineSupervisor,
    detector: Box<dyn Detector>,
    dispatcher: &Arc<AlertDispatcher>,
    ctx: &SessionContext,
) -> Option<JoinHandle<SamplerReport>> {
    let streams = match supervisor.take_analysis_streams() {
        Ok(Some(streams)) => streams,
        Ok(None) => return None,
        Err(e) => {
            error!(camera_id = %camera_id, "Analysis pipes unavailable: {}", e);
            return None;
        }
    };

    let geometry = ctx.settings.geometry;
    let sampler = FrameSampler::new(
        camera_id,
        FrameReader::new(streams.frames, geometry),
        streams.annotated.map(|stdin| FrameWriter::new(stdin, geometry)),
        detector,
        dispatcher.clone(),
        ctx.events.clone(),
    );

    Some(tokio::spawn(sampler.run()))
}

/// Resolve with the sampler's report; pend forever when there is none
async fn join_sampler(task: &mut Option<JoinHandle<SamplerReport>>) -> Option<SamplerReport> {
    let handle = match task.as_mut() {
        Some(handle) => handle,
        None => return std::future::pending().await,
    };

    let result = handle.await;
    *task = None;
    result.ok()
}

fn finish(session: &Arc<StreamSession>, registry: &SessionRegistry, ctx: &SessionContext) {
    session.advance(SessionState::Terminated);
    registry.remove_session(session);
    info!(camera_id = %session.camera_id(), "Stream terminated");
    ctx.events.publish(WorkerEvent::SessionTerminated {
        camera_id: session.camera_id().to_string(),
    });
}
