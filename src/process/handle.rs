use crate::error::ProcessError;
use std::fmt;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Role a media process plays inside a session pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcessRole {
    /// Copies the source stream unmodified to the publish endpoint
    IngressRelay,
    /// Decodes the source into fixed-size raw frames on stdout
    AnalysisDecode,
    /// Re-encodes raw frames from stdin and publishes them
    AnalysisEncode,
}

impl ProcessRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessRole::IngressRelay => "ingress-relay",
            ProcessRole::AnalysisDecode => "analysis-decode",
            ProcessRole::AnalysisEncode => "analysis-encode",
        }
    }
}

impl fmt::Display for ProcessRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a standard stream of the child is connected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StdioMode {
    Null,
    Inherit,
    Piped,
}

impl StdioMode {
    fn to_stdio(self) -> Stdio {
        match self {
            StdioMode::Null => Stdio::null(),
            StdioMode::Inherit => Stdio::inherit(),
            StdioMode::Piped => Stdio::piped(),
        }
    }
}

/// Everything needed to launch one process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessSpec {
    pub role: ProcessRole,
    pub program: String,
    pub args: Vec<String>,
    pub stdin: StdioMode,
    pub stdout: StdioMode,
}

impl ProcessSpec {
    pub fn new<P, I, S>(role: ProcessRole, program: P, args: I) -> Self
    where
        P: Into<String>,
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            role,
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            stdin: StdioMode::Null,
            stdout: StdioMode::Null,
        }
    }

    pub fn stdin(mut self, mode: StdioMode) -> Self {
        self.stdin = mode;
        self
    }

    pub fn stdout(mut self, mode: StdioMode) -> Self {
        self.stdout = mode;
        self
    }
}

/// Lifecycle phase of a process handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessPhase {
    NotStarted,
    Running,
    Signaled,
    Exited,
}

/// Exclusively owned handle to one external process
pub struct ProcessHandle {
    spec: ProcessSpec,
    session_id: String,
    child: Option<Child>,
    pid: Option<u32>,
    phase: ProcessPhase,
    exit_status: Option<ExitStatus>,
}

impl ProcessHandle {
    /// Create a handle for a process that has not been launched yet
    pub fn new(session_id: impl Into<String>, spec: ProcessSpec) -> Self {
        Self {
            spec,
            session_id: session_id.into(),
            child: None,
            pid: None,
            phase: ProcessPhase::NotStarted,
            exit_status: None,
        }
    }

    /// Launch the process with the configured stdio modes
    pub fn start(&mut self) -> Result<(), ProcessError> {
        if self.phase != ProcessPhase::NotStarted {
            warn!(
                camera_id = %self.session_id,
                "{} process already started (phase {:?})",
                self.spec.role,
                self.phase
            );
            return Ok(());
        }

        let mut command = Command::new(&self.spec.program);
        command
            .args(&self.spec.args)
            .stdin(self.spec.stdin.to_stdio())
            .stdout(self.spec.stdout.to_stdio())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        let child = command.spawn().map_err(|e| ProcessError::Spawn {
            role: self.spec.role.to_string(),
            program: self.spec.program.clone(),
            source: e,
        })?;

        self.pid = child.id();
        self.child = Some(child);
        self.phase = ProcessPhase::Running;

        info!(
            camera_id = %self.session_id,
            pid = ?self.pid,
            "Started {} process",
            self.spec.role
        );
        Ok(())
    }

    pub fn role(&self) -> ProcessRole {
        self.spec.role
    }

    pub fn phase(&self) -> ProcessPhase {
        self.phase
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Take ownership of the child's piped stdout
    pub fn take_stdout(&mut self) -> Result<ChildStdout, ProcessError> {
        self.child
            .as_mut()
            .and_then(|child| child.stdout.take())
            .ok_or_else(|| ProcessError::MissingPipe {
                role: self.spec.role.to_string(),
                stream: "stdout",
            })
    }

    /// Take ownership of the child's piped stdin
    pub fn take_stdin(&mut self) -> Result<ChildStdin, ProcessError> {
        self.child
            .as_mut()
            .and_then(|child| child.stdin.take())
            .ok_or_else(|| ProcessError::MissingPipe {
                role: self.spec.role.to_string(),
                stream: "stdin",
            })
    }

    /// Ask the process to exit (SIGTERM). Does not wait.
    pub fn signal_terminate(&mut self) -> Result<(), ProcessError> {
        if self.phase != ProcessPhase::Running {
            return Ok(());
        }

        if self.poll_exited() {
            return Ok(());
        }

        #[cfg(unix)]
        {
            if let Some(pid) = self.pid {
                // SAFETY: pid belongs to a child we spawned and have not reaped yet
                let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
                if rc != 0 {
                    let err = std::io::Error::last_os_error();
                    if err.raw_os_error() != Some(libc::ESRCH) {
                        return Err(ProcessError::Signal {
                            role: self.spec.role.to_string(),
                            pid,
                            source: err,
                        });
                    }
                }
            }
        }

        #[cfg(not(unix))]
        {
            if let Some(child) = self.child.as_mut() {
                child.start_kill().map_err(|e| ProcessError::Signal {
                    role: self.spec.role.to_string(),
                    pid: self.pid.unwrap_or_default(),
                    source: e,
                })?;
            }
        }

        self.phase = ProcessPhase::Signaled;
        debug!(
            camera_id = %self.session_id,
            pid = ?self.pid,
            "Sent termination signal to {} process",
            self.spec.role
        );
        Ok(())
    }

    /// Block the calling task until the process exits.
    ///
    /// Cancel safe: dropping the future leaves the handle untouched.
    pub async fn wait(&mut self) -> Result<ExitStatus, ProcessError> {
        if let Some(status) = self.exit_status {
            return Ok(status);
        }

        let child = self.child.as_mut().ok_or_else(|| ProcessError::NotStarted {
            role: self.spec.role.to_string(),
        })?;

        let status = child.wait().await.map_err(|e| ProcessError::Wait {
            role: self.spec.role.to_string(),
            source: e,
        })?;

        self.mark_exited(status);
        Ok(status)
    }

    /// Forcibly kill the process and reap it
    pub async fn kill(&mut self) -> Result<ExitStatus, ProcessError> {
        if let Some(status) = self.exit_status {
            return Ok(status);
        }

        let child = self.child.as_mut().ok_or_else(|| ProcessError::NotStarted {
            role: self.spec.role.to_string(),
        })?;

        warn!(
            camera_id = %self.session_id,
            pid = ?self.pid,
            "Killing {} process",
            self.spec.role
        );

        child.kill().await.map_err(|e| ProcessError::Signal {
            role: self.spec.role.to_string(),
            pid: self.pid.unwrap_or_default(),
            source: e,
        })?;

        self.wait().await
    }

    /// Signal, wait up to `grace`, then kill. Returns `None` for a handle
    /// that was never started.
    pub async fn terminate(&mut self, grace: Duration) -> Result<Option<ExitStatus>, ProcessError> {
        if self.phase == ProcessPhase::NotStarted {
            return Ok(None);
        }
        if let Some(status) = self.exit_status {
            return Ok(Some(status));
        }

        if let Err(e) = self.signal_terminate() {
            warn!(camera_id = %self.session_id, "{}", e);
        }

        match timeout(grace, self.wait()).await {
            Ok(result) => result.map(Some),
            Err(_) => {
                warn!(
                    camera_id = %self.session_id,
                    "{} process did not exit within {:?} of SIGTERM",
                    self.spec.role,
                    grace
                );
                self.kill().await.map(Some)
            }
        }
    }

    fn poll_exited(&mut self) -> bool {
        let polled = self.child.as_mut().map(|child| child.try_wait());
        match polled {
            Some(Ok(Some(status))) => {
                self.mark_exited(status);
                true
            }
            _ => false,
        }
    }

    fn mark_exited(&mut self, status: ExitStatus) {
        self.exit_status = Some(status);
        self.phase = ProcessPhase::Exited;
        debug!(
            camera_id = %self.session_id,
            pid = ?self.pid,
            "{} process exited with {}",
            self.spec.role,
            status
        );
    }
}

impl fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("role", &self.spec.role)
            .field("session_id", &self.session_id)
            .field("pid", &self.pid)
            .field("phase", &self.phase)
            .finish()
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    fn sh(role: ProcessRole, script: &str) -> ProcessSpec {
        ProcessSpec::new(role, "sh", ["-c", script])
    }

    #[tokio::test]
    async fn test_start_and_wait_natural_exit() {
        let mut handle = ProcessHandle::new("cam1", sh(ProcessRole::IngressRelay, "exit 3"));
        assert_eq!(handle.phase(), ProcessPhase::NotStarted);

        handle.start().unwrap();
        assert_eq!(handle.phase(), ProcessPhase::Running);
        assert!(handle.pid().is_some());

        let status = handle.wait().await.unwrap();
        assert_eq!(status.code(), Some(3));
        assert_eq!(handle.phase(), ProcessPhase::Exited);
    }

    #[tokio::test]
    async fn test_spawn_failure() {
        let spec = ProcessSpec::new(
            ProcessRole::AnalysisDecode,
            "/nonexistent/definitely-not-ffmpeg",
            Vec::<String>::new(),
        );
        let mut handle = ProcessHandle::new("cam1", spec);
        let err = handle.start().unwrap_err();
        assert!(matches!(err, ProcessError::Spawn { .. }));
        assert_eq!(handle.phase(), ProcessPhase::NotStarted);
    }

    #[tokio::test]
    async fn test_terminate_graceful() {
        let mut handle = ProcessHandle::new("cam1", ProcessSpec::new(ProcessRole::IngressRelay, "sleep", ["30"]));
        handle.start().unwrap();

        let status = handle
            .terminate(Duration::from_secs(5))
            .await
            .unwrap()
            .unwrap();
        assert!(!status.success());
        assert_eq!(handle.phase(), ProcessPhase::Exited);
    }

    #[tokio::test]
    async fn test_terminate_escalates_to_kill() {
        let mut handle = ProcessHandle::new(
            "cam1",
            sh(ProcessRole::IngressRelay, "trap '' TERM; while true; do sleep 1; done"),
        );
        handle.start().unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        let started = std::time::Instant::now();
        let status = handle
            .terminate(Duration::from_millis(300))
            .await
            .unwrap()
            .unwrap();
        assert!(!status.success());
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(handle.phase(), ProcessPhase::Exited);
    }

    #[tokio::test]
    async fn test_terminate_not_started_is_noop() {
        let mut handle = ProcessHandle::new("cam1", sh(ProcessRole::AnalysisEncode, "cat"));
        assert!(handle.terminate(Duration::from_millis(10)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_piped_stdout() {
        let spec = sh(ProcessRole::AnalysisDecode, "printf abc").stdout(StdioMode::Piped);
        let mut handle = ProcessHandle::new("cam1", spec);
        handle.start().unwrap();

        let mut stdout = handle.take_stdout().unwrap();
        let mut out = String::new();
        stdout.read_to_string(&mut out).await.unwrap();
        assert_eq!(out, "abc");
        assert!(handle.take_stdout().is_err());
        handle.wait().await.unwrap();
    }
}
