//! Translation server process supervision
//!
//! Owns the single server process: launches it, watches its combined output for
//! the ready signal and restarts it when it has died between requests.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Configuration;
use crate::error::{BridgeError, Result};
use crate::install::InstallationLayout;

/// Printed by the server once the model is loaded and it accepts requests
pub const READY_SIGNAL: &str = "(Press CTRL+C to quit)";

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Receives every line the server writes to stdout or stderr
#[cfg_attr(test, mockall::automock)]
pub trait BackendOutputSink: Send + Sync {
    fn line(&self, line: &str);
}

/// Forwards server output to the log
pub struct TracingOutputSink;

impl BackendOutputSink for TracingOutputSink {
    fn line(&self, line: &str) {
        info!(target: "sugoi_backend", "{}", line);
    }
}

/// Command line used to start the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub working_directory: PathBuf,
    pub hide_window: bool,
}

impl LaunchSpec {
    pub fn new<P: Into<PathBuf>, W: Into<PathBuf>>(program: P, working_directory: W) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_directory: working_directory.into(),
            hide_window: false,
        }
    }

    /// Add an argument
    pub fn arg<S: Into<String>>(mut self, arg: S) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn hide_window(mut self, hide: bool) -> Self {
        self.hide_window = hide;
        self
    }

    /// Server launch: `<python> <script> <port> [--cuda] [--ctranslate2 [--ctranslate2-data-dir <dir>]]`
    pub fn for_server(layout: &InstallationLayout, script: &Path, config: &Configuration) -> Self {
        let mut spec = Self::new(&layout.interpreter_path, &layout.working_directory)
            .arg(script.to_string_lossy())
            .arg(config.server_port.to_string())
            .hide_window(config.hide_process_window);

        if config.use_cuda {
            spec = spec.arg("--cuda");
        }

        if config.use_accelerated_model {
            spec = spec.arg("--ctranslate2");
            if let Some(model_dir) = &layout.accelerated_model_path {
                spec = spec
                    .arg("--ctranslate2-data-dir")
                    .arg(model_dir.to_string_lossy());
            }
        }

        spec
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .current_dir(&self.working_directory)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        #[cfg(windows)]
        if self.hide_window {
            cmd.creation_flags(CREATE_NO_WINDOW);
        }

        cmd
    }
}

/// Snapshot of the supervised process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProcessStatus {
    pub pid: Option<u32>,
    pub started: bool,
    pub ready: bool,
    /// Exit code of the last process that died, until a new one is launched
    pub exit_code: Option<i32>,
}

struct BackendProcess {
    child: Child,
    pid: Option<u32>,
    ready: watch::Receiver<bool>,
}

#[derive(Default)]
struct SupervisorState {
    process: Option<BackendProcess>,
    last_exit_code: Option<i32>,
    closed: bool,
}

impl SupervisorState {
    fn status(&self) -> ProcessStatus {
        match &self.process {
            Some(process) => ProcessStatus {
                pid: process.pid,
                started: true,
                ready: *process.ready.borrow(),
                exit_code: None,
            },
            None => ProcessStatus {
                exit_code: self.last_exit_code,
                ..ProcessStatus::default()
            },
        }
    }
}

/// Flip `ready` the first time `line` carries the ready signal. Returns true on that flip.
pub fn observe_line(ready: &watch::Sender<bool>, line: &str) -> bool {
    ready.send_if_modified(|ready| {
        if !*ready && line.contains(READY_SIGNAL) {
            *ready = true;
            true
        } else {
            false
        }
    })
}

pub struct ProcessSupervisor {
    spec: LaunchSpec,
    ready_timeout: Option<Duration>,
    sink: Option<Arc<dyn BackendOutputSink>>,
    state: Mutex<SupervisorState>,
}

impl ProcessSupervisor {
    /// `sink` receives the server output; pass `None` to only watch for readiness
    pub fn new(
        spec: LaunchSpec,
        ready_timeout: Option<Duration>,
        sink: Option<Arc<dyn BackendOutputSink>>,
    ) -> Self {
        Self {
            spec,
            ready_timeout,
            sink,
            state: Mutex::new(SupervisorState::default()),
        }
    }

    pub fn spec(&self) -> &LaunchSpec {
        &self.spec
    }

    pub async fn status(&self) -> ProcessStatus {
        self.state.lock().await.status()
    }

    pub async fn is_ready(&self) -> bool {
        self.status().await.ready
    }

    /// Launch the server unless a live process already exists
    pub async fn start(&self) -> Result<ProcessStatus> {
        let mut state = self.state.lock().await;

        if let Some(process) = state.process.as_mut() {
            if process.child.try_wait()?.is_none() {
                return Ok(state.status());
            }
        }

        self.launch(&mut state)
    }

    /// Restart the server if it died since the last check
    pub async fn ensure_running(&self) -> Result<ProcessStatus> {
        let mut state = self.state.lock().await;

        let exited = match state.process.as_mut() {
            Some(process) => process.child.try_wait()?,
            None => None,
        };

        if let Some(exit_status) = exited {
            let code = exit_status.code();
            warn!(
                "Translation server process exited unexpectedly [status {}]",
                code.map(|c| c.to_string()).unwrap_or_else(|| "unknown".to_string())
            );
            state.process = None;
            state.last_exit_code = code;
        }

        if state.process.is_none() {
            warn!("Translation server process not running. Starting...");
            return self.launch(&mut state);
        }

        Ok(state.status())
    }

    /// Suspend until the current process prints the ready signal
    pub async fn wait_ready(&self, cancel: &CancellationToken) -> Result<()> {
        let mut ready = {
            let state = self.state.lock().await;
            match &state.process {
                Some(process) => process.ready.clone(),
                None => return Err(BridgeError::backend("Translation server is not running", "")),
            }
        };

        let wait = async move {
            ready
                .wait_for(|ready| *ready)
                .await
                .map(|_| ())
                .map_err(|_| BridgeError::backend("Translation server exited before becoming ready", ""))
        };

        let bounded = async {
            match self.ready_timeout {
                Some(limit) => match tokio::time::timeout(limit, wait).await {
                    Ok(result) => result,
                    Err(_) => Err(BridgeError::BackendTimeout(limit)),
                },
                None => wait.await,
            }
        };

        tokio::select! {
            _ = cancel.cancelled() => Err(BridgeError::Cancelled),
            result = bounded => result,
        }
    }

    /// Kill the server and release its handles. `start` may be called again afterwards.
    pub async fn stop(&self) -> Result<()> {
        let process = self.state.lock().await.process.take();

        if let Some(mut process) = process {
            if process.child.try_wait()?.is_none() {
                process.child.kill().await?;
            }
            info!("Translation server stopped (PID: {:?})", process.pid);
        }

        Ok(())
    }

    /// Stop the server for good. Later `start`/`ensure_running` calls fail instead of relaunching.
    pub async fn close(&self) -> Result<()> {
        let process = {
            let mut state = self.state.lock().await;
            state.closed = true;
            state.process.take()
        };

        if let Some(mut process) = process {
            if process.child.try_wait()?.is_none() {
                process.child.kill().await?;
            }
            info!("Translation server closed (PID: {:?})", process.pid);
        }

        Ok(())
    }

    fn launch(&self, state: &mut SupervisorState) -> Result<ProcessStatus> {
        if state.closed {
            return Err(BridgeError::backend("Translation server has been shut down", ""));
        }

        if self.spec.program.as_os_str().is_empty() || self.spec.working_directory.as_os_str().is_empty() {
            return Err(BridgeError::ProcessLaunch(
                "interpreter path and working directory must be resolved before launching".to_string(),
            ));
        }

        info!(
            "Running Sugoi offline translation server:\n\tExecPath: {}\n\tPythonPath: {}\n\tArgs: {:?}",
            self.spec.working_directory.display(),
            self.spec.program.display(),
            self.spec.args
        );

        let mut child = self.spec.command().spawn().map_err(|e| {
            BridgeError::ProcessLaunch(format!("{}: {}", self.spec.program.display(), e))
        })?;

        let (ready_tx, ready_rx) = watch::channel(false);
        let ready_tx = Arc::new(ready_tx);

        if let Some(stdout) = child.stdout.take() {
            spawn_reader(stdout, ready_tx.clone(), self.sink.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            spawn_reader(stderr, ready_tx, self.sink.clone());
        }

        let pid = child.id();
        debug!("Translation server launched (PID: {:?})", pid);

        state.process = Some(BackendProcess {
            child,
            pid,
            ready: ready_rx,
        });
        state.last_exit_code = None;

        Ok(state.status())
    }
}

fn spawn_reader<R>(stream: R, ready: Arc<watch::Sender<bool>>, sink: Option<Arc<dyn BackendOutputSink>>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(stream);
        let mut buf = Vec::new();

        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    // Server output is not guaranteed to be valid UTF-8
                    let line = String::from_utf8_lossy(&buf);
                    let line = line.trim_end_matches(['\r', '\n']);

                    if let Some(sink) = &sink {
                        sink.line(line);
                    }
                    if observe_line(&ready, line) {
                        info!("Translation server is ready");
                    }
                }
                Err(e) => {
                    debug!("Stopped reading translation server output: {}", e);
                    break;
                }
            }
        }
    });
}
