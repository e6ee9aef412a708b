//! Geotag job runner
//!
//! Runs exiftool (or the Python geotag script) as a child process, merging
//! its stdout and stderr into a bounded log and a progress estimate.

use crate::domain::geotag::{GeotagBackend, GeotagRequest, GeotagStatus, ProgressTracker};
use crate::domain::log_buffer::{LogBuffer, GEOTAG_LOG_CAPACITY};
use crate::domain::models::AppEvent;
use crate::domain::settings::GeotagSettings;
use crate::infrastructure::error::GeotagError;
use std::ffi::OsStr;
use std::io;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Where exiftool is looked for when it is not on `PATH`
const EXIFTOOL_FALLBACK_DIRS: &[&str] = &["/opt/homebrew/bin", "/usr/local/bin", "/usr/bin"];

/// A geotag run as requested by the user
#[derive(Debug, Clone)]
pub struct GeotagJob {
    pub backend: GeotagBackend,
    pub request: GeotagRequest,
    pub python: String,
    pub script: PathBuf,
}

impl GeotagJob {
    pub fn new(settings: &GeotagSettings, request: GeotagRequest) -> Self {
        Self {
            backend: settings.backend,
            request,
            python: settings.python.clone(),
            script: PathBuf::from(&settings.script_path),
        }
    }
}

/// One child process to run
#[derive(Debug, Clone)]
pub struct Invocation {
    pub label: String,
    pub program: PathBuf,
    pub args: Vec<String>,
}

pub fn find_exiftool() -> Option<PathBuf> {
    find_executable(
        "exiftool",
        std::env::var_os("PATH").as_deref(),
        EXIFTOOL_FALLBACK_DIRS.iter().map(Path::new),
    )
}

/// Search `path_var` first, then `fallbacks`
pub fn find_executable<'a>(
    name: &str,
    path_var: Option<&OsStr>,
    fallbacks: impl IntoIterator<Item = &'a Path>,
) -> Option<PathBuf> {
    path_var
        .into_iter()
        .flat_map(|paths| std::env::split_paths(paths))
        .chain(fallbacks.into_iter().map(Path::to_path_buf))
        .map(|dir| dir.join(name))
        .find(|candidate| is_executable(candidate))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// Child processes needed for `job`
pub fn invocations(job: &GeotagJob) -> Result<Vec<Invocation>, GeotagError> {
    match job.backend {
        GeotagBackend::Exiftool => {
            let exiftool = find_exiftool().ok_or(GeotagError::ToolNotFound)?;
            Ok(job
                .request
                .exiftool_passes()
                .into_iter()
                .map(|pass| Invocation {
                    label: pass.label.to_string(),
                    program: exiftool.clone(),
                    args: pass.args,
                })
                .collect())
        }
        GeotagBackend::PythonScript => Ok(vec![Invocation {
            label: "geotag script".to_string(),
            program: PathBuf::from(&job.python),
            args: job.request.script_args(&job.script),
        }]),
    }
}

fn validate(request: &GeotagRequest) -> Result<(), GeotagError> {
    if !request.gpx.is_file() {
        return Err(GeotagError::GpxNotFound(request.gpx.clone()));
    }
    if !request.target_dir.is_dir() {
        return Err(GeotagError::TargetNotFound(request.target_dir.clone()));
    }
    Ok(())
}

/// Forward output lines until EOF. The pipe is drained to the end so the
/// child never dies of a closed pipe.
async fn forward_lines<R>(reader: R, tx: mpsc::UnboundedSender<String>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                // File names on camera cards are not always UTF-8
                let _ = tx.send(String::from_utf8_lossy(&buf).into_owned());
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                warn!("Stopped reading tool output: {}", e);
                break;
            }
        }
    }
}

pub struct GeotagRunner {
    events: mpsc::UnboundedSender<AppEvent>,
    log: LogBuffer,
    progress: ProgressTracker,
    status: GeotagStatus,
}

impl GeotagRunner {
    pub fn new(events: mpsc::UnboundedSender<AppEvent>) -> Self {
        Self {
            events,
            log: LogBuffer::new(GEOTAG_LOG_CAPACITY),
            progress: ProgressTracker::default(),
            status: GeotagStatus::Idle,
        }
    }

    pub fn status(&self) -> &GeotagStatus {
        &self.status
    }

    pub fn progress(&self) -> f64 {
        self.progress.value()
    }

    pub fn log(&self) -> &LogBuffer {
        &self.log
    }

    /// Validate, locate the tool and run `job` until it ends or `cancel`
    /// resolves
    pub async fn run<F>(&mut self, job: &GeotagJob, cancel: F) -> GeotagStatus
    where
        F: Future<Output = ()>,
    {
        let prepared = validate(&job.request).and_then(|()| invocations(job));
        match prepared {
            Ok(invocations) => self.run_invocations(&invocations, cancel).await,
            Err(e) => {
                error!("Geotag setup failed: {}", e);
                self.note(format!("❌ {}", e));
                self.finish(GeotagStatus::Error(e.to_string()))
            }
        }
    }

    /// Run every invocation in order; all of them must exit 0
    pub async fn run_invocations<F>(&mut self, invocations: &[Invocation], cancel: F) -> GeotagStatus
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(cancel);
        self.status = GeotagStatus::Running;
        self.progress = ProgressTracker::default();
        self.log.clear();
        let _ = self.events.send(AppEvent::GeotagProgress(0.0));

        let mut failed_code = None;
        for invocation in invocations {
            self.note(format!("▶ {}", invocation.label));
            match self.run_tool(invocation, &mut cancel).await {
                Ok(Some(0)) => {}
                Ok(Some(code)) => {
                    self.note(format!("{} exited with code {}", invocation.label, code));
                    failed_code.get_or_insert(code);
                }
                Ok(None) => {
                    self.note("Geotagging cancelled".to_string());
                    return self.finish(GeotagStatus::Cancelled);
                }
                Err(e) => {
                    error!("{}", e);
                    self.note(format!("❌ {}", e));
                    return self.finish(GeotagStatus::Error(e.to_string()));
                }
            }
        }

        match failed_code {
            None => {
                self.progress.complete();
                let _ = self.events.send(AppEvent::GeotagProgress(self.progress.value()));
                self.finish(GeotagStatus::Complete)
            }
            Some(code) => self.finish(GeotagStatus::Error(format!("exit code {}", code))),
        }
    }

    /// Returns the exit code, or `None` when cancelled
    async fn run_tool<F>(
        &mut self,
        invocation: &Invocation,
        cancel: &mut Pin<&mut F>,
    ) -> Result<Option<i32>, GeotagError>
    where
        F: Future<Output = ()>,
    {
        info!(
            "Running {} {}",
            invocation.program.display(),
            invocation.args.join(" ")
        );
        let mut child = Command::new(&invocation.program)
            .args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| GeotagError::Spawn {
                program: invocation.program.display().to_string(),
                source,
            })?;

        let (tx, mut rx) = mpsc::unbounded_channel();
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_lines(stdout, tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_lines(stderr, tx.clone()));
        }
        drop(tx);

        let mut cancelled = false;
        loop {
            tokio::select! {
                line = rx.recv() => match line {
                    Some(line) => self.record_output(&line),
                    None => break,
                },
                _ = cancel.as_mut() => {
                    cancelled = true;
                    break;
                }
            }
        }

        let exit = if cancelled {
            None
        } else {
            tokio::select! {
                status = child.wait() => Some(status?),
                _ = cancel.as_mut() => None,
            }
        };

        match exit {
            Some(status) => Ok(Some(status.code().unwrap_or(-1))),
            None => {
                warn!("Killing {}", invocation.program.display());
                let _ = child.kill().await;
                Ok(None)
            }
        }
    }

    fn record_output(&mut self, line: &str) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }
        self.note(line.to_string());
        if self.progress.observe(line) {
            let _ = self
                .events
                .send(AppEvent::GeotagProgress(self.progress.value()));
        }
    }

    fn note(&mut self, line: String) {
        self.log.push_raw(line.clone());
        let _ = self.events.send(AppEvent::GeotagLog(line));
    }

    fn finish(&mut self, status: GeotagStatus) -> GeotagStatus {
        info!("Geotagging finished: {}", status);
        self.status = status.clone();
        let _ = self.events.send(AppEvent::GeotagFinished(status.clone()));
        status
    }
}
