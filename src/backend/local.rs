//! Local process backend
//!
//! Runs each job as a detached process group on this host. Job state lives
//! on disk so that separate invocations (submit now, inspect later) see the
//! same jobs:
//!
//! ```text
//! <state_dir>/<native_id>/job.json     spec, owner, pid, timestamps
//! <state_dir>/<native_id>/exit_code    written by the wrapper on exit
//! <state_dir>/<native_id>/cancelled    written on cancel
//! <state_dir>/<native_id>/stdout       default stdout
//! <state_dir>/<native_id>/stderr       default stderr
//! ```
//!
//! The submitting process reaps the wrapper on a background thread, so a
//! wrapper killed before it writes `exit_code` reads as FAILED rather than
//! lingering as a zombie that still answers `kill(pid, 0)`.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use chrono::{DateTime, Local, NaiveDateTime};
use jobctl_protocol::time::opt_timestamp;
use jobctl_protocol::{AllocatedNode, CurrentInfo, JobSpec, JobState, StatusSnapshot};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use ulid::Ulid;
use walkdir::WalkDir;

use super::{Backend, BackendError, BackendResult};
use crate::identity;
use crate::job::{Job, JobRef};

const RECORD_FILE: &str = "job.json";
const EXIT_CODE_FILE: &str = "exit_code";
const CANCELLED_MARKER: &str = "cancelled";
const DEFAULT_STDOUT: &str = "stdout";
const DEFAULT_STDERR: &str = "stderr";

/// Shell wrapper around the job's executable. Only builtins are used after
/// the job runs, since the environment (and PATH) may have been cleared.
const WRAPPER: &str = r#"[ -n "$JOBCTL_PRE_LAUNCH" ] && . "$JOBCTL_PRE_LAUNCH"
"$@"
code=$?
[ -n "$JOBCTL_POST_LAUNCH" ] && . "$JOBCTL_POST_LAUNCH"
echo "$code" > "$JOBCTL_EXIT_FILE"
"#;

/// Persisted per-job record (`job.json`)
#[derive(Debug, Clone, Serialize, Deserialize)]
struct LocalJobRecord {
    native_id: String,
    spec: JobSpec,
    owner: Option<String>,
    submit_host: Option<String>,
    /// Process group leader, once launched
    pid: Option<u32>,
    #[serde(default, with = "opt_timestamp")]
    submission_time: Option<NaiveDateTime>,
    #[serde(default, with = "opt_timestamp")]
    dispatch_time: Option<NaiveDateTime>,
}

impl LocalJobRecord {
    fn load(job_dir: &Path) -> BackendResult<Self> {
        let json = fs::read_to_string(job_dir.join(RECORD_FILE))?;
        Ok(serde_json::from_str(&json)?)
    }

    /// Write atomically (write-then-rename)
    fn write(&self, job_dir: &Path) -> BackendResult<()> {
        let path = job_dir.join(RECORD_FILE);
        let temp_path = path.with_extension("tmp");
        fs::write(&temp_path, serde_json::to_string_pretty(self)?)?;
        fs::rename(&temp_path, &path)?;
        Ok(())
    }
}

/// Backend that runs jobs as local processes
#[derive(Debug, Clone)]
pub struct LocalBackend {
    state_dir: PathBuf,
}

impl LocalBackend {
    /// Create a backend keeping job state under `state_dir`
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        Self {
            state_dir: state_dir.into(),
        }
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    /// Directory of a job, if the id is well-formed
    fn job_dir(&self, job: &JobRef) -> Option<PathBuf> {
        let id = job.native_id();
        let well_formed = !id.is_empty()
            && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        well_formed.then(|| self.state_dir.join(id))
    }

    /// Load a job record; `None` if the job does not exist.
    fn find(&self, job: &JobRef) -> BackendResult<Option<(LocalJobRecord, PathBuf)>> {
        let Some(job_dir) = self.job_dir(job) else {
            return Ok(None);
        };
        match LocalJobRecord::load(&job_dir) {
            Ok(record) => Ok(Some((record, job_dir))),
            Err(BackendError::Io(e)) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn load_all(&self) -> BackendResult<Vec<StatusSnapshot>> {
        if !self.state_dir.exists() {
            return Ok(Vec::new());
        }

        let mut records = Vec::new();
        for entry in WalkDir::new(&self.state_dir).min_depth(2).max_depth(2) {
            let entry = entry.map_err(|e| BackendError::Query(e.to_string()))?;
            if entry.file_name() != RECORD_FILE {
                continue;
            }
            let Some(job_dir) = entry.path().parent() else {
                continue;
            };
            match LocalJobRecord::load(job_dir) {
                Ok(record) => records.push((record, job_dir.to_path_buf())),
                Err(e) => warn!(path = %entry.path().display(), error = %e, "skipping unreadable job record"),
            }
        }

        records.sort_by(|(a, _), (b, _)| {
            a.submission_time
                .cmp(&b.submission_time)
                .then_with(|| a.native_id.cmp(&b.native_id))
        });

        Ok(records
            .into_iter()
            .map(|(record, job_dir)| snapshot(record, &job_dir))
            .collect())
    }
}

fn new_native_id() -> String {
    format!("local-{}", Ulid::new().to_string().to_lowercase())
}

fn now() -> NaiveDateTime {
    Local::now().naive_local()
}

fn modified_at(path: &Path) -> Option<NaiveDateTime> {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .map(|t| DateTime::<Local>::from(t).naive_local())
}

/// Current state of a job and, when terminal, when it ended.
fn observe(record: &LocalJobRecord, job_dir: &Path) -> (JobState, Option<NaiveDateTime>) {
    let cancelled = job_dir.join(CANCELLED_MARKER);
    if cancelled.exists() {
        return (JobState::Canceled, modified_at(&cancelled));
    }

    let exit_file = job_dir.join(EXIT_CODE_FILE);
    if let Ok(raw) = fs::read_to_string(&exit_file) {
        // an empty file means the wrapper is mid-write
        if let Ok(code) = raw.trim().parse::<i32>() {
            let state = if code == 0 {
                JobState::Completed
            } else {
                JobState::Failed
            };
            return (state, modified_at(&exit_file));
        }
    }

    match record.pid {
        None => (JobState::Queued, None),
        Some(pid) if process_alive(pid) => (JobState::Active, None),
        Some(_) => (JobState::Failed, None),
    }
}

fn snapshot(record: LocalJobRecord, job_dir: &Path) -> StatusSnapshot {
    let (state, finished_at) = observe(&record, job_dir);

    let wall_time = match record.dispatch_time {
        Some(start) => {
            let end = finished_at.unwrap_or_else(now);
            (end - start).num_seconds().max(0)
        }
        None => 0,
    };

    let resourcelist = match (&record.submit_host, state) {
        (Some(host), JobState::Active) => vec![AllocatedNode { name: host.clone() }],
        _ => Vec::new(),
    };

    StatusSnapshot {
        native_id: record.native_id,
        state,
        current_info: CurrentInfo {
            owner: record.owner,
            submit_host: record.submit_host,
            resourcelist,
            cpu_time: None,
            wall_time,
            submission_time: record.submission_time,
            dispatch_time: record.dispatch_time,
        },
        spec: record.spec,
    }
}

/// Spawn the wrapper in its own process group and hand the child to a
/// reaper thread. Returns the leader's pid.
fn launch(spec: &JobSpec, job_dir: &Path) -> io::Result<u32> {
    let workdir = spec.directory.as_deref().map(PathBuf::from);
    let resolve = |path: &str| -> PathBuf {
        let path = PathBuf::from(path);
        match &workdir {
            Some(dir) if path.is_relative() => dir.join(path),
            _ => path,
        }
    };

    let mut command = Command::new("/bin/sh");
    command
        .arg("-c")
        .arg(WRAPPER)
        .arg("jobctl")
        .arg(&spec.executable)
        .args(&spec.arguments);

    if !spec.inherit_environment {
        command.env_clear();
    }
    command
        .envs(&spec.environment)
        .env("JOBCTL_EXIT_FILE", job_dir.join(EXIT_CODE_FILE));

    match &spec.pre_launch {
        Some(script) => command.env("JOBCTL_PRE_LAUNCH", resolve(script)),
        None => command.env_remove("JOBCTL_PRE_LAUNCH"),
    };
    match &spec.post_launch {
        Some(script) => command.env("JOBCTL_POST_LAUNCH", resolve(script)),
        None => command.env_remove("JOBCTL_POST_LAUNCH"),
    };

    if let Some(dir) = &workdir {
        command.current_dir(dir);
    }

    let stdin = match &spec.stdin_path {
        Some(path) => Stdio::from(File::open(resolve(path))?),
        None => Stdio::null(),
    };
    let stdout_path = spec
        .stdout_path
        .as_deref()
        .map(resolve)
        .unwrap_or_else(|| job_dir.join(DEFAULT_STDOUT));
    let stderr_path = spec
        .stderr_path
        .as_deref()
        .map(resolve)
        .unwrap_or_else(|| job_dir.join(DEFAULT_STDERR));

    command
        .stdin(stdin)
        .stdout(Stdio::from(File::create(stdout_path)?))
        .stderr(Stdio::from(File::create(stderr_path)?));

    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        command.process_group(0);
    }

    let mut child = command.spawn()?;
    let pid = child.id();
    std::thread::Builder::new()
        .name(format!("jobctl-reap-{}", pid))
        .spawn(move || {
            if let Err(e) = child.wait() {
                warn!(pid, error = %e, "failed to reap local job wrapper");
            }
        })?;
    Ok(pid)
}

/// Record a launched job's pid. If the record cannot be written the job is
/// torn down, since nothing on disk would ever track it.
fn commit_launch(record: &mut LocalJobRecord, job_dir: &Path, pid: u32) -> BackendResult<()> {
    record.pid = Some(pid);
    record.dispatch_time = Some(now());
    if let Err(e) = record.write(job_dir) {
        if let Err(kill_err) = terminate_group(pid) {
            warn!(pid, error = %kill_err, "failed to stop orphaned local job");
        }
        let _ = fs::remove_dir_all(job_dir);
        return Err(e);
    }
    Ok(())
}

#[cfg(unix)]
fn process_alive(pid: u32) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    match i32::try_from(pid) {
        Ok(raw) => matches!(kill(Pid::from_raw(raw), None), Ok(()) | Err(Errno::EPERM)),
        Err(_) => false,
    }
}

#[cfg(not(unix))]
fn process_alive(_pid: u32) -> bool {
    false
}

#[cfg(unix)]
fn terminate_group(pid: u32) -> BackendResult<()> {
    use nix::errno::Errno;
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let raw = i32::try_from(pid)
        .map_err(|_| BackendError::Rejected(format!("invalid pid {}", pid)))?;
    match killpg(Pid::from_raw(raw), Signal::SIGTERM) {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(e) => Err(BackendError::Rejected(format!(
            "failed to signal process group {}: {}",
            pid, e
        ))),
    }
}

#[cfg(not(unix))]
fn terminate_group(pid: u32) -> BackendResult<()> {
    Err(BackendError::Rejected(format!(
        "cannot signal process {} on this platform",
        pid
    )))
}

impl Backend for LocalBackend {
    fn submit(&self, job: &mut Job) -> BackendResult<()> {
        let spec = job.spec();
        if spec.executable.trim().is_empty() {
            return Err(BackendError::Dispatch("executable is empty".to_string()));
        }

        let native_id = new_native_id();
        let job_dir = self.state_dir.join(&native_id);
        fs::create_dir_all(&job_dir)?;

        let mut record = LocalJobRecord {
            native_id: native_id.clone(),
            spec: spec.clone(),
            owner: identity::current_user(),
            submit_host: identity::hostname(),
            pid: None,
            submission_time: Some(now()),
            dispatch_time: None,
        };
        record.write(&job_dir)?;

        let pid = match launch(spec, &job_dir) {
            Ok(pid) => pid,
            Err(e) => {
                let _ = fs::remove_dir_all(&job_dir);
                return Err(BackendError::Dispatch(format!(
                    "failed to launch '{}': {}",
                    spec.executable, e
                )));
            }
        };

        commit_launch(&mut record, &job_dir, pid)?;

        info!(native_id = %native_id, pid, "launched local job");
        job.set_native_id(native_id);
        Ok(())
    }

    fn query_by_id(&self, job: &JobRef) -> BackendResult<Vec<StatusSnapshot>> {
        Ok(self
            .find(job)?
            .map(|(record, job_dir)| snapshot(record, &job_dir))
            .into_iter()
            .collect())
    }

    fn query_by_owner(&self, owner: &str) -> BackendResult<Vec<StatusSnapshot>> {
        let mut jobs = self.load_all()?;
        jobs.retain(|j| j.current_info.owner.as_deref() == Some(owner));
        Ok(jobs)
    }

    fn query_all(&self) -> BackendResult<Vec<StatusSnapshot>> {
        self.load_all()
    }

    fn cancel(&self, job: &JobRef) -> BackendResult<()> {
        let (record, job_dir) = self.find(job)?.ok_or_else(|| BackendError::not_found(job))?;

        let (state, _) = observe(&record, &job_dir);
        if state.is_terminal() {
            debug!(native_id = %job, state = %state, "job already terminal, nothing to cancel");
            return Ok(());
        }

        let marker = job_dir.join(CANCELLED_MARKER);
        fs::write(&marker, b"")?;

        if let Some(pid) = record.pid {
            if let Err(e) = terminate_group(pid) {
                let _ = fs::remove_file(&marker);
                return Err(e);
            }
        }

        info!(native_id = %job, "cancelled local job");
        Ok(())
    }
}
