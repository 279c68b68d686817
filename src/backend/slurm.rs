//! Slurm backend
//!
//! Drives `sbatch`, `squeue` and `scancel`. Commands go through a
//! [`CommandRunner`] so tests can script scheduler responses, and may be
//! wrapped in `ssh` when jobs are submitted from a separate login host.

use std::collections::BTreeMap;
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::{Command, Stdio};

use jobctl_protocol::time::{parse_clock, parse_timestamp};
use jobctl_protocol::{AllocatedNode, CurrentInfo, JobSpec, JobState, StatusSnapshot};
use regex_lite::Regex;
use serde_json::Value;
use tracing::{debug, info};

use super::{Backend, BackendError, BackendResult};
use crate::job::{Job, JobRef};

/// Field separator in `squeue` output (ASCII unit separator)
const FIELD_SEPARATOR: &str = "\x1F";

/// `squeue --format` fields, in the order [`parse_squeue_line`] reads them
const SQUEUE_FIELDS: [&str; 16] = [
    "%A", // job id
    "%T", // state, long form
    "%u", // user
    "%a", // account
    "%P", // partition
    "%D", // node count
    "%C", // cpu count
    "%M", // elapsed
    "%l", // time limit
    "%V", // submit time
    "%S", // start time
    "%N", // node list
    "%Z", // working directory
    "%v", // reservation
    "%o", // command
    "%j", // job name
];

/// Scheduler message for ids it has never heard of (or has forgotten)
const INVALID_JOB_ID: &str = "Invalid job id specified";

/// A command to run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub stdin: Option<String>,
}

impl Invocation {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    /// Program and arguments joined for messages
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Captured result of a finished command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code; `None` when killed by a signal
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            status: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failure(status: i32, stderr: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == Some(0)
    }
}

/// Runs scheduler commands
pub trait CommandRunner: Send + Sync {
    /// Run to completion and capture output. An `Err` means the command
    /// could not be started at all.
    fn run(&self, invocation: &Invocation) -> io::Result<CommandOutput>;
}

/// Runs commands as child processes
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, invocation: &Invocation) -> io::Result<CommandOutput> {
        let mut child = Command::new(&invocation.program)
            .args(&invocation.args)
            .envs(&invocation.env)
            .stdin(if invocation.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        if let (Some(input), Some(mut stdin)) = (&invocation.stdin, child.stdin.take()) {
            stdin.write_all(input.as_bytes())?;
        }

        let output = child.wait_with_output()?;
        Ok(CommandOutput {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// How to reach the scheduler
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlurmConfig {
    /// Directory holding the slurm binaries; `PATH` lookup when unset
    pub bin: Option<PathBuf>,
    /// Per-command binary paths, e.g. `sbatch = "/opt/wrap/sbatch"`
    pub bin_overrides: BTreeMap<String, String>,
    /// Login host to run commands on via ssh
    pub submit_host: Option<String>,
    pub strict_host_checking: bool,
    /// Cluster passed as `-M`
    pub cluster: Option<String>,
}

impl Default for SlurmConfig {
    fn default() -> Self {
        Self {
            bin: None,
            bin_overrides: BTreeMap::new(),
            submit_host: None,
            strict_host_checking: true,
            cluster: None,
        }
    }
}

impl SlurmConfig {
    /// Path of a scheduler command after `bin` and overrides
    pub fn command_path(&self, command: &str) -> String {
        if let Some(path) = self.bin_overrides.get(command) {
            return path.clone();
        }
        match &self.bin {
            Some(dir) => dir.join(command).to_string_lossy().into_owned(),
            None => command.to_string(),
        }
    }

    /// Build the invocation for a scheduler command, wrapped in ssh when a
    /// submit host is configured. Environment variables travel through
    /// `env` on the remote side.
    pub fn invocation(
        &self,
        command: &str,
        args: Vec<String>,
        env: BTreeMap<String, String>,
    ) -> Invocation {
        let mut args = args;
        if let Some(cluster) = self.cluster.as_deref().filter(|c| !c.is_empty()) {
            args.push("-M".to_string());
            args.push(cluster.to_string());
        }
        let program = self.command_path(command);

        let Some(host) = self.submit_host.as_deref().filter(|h| !h.is_empty()) else {
            return Invocation {
                program,
                args,
                env,
                stdin: None,
            };
        };

        let mut ssh = Invocation::new("ssh").args(["-o", "BatchMode=yes"]);
        if !self.strict_host_checking {
            ssh = ssh.args([
                "-o",
                "UserKnownHostsFile=/dev/null",
                "-o",
                "StrictHostKeyChecking=no",
            ]);
        }
        ssh = ssh.arg(host);
        if !env.is_empty() {
            ssh = ssh
                .arg("env")
                .args(env.iter().map(|(k, v)| format!("{}={}", k, v)));
        }
        ssh.arg(program).args(args)
    }
}

/// Backend that talks to Slurm
pub struct SlurmBackend {
    name: String,
    config: SlurmConfig,
    runner: Box<dyn CommandRunner>,
}

impl SlurmBackend {
    /// Backend named `name` that runs real commands
    pub fn new(name: impl Into<String>, config: SlurmConfig) -> Self {
        Self::with_runner(name, config, Box::new(SystemRunner))
    }

    pub fn with_runner(
        name: impl Into<String>,
        config: SlurmConfig,
        runner: Box<dyn CommandRunner>,
    ) -> Self {
        Self {
            name: name.into(),
            config,
            runner,
        }
    }

    pub fn config(&self) -> &SlurmConfig {
        &self.config
    }

    fn run(&self, invocation: Invocation) -> BackendResult<CommandOutput> {
        debug!(command = %invocation.display(), "running scheduler command");
        let output = self.runner.run(&invocation).map_err(|e| {
            BackendError::Dispatch(format!("failed to run `{}`: {}", invocation.program, e))
        })?;
        if output.is_success() {
            Ok(output)
        } else {
            Err(BackendError::CommandFailed {
                command: invocation.display(),
                status: output.status,
                stderr: output.stderr.trim().to_string(),
            })
        }
    }

    fn squeue(&self, selector: Vec<String>) -> BackendResult<Vec<StatusSnapshot>> {
        let format = SQUEUE_FIELDS.join(FIELD_SEPARATOR);
        let mut args = vec![
            "--all".to_string(),
            "--noheader".to_string(),
            "--states=all".to_string(),
            format!("--format={}", format),
        ];
        args.extend(selector);

        let output = self.run(self.config.invocation("squeue", args, BTreeMap::new()))?;
        let jobs = output
            .stdout
            .lines()
            .filter(|line| !line.trim().is_empty() && !line.starts_with("CLUSTER:"))
            .filter_map(|line| parse_squeue_line(line, self.config.submit_host.as_deref()))
            .collect();
        Ok(jobs)
    }
}

impl Backend for SlurmBackend {
    fn submit(&self, job: &mut Job) -> BackendResult<()> {
        let spec = job.spec();
        if spec.executable.trim().is_empty() {
            return Err(BackendError::Dispatch("executable is empty".to_string()));
        }

        let script = render_batch_script(spec, &self.name);
        let export = if spec.inherit_environment { "ALL" } else { "NONE" };
        let mut env = BTreeMap::new();
        env.insert("SBATCH_EXPORT".to_string(), export.to_string());

        let invocation = self
            .config
            .invocation("sbatch", vec!["--parsable".to_string()], env)
            .stdin(script);

        let output = self.run(invocation).map_err(|e| match e {
            BackendError::CommandFailed { stderr, .. } => BackendError::Dispatch(stderr),
            other => other,
        })?;

        let native_id = parse_sbatch_id(&output.stdout).ok_or_else(|| {
            BackendError::Dispatch(format!(
                "could not read a job id from sbatch output: {:?}",
                output.stdout.trim()
            ))
        })?;

        info!(backend = %self.name, native_id = %native_id, "submitted slurm job");
        job.set_native_id(native_id);
        Ok(())
    }

    fn query_by_id(&self, job: &JobRef) -> BackendResult<Vec<StatusSnapshot>> {
        match self.squeue(vec!["-j".to_string(), job.native_id().to_string()]) {
            Err(BackendError::CommandFailed { stderr, .. }) if stderr.contains(INVALID_JOB_ID) => {
                Ok(Vec::new())
            }
            Err(e) => Err(into_query_error(e)),
            Ok(mut jobs) => {
                // array and het jobs can report sibling rows
                jobs.retain(|j| j.native_id == job.native_id());
                Ok(jobs)
            }
        }
    }

    fn query_by_owner(&self, owner: &str) -> BackendResult<Vec<StatusSnapshot>> {
        self.squeue(vec!["-u".to_string(), owner.to_string()])
            .map_err(into_query_error)
    }

    fn query_all(&self) -> BackendResult<Vec<StatusSnapshot>> {
        self.squeue(Vec::new()).map_err(into_query_error)
    }

    fn cancel(&self, job: &JobRef) -> BackendResult<()> {
        let invocation =
            self.config
                .invocation("scancel", vec![job.native_id().to_string()], BTreeMap::new());
        match self.run(invocation) {
            Ok(_) => {
                info!(backend = %self.name, native_id = %job, "cancelled slurm job");
                Ok(())
            }
            Err(BackendError::CommandFailed { stderr, .. }) if stderr.contains(INVALID_JOB_ID) => {
                Err(BackendError::not_found(job))
            }
            Err(BackendError::CommandFailed { stderr, .. }) => Err(BackendError::Rejected(stderr)),
            Err(e) => Err(e),
        }
    }
}

fn into_query_error(err: BackendError) -> BackendError {
    match err {
        BackendError::CommandFailed { command, stderr, .. } => {
            BackendError::Query(format!("{}: {}", command, stderr))
        }
        other => other,
    }
}

/// The job id from `sbatch --parsable` output (`<id>` or `<id>;<cluster>`)
fn parse_sbatch_id(stdout: &str) -> Option<String> {
    let re = Regex::new(r"^\d+(_\d+)?$").unwrap();
    let line = stdout.lines().map(str::trim).find(|l| !l.is_empty())?;
    let id = line.split(';').next()?.trim();
    re.is_match(id).then(|| id.to_string())
}

/// Single-quote a value for sh
pub(crate) fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Format seconds as `[D-]HH:MM:SS`
fn format_clock(total: u64) -> String {
    let days = total / 86_400;
    let hours = (total % 86_400) / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;
    if days > 0 {
        format!("{}-{:02}:{:02}:{:02}", days, hours, minutes, seconds)
    } else {
        format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
    }
}

fn attribute_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// `sbatch` options carried in custom attributes. Keys under this backend's
/// namespace have the prefix stripped; keys in another namespace are left
/// for their own backend.
fn custom_directives(spec: &JobSpec, backend_name: &str) -> Vec<String> {
    let Some(custom) = &spec.attributes.custom_attributes else {
        return Vec::new();
    };
    let prefix = format!("{}.", backend_name);

    custom
        .iter()
        .filter_map(|(key, value)| {
            let option = match key.strip_prefix(&prefix) {
                Some(option) => option,
                None if !key.contains('.') => key.as_str(),
                None => {
                    debug!(key = %key, "ignoring custom attribute for another backend");
                    return None;
                }
            };
            let option = option.trim_start_matches('-');
            if option.is_empty() {
                return None;
            }
            let value = attribute_value(value);
            Some(match (option.len(), value.is_empty()) {
                (1, true) => format!("-{}", option),
                (1, false) => format!("-{} {}", option, value),
                (_, true) => format!("--{}", option),
                (_, false) => format!("--{}={}", option, value),
            })
        })
        .collect()
}

/// Render the batch script piped to `sbatch`
pub(crate) fn render_batch_script(spec: &JobSpec, backend_name: &str) -> String {
    let mut directives = Vec::new();
    let attrs = &spec.attributes;
    let resources = &spec.resources;

    if let Some(name) = &spec.name {
        directives.push(format!("--job-name={}", name));
    }
    if let Some(dir) = &spec.directory {
        directives.push(format!("--chdir={}", dir));
    }
    if let Some(path) = &spec.stdin_path {
        directives.push(format!("--input={}", path));
    }
    if let Some(path) = &spec.stdout_path {
        directives.push(format!("--output={}", path));
    }
    if let Some(path) = &spec.stderr_path {
        directives.push(format!("--error={}", path));
    }

    // Slurm counts time limits in whole minutes
    let minutes = attrs.duration.as_secs().div_ceil(60).max(1);
    directives.push(format!("--time={}", format_clock(minutes * 60)));

    if let Some(queue) = &attrs.queue_name {
        directives.push(format!("--partition={}", queue));
    }
    if let Some(account) = attrs.account.as_ref().or(attrs.project_name.as_ref()) {
        directives.push(format!("--account={}", account));
    }
    if let Some(reservation) = &attrs.reservation_id {
        directives.push(format!("--reservation={}", reservation));
    }

    if let Some(n) = resources.node_count {
        directives.push(format!("--nodes={}", n));
    }
    if let Some(n) = resources.process_count {
        directives.push(format!("--ntasks={}", n));
    }
    if let Some(n) = resources.processes_per_node {
        directives.push(format!("--ntasks-per-node={}", n));
    }
    if let Some(n) = resources.cpu_cores_per_process {
        directives.push(format!("--cpus-per-task={}", n));
    }
    if let Some(n) = resources.gpu_cores_per_process {
        directives.push(format!("--gpus-per-task={}", n));
    }
    if resources.exclusive_node_use {
        directives.push("--exclusive".to_string());
    }

    directives.extend(custom_directives(spec, backend_name));

    let mut script = String::from("#!/bin/bash\n");
    for directive in &directives {
        script.push_str("#SBATCH ");
        script.push_str(directive);
        script.push('\n');
    }
    script.push('\n');

    let mut environment: Vec<_> = spec.environment.iter().collect();
    environment.sort();
    for (key, value) in environment {
        script.push_str(&format!("export {}={}\n", key, shell_quote(value)));
    }

    if let Some(pre) = &spec.pre_launch {
        script.push_str(&format!(". {}\n", shell_quote(pre)));
    }

    let mut command: Vec<String> = Vec::new();
    if let Some(launcher) = spec.launcher.as_deref().filter(|l| !l.is_empty() && *l != "single") {
        command.push(launcher.to_string());
    }
    command.push(shell_quote(&spec.executable));
    command.extend(spec.arguments.iter().map(|a| shell_quote(a)));
    script.push_str(&command.join(" "));
    script.push('\n');

    if let Some(post) = &spec.post_launch {
        script.push_str("code=$?\n");
        script.push_str(&format!(". {}\n", shell_quote(post)));
        script.push_str("exit $code\n");
    }

    script
}

/// Map a long-form Slurm state to a job state
pub(crate) fn map_state(state: &str) -> JobState {
    // states may carry a suffix such as "CANCELLED by 1000"
    let state = state.split_whitespace().next().unwrap_or("");
    match state {
        "PENDING" | "CONFIGURING" => JobState::Queued,
        "RUNNING" | "COMPLETING" | "SUSPENDED" | "STOPPED" => JobState::Active,
        "COMPLETED" => JobState::Completed,
        "CANCELLED" => JobState::Canceled,
        "REQUEUE_HOLD" | "RESV_DEL_HOLD" | "SPECIAL_EXIT" => JobState::Held,
        _ => JobState::Failed,
    }
}

/// Expand a Slurm hostlist such as `c[001-003,7],gpu1`
pub(crate) fn parse_nodes(node_list: &str) -> Vec<AllocatedNode> {
    let re = Regex::new(r"^(?P<prefix>[^\[]+)(\[(?P<range>[^\]]+)\])?$").unwrap();
    let mut nodes = Vec::new();

    for group in split_hostlist(node_list) {
        let Some(caps) = re.captures(group) else {
            continue;
        };
        let prefix = &caps["prefix"];
        match caps.name("range") {
            None => nodes.push(AllocatedNode {
                name: prefix.to_string(),
            }),
            Some(range) => {
                for part in range.as_str().split(',') {
                    for suffix in expand_range(part) {
                        nodes.push(AllocatedNode {
                            name: format!("{}{}", prefix, suffix),
                        });
                    }
                }
            }
        }
    }
    nodes
}

/// Split on commas that are not inside brackets
fn split_hostlist(list: &str) -> Vec<&str> {
    let mut groups = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (idx, ch) in list.char_indices() {
        match ch {
            '[' => depth += 1,
            ']' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                groups.push(&list[start..idx]);
                start = idx + 1;
            }
            _ => {}
        }
    }
    groups.push(&list[start..]);
    groups
        .into_iter()
        .map(str::trim)
        .filter(|g| !g.is_empty() && *g != "(null)")
        .collect()
}

/// `001-003` → `001 002 003`; a single value passes through.
fn expand_range(part: &str) -> Vec<String> {
    let Some((lo, hi)) = part.split_once('-') else {
        return vec![part.to_string()];
    };
    let (Ok(start), Ok(end)) = (lo.parse::<u64>(), hi.parse::<u64>()) else {
        return vec![part.to_string()];
    };
    let width = lo.len();
    (start..=end)
        .map(|n| format!("{:0width$}", n, width = width))
        .collect()
}

fn optional(field: &str) -> Option<String> {
    let field = field.trim();
    match field {
        "" | "N/A" | "(null)" | "Unknown" | "None" => None,
        other => Some(other.to_string()),
    }
}

fn optional_count(field: &str) -> Option<u32> {
    optional(field).and_then(|f| f.parse().ok())
}

/// Parse one line of `squeue` output
pub(crate) fn parse_squeue_line(line: &str, submit_host: Option<&str>) -> Option<StatusSnapshot> {
    let fields: Vec<&str> = line.splitn(SQUEUE_FIELDS.len(), FIELD_SEPARATOR).collect();
    let [id, state, user, account, partition, node_count, cpus, elapsed, limit, submitted, started, node_list, workdir, reservation, command, name] =
        fields.as_slice()
    else {
        debug!(line = %line, "skipping malformed squeue line");
        return None;
    };

    let state = map_state(state);

    let mut spec = JobSpec::new(optional(command).unwrap_or_default());
    spec.name = optional(name);
    spec.directory = optional(workdir);
    spec.attributes.queue_name = optional(partition);
    spec.attributes.account = optional(account);
    spec.attributes.reservation_id = optional(reservation);
    if let Some(seconds) = optional(limit).as_deref().and_then(parse_clock) {
        spec.attributes.duration = std::time::Duration::from_secs(seconds);
    }
    spec.resources.node_count = optional_count(node_count);
    spec.resources.process_count = optional_count(cpus);

    let waiting = matches!(state, JobState::Queued | JobState::Held);
    let dispatch_time = if waiting {
        None
    } else {
        optional(started).and_then(|s| parse_timestamp(&s).ok())
    };

    let current_info = CurrentInfo {
        owner: optional(user),
        submit_host: submit_host.map(str::to_string),
        resourcelist: parse_nodes(node_list),
        cpu_time: None,
        wall_time: optional(elapsed)
            .as_deref()
            .and_then(parse_clock)
            .and_then(|s| i64::try_from(s).ok())
            .unwrap_or(0),
        submission_time: optional(submitted).and_then(|s| parse_timestamp(&s).ok()),
        dispatch_time,
    };

    Some(StatusSnapshot {
        native_id: id.trim().to_string(),
        state,
        current_info,
        spec,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use serde_json::json;

    /// Replays canned outputs and records every invocation
    #[derive(Clone, Default)]
    struct ScriptedRunner {
        responses: Arc<Mutex<Vec<CommandOutput>>>,
        calls: Arc<Mutex<Vec<Invocation>>>,
    }

    impl ScriptedRunner {
        fn new(responses: Vec<CommandOutput>) -> Self {
            Self {
                responses: Arc::new(Mutex::new(responses)),
                calls: Arc::default(),
            }
        }

        fn calls(&self) -> Vec<Invocation> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl CommandRunner for ScriptedRunner {
        fn run(&self, invocation: &Invocation) -> io::Result<CommandOutput> {
            self.calls.lock().unwrap().push(invocation.clone());
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                return Err(io::Error::new(io::ErrorKind::NotFound, "no scripted response"));
            }
            Ok(responses.remove(0))
        }
    }

    fn backend(responses: Vec<CommandOutput>) -> (SlurmBackend, ScriptedRunner) {
        let runner = ScriptedRunner::new(responses);
        let backend =
            SlurmBackend::with_runner("slurm", SlurmConfig::default(), Box::new(runner.clone()));
        (backend, runner)
    }

    fn squeue_line(fields: [&str; 16]) -> String {
        fields.join(FIELD_SEPARATOR)
    }

    fn running_line() -> String {
        squeue_line([
            "123",
            "RUNNING",
            "alice",
            "proj1",
            "batch",
            "2",
            "8",
            "1:02:03",
            "2:00:00",
            "2024-01-15T10:30:00",
            "2024-01-15T10:35:00",
            "c[001-002]",
            "/home/alice",
            "(null)",
            "/home/alice/run.sh",
            "sim",
        ])
    }

    #[test]
    fn test_submit_pipes_script_to_sbatch() {
        let (backend, runner) = backend(vec![CommandOutput::success("4242;cluster1\n")]);
        let mut spec = JobSpec::new("/home/u1/run.sh");
        spec.name = Some("sim".into());
        spec.attributes.queue_name = Some("debug".into());
        let mut job = Job::new(spec);

        backend.submit(&mut job).unwrap();
        assert_eq!(job.native_id(), Some("4242"));

        let calls = runner.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].program, "sbatch");
        assert_eq!(calls[0].args, vec!["--parsable"]);
        assert_eq!(calls[0].env["SBATCH_EXPORT"], "ALL");
        let script = calls[0].stdin.as_deref().unwrap();
        assert!(script.contains("#SBATCH --job-name=sim\n"));
        assert!(script.contains("#SBATCH --partition=debug\n"));
        assert!(script.contains("#SBATCH --time=00:10:00\n"));
        assert!(script.contains("'/home/u1/run.sh'\n"));
    }

    #[test]
    fn test_submit_without_inherited_environment() {
        let (backend, runner) = backend(vec![CommandOutput::success("7\n")]);
        let mut spec = JobSpec::new("/bin/true");
        spec.inherit_environment = false;

        backend.submit(&mut Job::new(spec)).unwrap();
        assert_eq!(runner.calls()[0].env["SBATCH_EXPORT"], "NONE");
    }

    #[test]
    fn test_submit_failure_is_dispatch_error() {
        let (backend, _) = backend(vec![CommandOutput::failure(
            1,
            "sbatch: error: invalid partition specified\n",
        )]);
        let mut job = Job::new(JobSpec::new("/bin/true"));

        let err = backend.submit(&mut job).unwrap_err();
        assert!(matches!(err, BackendError::Dispatch(ref m) if m.contains("invalid partition")));
        assert!(job.native_id().is_none());
    }

    #[test]
    fn test_submit_unparseable_output() {
        let (backend, _) = backend(vec![CommandOutput::success("Submitted batch job\n")]);
        let err = backend.submit(&mut Job::new(JobSpec::new("/bin/true"))).unwrap_err();
        assert!(matches!(err, BackendError::Dispatch(_)));
    }

    #[test]
    fn test_script_directives() {
        let mut spec = JobSpec::new("/bin/echo");
        spec.arguments = vec!["it's".into()];
        spec.directory = Some("/scratch".into());
        spec.stdout_path = Some("out.txt".into());
        spec.attributes.duration = std::time::Duration::from_secs(90_061);
        spec.attributes.account = Some("acct".into());
        spec.resources.node_count = Some(2);
        spec.resources.process_count = Some(16);
        spec.resources.exclusive_node_use = true;
        spec.environment.insert("FOO".into(), "bar baz".into());

        let script = render_batch_script(&spec, "slurm");
        assert!(script.starts_with("#!/bin/bash\n"));
        assert!(script.contains("#SBATCH --chdir=/scratch\n"));
        assert!(script.contains("#SBATCH --output=out.txt\n"));
        // 25h 1m 1s rounds up to the next minute
        assert!(script.contains("#SBATCH --time=1-01:02:00\n"));
        assert!(script.contains("#SBATCH --account=acct\n"));
        assert!(script.contains("#SBATCH --nodes=2\n"));
        assert!(script.contains("#SBATCH --ntasks=16\n"));
        assert!(script.contains("#SBATCH --exclusive\n"));
        assert!(script.contains("export FOO='bar baz'\n"));
        assert!(script.contains(r"'/bin/echo' 'it'\''s'"));
    }

    #[test]
    fn test_script_custom_attributes() {
        let mut spec = JobSpec::new("/bin/true");
        let mut custom = jobctl_protocol::CustomAttributes::new();
        custom.insert("slurm.mem".into(), json!("4G"));
        custom.insert("slurm.requeue".into(), json!(""));
        custom.insert("slurm.C".into(), json!("haswell"));
        custom.insert("pbs.l".into(), json!("walltime=1:00:00"));
        custom.insert("gres".into(), json!("gpu:2"));
        spec.attributes.custom_attributes = Some(custom);

        let script = render_batch_script(&spec, "slurm");
        assert!(script.contains("#SBATCH --mem=4G\n"));
        assert!(script.contains("#SBATCH --requeue\n"));
        assert!(script.contains("#SBATCH -C haswell\n"));
        assert!(script.contains("#SBATCH --gres=gpu:2\n"));
        assert!(!script.contains("walltime"));
    }

    #[test]
    fn test_script_launch_hooks() {
        let mut spec = JobSpec::new("/bin/app");
        spec.pre_launch = Some("/etc/pre.sh".into());
        spec.post_launch = Some("/etc/post.sh".into());
        spec.launcher = Some("srun".into());

        let script = render_batch_script(&spec, "slurm");
        let pre = script.find(". '/etc/pre.sh'").unwrap();
        let run = script.find("srun '/bin/app'").unwrap();
        let post = script.find(". '/etc/post.sh'").unwrap();
        assert!(pre < run && run < post);
        assert!(script.ends_with("exit $code\n"));
    }

    #[test]
    fn test_query_by_id_parses_squeue() {
        let (backend, runner) = backend(vec![CommandOutput::success(format!("{}\n", running_line()))]);

        let jobs = backend.query_by_id(&JobRef::new("123")).unwrap();
        assert_eq!(jobs.len(), 1);

        let job = &jobs[0];
        assert_eq!(job.native_id, "123");
        assert_eq!(job.state, JobState::Active);
        assert_eq!(job.current_info.owner.as_deref(), Some("alice"));
        assert_eq!(job.current_info.wall_time, 3723);
        assert_eq!(job.current_info.resourcelist.len(), 2);
        assert_eq!(job.current_info.resourcelist[0].name, "c001");
        assert!(job.current_info.dispatch_time.is_some());
        assert_eq!(job.spec.name.as_deref(), Some("sim"));
        assert_eq!(job.spec.attributes.queue_name.as_deref(), Some("batch"));
        assert_eq!(job.spec.attributes.duration.as_secs(), 7200);
        assert_eq!(job.spec.attributes.reservation_id, None);
        assert_eq!(job.spec.resources.node_count, Some(2));

        let args = &runner.calls()[0].args;
        assert!(args.contains(&"-j".to_string()));
        assert!(args.contains(&"123".to_string()));
        assert!(args.contains(&"--states=all".to_string()));
    }

    #[test]
    fn test_query_unknown_id_is_empty() {
        let (backend, _) = backend(vec![CommandOutput::failure(
            1,
            "slurm_load_jobs error: Invalid job id specified\n",
        )]);
        assert!(backend.query_by_id(&JobRef::new("999")).unwrap().is_empty());
    }

    #[test]
    fn test_query_failure_is_query_error() {
        let (backend, _) = backend(vec![CommandOutput::failure(1, "slurm_load_jobs error: timeout\n")]);
        assert!(matches!(backend.query_all(), Err(BackendError::Query(_))));
    }

    #[test]
    fn test_query_by_owner_skips_cluster_headers() {
        let output = format!("CLUSTER: c1\n{}\n\n", running_line());
        let (backend, runner) = backend(vec![CommandOutput::success(output)]);

        let jobs = backend.query_by_owner("alice").unwrap();
        assert_eq!(jobs.len(), 1);
        let args = &runner.calls()[0].args;
        assert!(args.windows(2).any(|w| w == ["-u", "alice"]));
    }

    #[test]
    fn test_pending_job_has_no_dispatch_time() {
        let line = squeue_line([
            "9", "PENDING", "bob", "", "batch", "1", "1", "0:00", "10:00",
            "2024-01-15T10:30:00", "2024-01-16T00:00:00", "", "/tmp", "", "/bin/x", "x",
        ]);
        let job = parse_squeue_line(&line, None).unwrap();
        assert_eq!(job.state, JobState::Queued);
        assert!(job.current_info.dispatch_time.is_none());
        assert!(job.current_info.submission_time.is_some());
        assert!(job.current_info.resourcelist.is_empty());
        assert_eq!(job.spec.attributes.account, None);
    }

    #[test]
    fn test_malformed_squeue_line_is_skipped() {
        assert!(parse_squeue_line("123\x1FRUNNING", None).is_none());
    }

    #[test]
    fn test_cancel() {
        let (backend, runner) = backend(vec![CommandOutput::success("")]);
        backend.cancel(&JobRef::new("55")).unwrap();
        let call = &runner.calls()[0];
        assert_eq!(call.program, "scancel");
        assert_eq!(call.args, vec!["55"]);
    }

    #[test]
    fn test_cancel_unknown_job() {
        let (backend, _) = backend(vec![CommandOutput::failure(
            1,
            "scancel: error: Kill job error on job id 55: Invalid job id specified\n",
        )]);
        assert!(backend.cancel(&JobRef::new("55")).unwrap_err().is_not_found());
    }

    #[test]
    fn test_cancel_other_failure_is_rejected() {
        let (backend, _) = backend(vec![CommandOutput::failure(1, "Access/permission denied\n")]);
        let err = backend.cancel(&JobRef::new("55")).unwrap_err();
        assert!(matches!(err, BackendError::Rejected(ref m) if m.contains("permission")));
    }

    #[test]
    fn test_state_mapping() {
        assert_eq!(map_state("PENDING"), JobState::Queued);
        assert_eq!(map_state("CONFIGURING"), JobState::Queued);
        assert_eq!(map_state("COMPLETING"), JobState::Active);
        assert_eq!(map_state("SUSPENDED"), JobState::Active);
        assert_eq!(map_state("COMPLETED"), JobState::Completed);
        assert_eq!(map_state("CANCELLED by 1000"), JobState::Canceled);
        assert_eq!(map_state("REQUEUE_HOLD"), JobState::Held);
        assert_eq!(map_state("TIMEOUT"), JobState::Failed);
        assert_eq!(map_state("NODE_FAIL"), JobState::Failed);
    }

    #[test]
    fn test_parse_nodes() {
        let names = |list: &str| -> Vec<String> { parse_nodes(list).into_iter().map(|n| n.name).collect() };
        assert_eq!(names("c[001-003,5]"), vec!["c001", "c002", "c003", "c5"]);
        assert_eq!(names("gpu1"), vec!["gpu1"]);
        assert_eq!(names("a[8-10],b2"), vec!["a8", "a9", "a10", "b2"]);
        assert!(names("").is_empty());
        assert!(names("(null)").is_empty());
    }

    #[test]
    fn test_ssh_wrapping_and_cluster() {
        let config = SlurmConfig {
            bin: Some(PathBuf::from("/opt/slurm/bin")),
            bin_overrides: BTreeMap::from([("scancel".to_string(), "/usr/local/bin/scancel".to_string())]),
            submit_host: Some("login01".into()),
            strict_host_checking: false,
            cluster: Some("c1".into()),
        };

        let mut env = BTreeMap::new();
        env.insert("SBATCH_EXPORT".to_string(), "NONE".to_string());
        let sbatch = config.invocation("sbatch", vec!["--parsable".into()], env);
        assert_eq!(sbatch.program, "ssh");
        assert_eq!(
            sbatch.args,
            vec![
                "-o",
                "BatchMode=yes",
                "-o",
                "UserKnownHostsFile=/dev/null",
                "-o",
                "StrictHostKeyChecking=no",
                "login01",
                "env",
                "SBATCH_EXPORT=NONE",
                "/opt/slurm/bin/sbatch",
                "--parsable",
                "-M",
                "c1",
            ]
        );

        assert_eq!(config.command_path("scancel"), "/usr/local/bin/scancel");
    }

    #[test]
    fn test_strict_ssh_keeps_host_checking() {
        let config = SlurmConfig {
            submit_host: Some("login01".into()),
            ..SlurmConfig::default()
        };
        let invocation = config.invocation("squeue", vec![], BTreeMap::new());
        assert_eq!(invocation.args, vec!["-o", "BatchMode=yes", "login01", "squeue"]);
    }

    #[test]
    fn test_format_clock() {
        assert_eq!(format_clock(600), "00:10:00");
        assert_eq!(format_clock(86_400 + 3661), "1-01:01:01");
    }
}
