//! SSH executor
//!
//! Drives the system `ssh`/`scp` clients, wrapped in `sshpass -e` for
//! password credentials so the password never appears on a command line.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use secrecy::ExposeSecret;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::errors::DeployError;
use crate::installer::adapter::{InstallProcedureInvocation, PayloadSource};
use crate::inventory::device::Credential;
use crate::remote::executor::{ExecutionResult, RemoteExecutor, RemoteTarget, ERROR_TAIL_CHARS};
use crate::remote::log::{AttemptLog, LogHeader, LogWriter, Stream};
use crate::remote::probe::{parse_probe_output, ProbeOutcome, PROBE_COMMAND};
use crate::utils::{format_duration, sha256_hash, tail_chars};

/// Options common to every ssh/scp invocation
const SSH_OPTIONS: &[&str] = &[
    "-o",
    "StrictHostKeyChecking=no",
    "-o",
    "UserKnownHostsFile=/dev/null",
    "-o",
    "ServerAliveInterval=30",
    "-o",
    "ServerAliveCountMax=3",
    "-o",
    "LogLevel=ERROR",
];

/// Exit status `ssh` reserves for its own errors
const SSH_ERROR_EXIT: i32 = 255;

/// `sshpass` exit statuses for a rejected password and an unknown host key
const SSHPASS_AUTH_EXITS: [i32; 2] = [5, 6];

/// Lines of each stream kept for the execution result
const TAIL_LINES: usize = 20;

/// Limit for copying the payload
const COPY_TIMEOUT: Duration = Duration::from_secs(60);

/// Limit for removing the payload afterwards
const CLEANUP_TIMEOUT: Duration = Duration::from_secs(10);

/// SSH executor options
#[derive(Debug, Clone)]
pub struct SshOptions {
    /// `ConnectTimeout` handed to ssh
    pub connect_timeout: Duration,

    pub ssh_program: String,
    pub scp_program: String,
    pub sshpass_program: String,
}

impl Default for SshOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            ssh_program: "ssh".to_string(),
            scp_program: "scp".to_string(),
            sshpass_program: "sshpass".to_string(),
        }
    }
}

/// Remote executor backed by the OpenSSH client
#[derive(Debug, Clone, Default)]
pub struct SshExecutor {
    options: SshOptions,
}

impl SshExecutor {
    pub fn new(options: SshOptions) -> Self {
        Self { options }
    }

    /// Fail early when the client programs a run needs are not installed
    pub fn check_prerequisites(&self, needs_sshpass: bool) -> Result<(), DeployError> {
        let mut programs = vec![&self.options.ssh_program, &self.options.scp_program];
        if needs_sshpass {
            programs.push(&self.options.sshpass_program);
        }
        for program in programs {
            if find_program(program).is_none() {
                let hint = if program == &self.options.sshpass_program {
                    " (install with: brew install hudochenkov/sshpass/sshpass)"
                } else {
                    ""
                };
                return Err(DeployError::ConfigError(format!(
                    "{} is not installed{}",
                    program, hint
                )));
            }
        }
        Ok(())
    }

    /// Start an ssh or scp command authenticated for `target`
    fn command(&self, program: &str, target: &RemoteTarget) -> Command {
        let mut cmd = match &target.credential {
            Credential::Password(password) => {
                let mut cmd = Command::new(&self.options.sshpass_program);
                cmd.arg("-e").arg(program);
                cmd.env("SSHPASS", password.expose_secret());
                cmd
            }
            Credential::KeyFile(path) => {
                let mut cmd = Command::new(program);
                cmd.arg("-i").arg(path).args(["-o", "BatchMode=yes"]);
                cmd
            }
        };
        cmd.args(SSH_OPTIONS)
            .arg("-o")
            .arg(format!("ConnectTimeout={}", self.options.connect_timeout.as_secs().max(1)))
            .stdin(Stdio::null())
            .kill_on_drop(true);
        cmd
    }

    fn ssh_command(&self, target: &RemoteTarget, remote_cmd: &str) -> Command {
        let mut cmd = self.command(&self.options.ssh_program, target);
        cmd.arg(target.destination()).arg(remote_cmd);
        cmd
    }

    /// Run a short remote command and collect its output
    async fn ssh_capture(
        &self,
        target: &RemoteTarget,
        remote_cmd: &str,
        timeout: Duration,
    ) -> Result<Output, DeployError> {
        let mut cmd = self.ssh_command(target, remote_cmd);
        cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
        match tokio::time::timeout(timeout, cmd.output()).await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) => Err(DeployError::ConnectionError(format!(
                "failed to start ssh: {}",
                e
            ))),
            Err(_) => Err(DeployError::ConnectionError(
                "SSH connection timed out".to_string(),
            )),
        }
    }

    /// Copy the local payload to the device
    async fn copy_payload(
        &self,
        target: &RemoteTarget,
        local_path: &Path,
        remote_path: &str,
    ) -> Result<(), DeployError> {
        let mut cmd = self.command(&self.options.scp_program, target);
        cmd.arg(local_path)
            .arg(format!("{}:{}", target.destination(), remote_path))
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let output = match tokio::time::timeout(COPY_TIMEOUT, cmd.output()).await {
            Ok(output) => output?,
            Err(_) => {
                return Err(DeployError::ConnectionError(format!(
                    "SCP timed out after {}",
                    format_duration(COPY_TIMEOUT)
                )))
            }
        };
        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        match output.status.code() {
            Some(code) if is_connection_exit(code) => {
                Err(DeployError::ConnectionError(format!("SCP failed: {}", stderr)))
            }
            code => Err(DeployError::RemoteExecutionError {
                exit_code: code.unwrap_or(-1),
                summary: tail_chars(&format!("SCP failed: {}", stderr), ERROR_TAIL_CHARS),
            }),
        }
    }

    /// Run the install command, streaming both outputs into the log
    async fn execute(
        &self,
        target: &RemoteTarget,
        remote_cmd: &str,
        writer: &mut LogWriter,
    ) -> Result<(i32, String, String), DeployError> {
        let mut cmd = self.ssh_command(target, remote_cmd);
        cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
        let mut child = cmd.spawn()?;

        let (tx, mut rx) = mpsc::channel::<(Stream, String)>(256);
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(pump_lines(stdout, Stream::Stdout, tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(pump_lines(stderr, Stream::Stderr, tx.clone()));
        }
        drop(tx);

        let mut stdout_tail = VecDeque::with_capacity(TAIL_LINES);
        let mut stderr_tail = VecDeque::with_capacity(TAIL_LINES);
        while let Some((stream, line)) = rx.recv().await {
            writer.line(stream, &line).await?;
            let tail = match stream {
                Stream::Stdout => &mut stdout_tail,
                Stream::Stderr => &mut stderr_tail,
            };
            if tail.len() == TAIL_LINES {
                tail.pop_front();
            }
            tail.push_back(line);
        }

        let status = child.wait().await?;
        let join = |tail: VecDeque<String>| tail.into_iter().collect::<Vec<_>>().join("\n");
        Ok((status.code().unwrap_or(-1), join(stdout_tail), join(stderr_tail)))
    }

    async fn run_steps(
        &self,
        invocation: &InstallProcedureInvocation,
        target: &RemoteTarget,
        writer: &mut LogWriter,
    ) -> Result<(i32, String, String), DeployError> {
        writer.note("checking connectivity").await?;
        self.check_connectivity(target).await?;

        if let PayloadSource::LocalCopy {
            local_path,
            remote_path,
        } = &invocation.source
        {
            writer
                .note(&format!("copying {} -> {}", local_path.display(), remote_path))
                .await?;
            self.copy_payload(target, local_path, remote_path).await?;
        }

        writer.note("running install").await?;
        let outcome = self
            .execute(target, &invocation.remote_command(false), writer)
            .await?;

        if let Some(cleanup) = invocation.cleanup_command() {
            if let Err(e) = self.ssh_capture(target, &cleanup, CLEANUP_TIMEOUT).await {
                debug!("Payload cleanup on {} failed: {}", target.device_name, e);
            }
        }

        Ok(outcome)
    }
}

#[async_trait]
impl RemoteExecutor for SshExecutor {
    fn preflight(&self, targets: &[RemoteTarget]) -> Result<(), DeployError> {
        self.check_prerequisites(targets.iter().any(|t| t.credential.needs_sshpass()))
    }

    async fn check_connectivity(&self, target: &RemoteTarget) -> Result<(), DeployError> {
        let timeout = self.options.connect_timeout + Duration::from_secs(5);
        let output = self.ssh_capture(target, "echo ok", timeout).await?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        if output.status.success() && stdout.contains("ok") {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let reason = match output.status.code() {
            Some(5) => "authentication failed (wrong password)".to_string(),
            _ if stderr.is_empty() => "unknown error".to_string(),
            _ => stderr,
        };
        Err(DeployError::ConnectionError(format!("SSH failed: {}", reason)))
    }

    async fn run(
        &self,
        invocation: &InstallProcedureInvocation,
        log: &AttemptLog,
        timeout: Duration,
    ) -> Result<ExecutionResult, DeployError> {
        let start = Instant::now();
        let target = RemoteTarget::from(invocation);
        let header = LogHeader {
            device_name: invocation.device_name.clone(),
            platform: invocation.descriptor.platform.to_string(),
            address: invocation.address.to_string(),
            location: invocation.location.clone(),
            command: invocation.remote_command(true),
        };

        if let PayloadSource::LocalCopy { local_path, .. } = &invocation.source {
            if let Err(e) = check_payload(local_path).await {
                log.write_failure(&header, &e).await?;
                return Err(e);
            }
        }

        let mut writer = log.open(&header).await?;
        if let PayloadSource::LocalCopy { local_path, .. } = &invocation.source {
            let digest = sha256_hash(&tokio::fs::read(local_path).await?);
            writer.note(&format!("payload sha256 {}", digest)).await?;
        }

        info!(
            "Running {} on {} ({})",
            invocation.descriptor.script_name,
            invocation.device_name,
            invocation.address
        );
        let outcome = tokio::time::timeout(timeout, self.run_steps(invocation, &target, &mut writer)).await;
        let duration = start.elapsed();

        match outcome {
            Err(_) => {
                warn!(
                    "{} timed out after {}; session torn down",
                    invocation.device_name,
                    format_duration(timeout)
                );
                writer
                    .note(&format!(
                        "TIMEOUT after {}: remote session terminated. The install may be \
                         partially applied on the device; it is not retried automatically.",
                        format_duration(timeout)
                    ))
                    .await?;
                writer.finish(None, duration).await?;
                Err(DeployError::TimeoutError(timeout))
            }
            Ok(Err(e)) => {
                writer.note(&e.to_string()).await?;
                writer.finish(None, duration).await?;
                Err(e)
            }
            Ok(Ok((exit_code, stdout_tail, stderr_tail))) => {
                writer.finish(Some(exit_code), duration).await?;
                if exit_code == SSH_ERROR_EXIT {
                    return Err(DeployError::ConnectionError(format!(
                        "SSH session lost: {}",
                        tail_chars(&stderr_tail, ERROR_TAIL_CHARS)
                    )));
                }
                Ok(ExecutionResult {
                    exit_code,
                    stdout_tail,
                    stderr_tail,
                    duration,
                })
            }
        }
    }

    async fn probe_agent(&self, target: &RemoteTarget) -> ProbeOutcome {
        let timeout = self.options.connect_timeout + Duration::from_secs(5);
        match self.ssh_capture(target, PROBE_COMMAND, timeout).await {
            Ok(output) => parse_probe_output(
                output.status.code(),
                &String::from_utf8_lossy(&output.stdout),
            ),
            Err(e) => {
                debug!("Probe on {} failed: {}", target.device_name, e);
                ProbeOutcome::Indeterminate
            }
        }
    }
}

async fn pump_lines<R>(reader: R, stream: Stream, tx: mpsc::Sender<(Stream, String)>)
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
                if buf.last() == Some(&b'\n') {
                    buf.pop();
                }
                if buf.last() == Some(&b'\r') {
                    buf.pop();
                }
                // Installers print whatever bytes they like; keep reading past bad UTF-8
                let line = String::from_utf8_lossy(&buf).into_owned();
                if tx.send((stream, line)).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                debug!("Stopped reading {:?}: {}", stream, e);
                break;
            }
        }
    }
}

async fn check_payload(path: &Path) -> Result<(), DeployError> {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_file() => Ok(()),
        _ => Err(DeployError::PayloadError(format!(
            "Local script not found: {}",
            path.display()
        ))),
    }
}

fn is_connection_exit(code: i32) -> bool {
    code == SSH_ERROR_EXIT || SSHPASS_AUTH_EXITS.contains(&code)
}

/// Look a program up on PATH
pub fn find_program(program: &str) -> Option<PathBuf> {
    let candidate = Path::new(program);
    if candidate.components().count() > 1 {
        return candidate.is_file().then(|| candidate.to_path_buf());
    }
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(program))
        .find(|p| p.is_file())
}
