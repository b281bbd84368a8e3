/// Resource limiter: runs one worker process under hard ceilings.
///
/// The worker is a separate OS process. Limits are enforced from both sides:
/// the kernel (`setrlimit` applied between fork and exec) and a host-side
/// watchdog that races the child against the wall-clock deadline and samples
/// its resident set size. Either watchdog trigger sends SIGKILL, so nothing
/// depends on the child cooperating.
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::SandboxError;

/// Interval between RSS samples.
const SAMPLE_INTERVAL: Duration = Duration::from_millis(25);

/// Address-space headroom above the memory limit for the interpreter image
/// and its evaluation stack.
const ADDRESS_SPACE_HEADROOM: u64 = 128 * 1024 * 1024;

const MAX_OPEN_FILES: u64 = 64;
const MAX_FILE_SIZE: u64 = 64 * 1024 * 1024;

/// Stderr is only kept for diagnostics.
const MAX_STDERR_BYTES: usize = 16 * 1024;

/// Marker the Rust runtime prints before aborting on allocation failure.
const ALLOC_FAILURE_MARKER: &str = "memory allocation of";

#[derive(Debug, Clone)]
pub struct LimitsPolicy {
    pub timeout: Duration,
    pub memory_bytes: u64,
    /// Cap on the stdout bytes read back from the worker.
    pub max_capture_bytes: usize,
}

/// How to start a worker.
#[derive(Debug, Clone)]
pub struct WorkerCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub cwd: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    Exited(i32),
    Signaled(i32),
    /// Killed by the watchdog at the deadline.
    Deadline,
    /// Killed by the watchdog after an RSS sample over the limit.
    MemoryBreach,
}

#[derive(Debug)]
pub struct LimitedRun {
    pub termination: Termination,
    pub stdout: Vec<u8>,
    pub stdout_truncated: bool,
    pub stderr: String,
    pub elapsed: Duration,
    pub peak_rss: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// The worker exited normally; its report is on stdout.
    Completed,
    TimedOut,
    MemoryExceeded,
    Crashed(String),
}

/// Spawns the worker, feeds it `stdin_payload` and supervises it until it
/// exits or is killed. Dropping the returned future kills the child.
pub async fn run_with_limits(
    policy: &LimitsPolicy,
    command: &WorkerCommand,
    stdin_payload: Vec<u8>,
) -> Result<LimitedRun, SandboxError> {
    let mut cmd = Command::new(&command.program);
    cmd.args(&command.args)
        .current_dir(&command.cwd)
        .env_clear()
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    #[cfg(unix)]
    {
        let memory = policy.memory_bytes.saturating_add(ADDRESS_SPACE_HEADROOM);
        let cpu_secs = policy.timeout.as_secs() + 1;
        // SAFETY: the closure runs between fork and exec and only calls
        // setrlimit, which is async-signal-safe.
        unsafe {
            cmd.pre_exec(move || apply_rlimits(memory, cpu_secs));
        }
    }

    let started = Instant::now();
    let mut child = cmd.spawn()?;
    let pid = child.id();
    debug!(pid, "Worker spawned");

    // The child may die before reading everything; a broken pipe is expected then.
    let stdin_task = child.stdin.take().map(|mut stdin| {
        tokio::spawn(async move {
            let _ = stdin.write_all(&stdin_payload).await;
            let _ = stdin.shutdown().await;
        })
    });
    let stdout_task = child
        .stdout
        .take()
        .map(|out| tokio::spawn(read_capped(out, policy.max_capture_bytes)));
    let stderr_task = child
        .stderr
        .take()
        .map(|err| tokio::spawn(read_capped(err, MAX_STDERR_BYTES)));

    let deadline = tokio::time::sleep(policy.timeout);
    tokio::pin!(deadline);
    let mut sampler = tokio::time::interval(SAMPLE_INTERVAL);
    let mut peak_rss = 0u64;

    let termination = loop {
        tokio::select! {
            status = child.wait() => break termination_of(status?),
            _ = &mut deadline => {
                warn!(pid, "Worker hit the wall-clock deadline, killing");
                let _ = child.start_kill();
                let _ = child.wait().await;
                break Termination::Deadline;
            }
            _ = sampler.tick() => {
                if let Some(rss) = pid.and_then(resident_set_bytes) {
                    peak_rss = peak_rss.max(rss);
                    if rss > policy.memory_bytes {
                        warn!(pid, rss, limit = policy.memory_bytes, "Worker exceeded its memory limit, killing");
                        let _ = child.start_kill();
                        let _ = child.wait().await;
                        break Termination::MemoryBreach;
                    }
                }
            }
        }
    };
    let elapsed = started.elapsed();

    if let Some(task) = stdin_task {
        task.abort();
    }
    let (stdout, stdout_truncated) = match stdout_task {
        Some(task) => task.await.unwrap_or_default(),
        None => (Vec::new(), false),
    };
    let (stderr, _) = match stderr_task {
        Some(task) => task.await.unwrap_or_default(),
        None => (Vec::new(), false),
    };

    Ok(LimitedRun {
        termination,
        stdout,
        stdout_truncated,
        stderr: String::from_utf8_lossy(&stderr).into_owned(),
        elapsed,
        peak_rss,
    })
}

/// Maps a finished run to what happened, from the host's point of view.
pub fn classify(run: &LimitedRun) -> Verdict {
    let alloc_failure = run.stderr.contains(ALLOC_FAILURE_MARKER);
    match run.termination {
        Termination::Deadline => Verdict::TimedOut,
        Termination::MemoryBreach => Verdict::MemoryExceeded,
        Termination::Signaled(sig) if sig == libc::SIGXCPU => Verdict::TimedOut,
        Termination::Signaled(sig) if (sig == libc::SIGABRT || sig == libc::SIGKILL) && alloc_failure => {
            Verdict::MemoryExceeded
        }
        Termination::Signaled(sig) if sig == libc::SIGXFSZ => {
            Verdict::Crashed("file size limit exceeded".to_string())
        }
        Termination::Signaled(sig) => Verdict::Crashed(format!("worker terminated by signal {sig}")),
        Termination::Exited(0) => Verdict::Completed,
        Termination::Exited(_) if alloc_failure => Verdict::MemoryExceeded,
        Termination::Exited(code) => {
            Verdict::Crashed(format!("worker exited with status {code}: {}", stderr_tail(&run.stderr)))
        }
    }
}

fn stderr_tail(stderr: &str) -> &str {
    stderr.trim().lines().last().unwrap_or("no diagnostics")
}

fn termination_of(status: ExitStatus) -> Termination {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(sig) = status.signal() {
            return Termination::Signaled(sig);
        }
    }
    Termination::Exited(status.code().unwrap_or(-1))
}

/// Reads up to `cap` bytes and drains the rest so the writer never blocks.
async fn read_capped<R: AsyncRead + Unpin>(mut reader: R, cap: usize) -> (Vec<u8>, bool) {
    let mut kept = Vec::new();
    let mut truncated = false;
    let mut chunk = [0u8; 8192];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                let room = cap.saturating_sub(kept.len());
                if n > room {
                    truncated = true;
                }
                kept.extend_from_slice(&chunk[..n.min(room)]);
            }
        }
    }
    (kept, truncated)
}

/// `setrlimit` with equal soft and hard values. A macro because the
/// resource parameter type differs between libc targets.
#[cfg(unix)]
macro_rules! set_limit {
    ($resource:expr, $value:expr) => {{
        let limit = libc::rlimit {
            rlim_cur: $value as libc::rlim_t,
            rlim_max: $value as libc::rlim_t,
        };
        if libc::setrlimit($resource, &limit) == 0 {
            Ok(())
        } else {
            Err(std::io::Error::last_os_error())
        }
    }};
}

#[cfg(unix)]
fn apply_rlimits(memory: u64, cpu_secs: u64) -> std::io::Result<()> {
    // SAFETY: plain syscalls on stack-allocated structs.
    unsafe {
        set_limit!(libc::RLIMIT_AS, memory)?;
        set_limit!(libc::RLIMIT_CPU, cpu_secs)?;
        set_limit!(libc::RLIMIT_NOFILE, MAX_OPEN_FILES)?;
        set_limit!(libc::RLIMIT_CORE, 0u64)?;
        set_limit!(libc::RLIMIT_FSIZE, MAX_FILE_SIZE)?;
    }
    Ok(())
}

/// Resident set size of `pid` in bytes, from `/proc/<pid>/status`.
#[cfg(target_os = "linux")]
fn resident_set_bytes(pid: u32) -> Option<u64> {
    let status = std::fs::read_to_string(format!("/proc/{pid}/status")).ok()?;
    parse_vm_rss(&status)
}

#[cfg(not(target_os = "linux"))]
fn resident_set_bytes(_pid: u32) -> Option<u64> {
    None
}

fn parse_vm_rss(status: &str) -> Option<u64> {
    let line = status.lines().find(|l| l.starts_with("VmRSS:"))?;
    let kib: u64 = line.split_whitespace().nth(1)?.parse().ok()?;
    Some(kib * 1024)
}
