//! External command execution with timeouts and secret redaction.
//!
//! [`CommandRunner`] is the raw process launcher. [`CommandExecutor`] wraps
//! it and is the only path the rest of the crate uses to run anything: it
//! sanitizes the argument vector before logging, maps timeouts and launch
//! failures into [`WifiError`], and scrubs secrets out of tool output that
//! ends up in error messages.

use std::io::Read;
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::error::{WifiError, WifiResult};

/// Replacement text for any redacted argument value.
pub const REDACTED: &str = "********";

/// Arguments whose *following* argument is a secret.
pub const SENSITIVE_FLAGS: &[&str] = &[
    "password",
    "--password",
    "passphrase",
    "--passphrase",
    "psk",
    "wifi-sec.psk",
    "802-11-wireless-security.psk",
    "wep-key0",
    "wifi-sec.wep-key0",
];

/// Substrings that mark the key of a `key=value` argument as secret.
const SENSITIVE_KEY_MARKERS: &[&str] = &["pass", "secret", "psk", "key"];

/// Result of a process that ran to completion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, or -1 when the process was terminated by a signal.
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == 0
    }

    /// stderr if the tool wrote anything there, stdout otherwise.
    pub fn error_text(&self) -> &str {
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            self.stdout.trim()
        } else {
            stderr
        }
    }
}

/// Why a process did not produce a [`CommandOutput`].
#[derive(Debug)]
pub enum RunFailure {
    TimedOut,
    Launch(std::io::Error),
}

/// Launches a process and waits for it, bounded by `timeout`.
///
/// `argv[0]` is the program. Implementations must not log; the executor
/// owns logging so that redaction cannot be bypassed.
pub trait CommandRunner: Send + Sync {
    fn run(&self, argv: &[&str], timeout: Duration) -> Result<CommandOutput, RunFailure>;
}

/// Runs real processes via `std::process`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, argv: &[&str], timeout: Duration) -> Result<CommandOutput, RunFailure> {
        let (program, args) = argv.split_first().ok_or_else(|| {
            RunFailure::Launch(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "empty argument vector",
            ))
        })?;

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(RunFailure::Launch)?;

        // Drain both pipes on their own threads so a chatty child can't
        // block on a full pipe while we poll for exit.
        let stdout = child.stdout.take().map(drain);
        let stderr = child.stderr.take().map(drain);

        let deadline = Instant::now() + timeout;
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) if Instant::now() >= deadline => {
                    // Best-effort; we stop waiting either way.
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(RunFailure::TimedOut);
                }
                Ok(None) => thread::sleep(Duration::from_millis(20)),
                Err(e) => return Err(RunFailure::Launch(e)),
            }
        };

        let collect = |handle: Option<thread::JoinHandle<Vec<u8>>>| {
            handle
                .and_then(|h| h.join().ok())
                .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
                .unwrap_or_default()
        };

        Ok(CommandOutput {
            status: status.code().unwrap_or(-1),
            stdout: collect(stdout),
            stderr: collect(stderr),
        })
    }
}

fn drain<R: Read + Send + 'static>(mut pipe: R) -> thread::JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        buf
    })
}

/// An argument vector with every secret value replaced by [`REDACTED`].
#[derive(Debug, Clone)]
pub struct SanitizedCommand {
    args: Vec<String>,
    secrets: Vec<String>,
}

impl SanitizedCommand {
    pub fn new(argv: &[&str]) -> Self {
        let mut args = Vec::with_capacity(argv.len());
        let mut secrets = Vec::new();
        let mut after_flag = false;

        // A value that looks like a flag still arms redaction of the next
        // argument, so `connect password password <psk>` masks both.
        for arg in argv {
            if after_flag {
                if !arg.is_empty() {
                    secrets.push(arg.to_string());
                }
                args.push(REDACTED.to_string());
            } else if let Some((key, value)) = arg.split_once('=').filter(|(k, _)| is_sensitive_key(k)) {
                if !value.is_empty() {
                    secrets.push(value.to_string());
                }
                args.push(format!("{key}={REDACTED}"));
            } else {
                args.push(arg.to_string());
            }
            after_flag = is_sensitive_flag(arg);
        }

        // Longest first, so a short value never splits a longer one in scrub.
        secrets.sort_by(|a, b| b.len().cmp(&a.len()));
        Self { args, secrets }
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Removes every redacted value from free text such as tool stderr.
    pub fn scrub(&self, text: &str) -> String {
        let mut out = text.to_string();
        for secret in &self.secrets {
            out = out.replace(secret.as_str(), REDACTED);
        }
        out
    }
}

impl std::fmt::Display for SanitizedCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.args.join(" "))
    }
}

fn is_sensitive_flag(arg: &str) -> bool {
    SENSITIVE_FLAGS.iter().any(|flag| arg.eq_ignore_ascii_case(flag))
}

fn is_sensitive_key(key: &str) -> bool {
    let key = key.trim_start_matches('-').to_ascii_lowercase();
    SENSITIVE_KEY_MARKERS.iter().any(|marker| key.contains(marker))
}

/// Sanitizing, logging front end over a [`CommandRunner`].
#[derive(Clone)]
pub struct CommandExecutor {
    runner: Arc<dyn CommandRunner>,
}

impl CommandExecutor {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    /// Runs `argv`; a non-zero exit is still `Ok`.
    pub fn run(&self, argv: &[&str], timeout: Duration) -> WifiResult<CommandOutput> {
        let command = SanitizedCommand::new(argv);

        match self.runner.run(argv, timeout) {
            Ok(output) => {
                debug!("{} -> exit {}", command, output.status);
                Ok(output)
            }
            Err(RunFailure::TimedOut) => {
                warn!("{} -> timed out after {}s", command, timeout.as_secs());
                Err(WifiError::Timeout {
                    command: command.to_string(),
                    timeout,
                })
            }
            Err(RunFailure::Launch(e)) => {
                warn!("{} -> failed to launch: {}", command, e);
                Err(WifiError::Command {
                    command: command.to_string(),
                    message: command.scrub(&e.to_string()),
                })
            }
        }
    }

    /// Runs `argv` and turns a non-zero exit into [`WifiError::Command`].
    pub fn run_checked(&self, argv: &[&str], timeout: Duration) -> WifiResult<CommandOutput> {
        let output = self.run(argv, timeout)?;
        if output.success() {
            Ok(output)
        } else {
            let command = SanitizedCommand::new(argv);
            Err(WifiError::Command {
                message: command.scrub(output.error_text()),
                command: command.to_string(),
            })
        }
    }
}
