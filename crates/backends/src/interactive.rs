// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! PTY runner for passthrough agents.
//!
//! Passthrough CLIs cannot speak the structured protocol and are driven
//! through a pseudo-terminal instead: the runner allocates a PTY, wires
//! the child's stdio to the slave side, and bridges master-side bytes to
//! async channels. A blocking reader thread drains the master; it exits
//! on EOF/EIO once the child is gone and the slave descriptors close.

use crate::BackendError;
use async_trait::async_trait;
use indexmap::IndexMap;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use parking_lot::Mutex;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::process::Stdio;
use tokio::sync::{mpsc, watch};

const OUTPUT_CHANNEL_CAPACITY: usize = 64;
const READ_BUF_SIZE: usize = 4096;

/// What to run on the PTY.
#[derive(Debug, Clone)]
pub struct PtySpec {
    pub argv: Vec<String>,
    pub cwd: PathBuf,
    pub env: IndexMap<String, String>,
}

/// Starts agent processes on a pseudo-terminal.
#[async_trait]
pub trait InteractiveRunner: Send + Sync + 'static {
    async fn start(&self, spec: PtySpec) -> Result<PtyProcess, BackendError>;
}

#[derive(Debug)]
enum PtyWriter {
    File(std::fs::File),
    #[cfg(any(test, feature = "test-support"))]
    Channel(mpsc::Sender<Vec<u8>>),
}

enum WriteTarget {
    File(std::fs::File),
    #[cfg(any(test, feature = "test-support"))]
    Channel(mpsc::Sender<Vec<u8>>),
}

/// Handle to a PTY-attached agent process.
#[derive(Debug)]
pub struct PtyProcess {
    pid: u32,
    output: Mutex<Option<mpsc::Receiver<Vec<u8>>>>,
    writer: Mutex<PtyWriter>,
    exit: watch::Receiver<Option<Option<i32>>>,
}

impl PtyProcess {
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Take the output byte stream. Returns `None` after the first call.
    pub fn take_output(&self) -> Option<mpsc::Receiver<Vec<u8>>> {
        self.output.lock().take()
    }

    /// Write bytes to the agent's terminal.
    pub async fn write(&self, bytes: &[u8]) -> Result<(), BackendError> {
        let bytes = bytes.to_vec();
        // Clone the sink out of the lock; never write while holding it.
        let target = {
            let writer = self.writer.lock();
            match &*writer {
                PtyWriter::File(file) => WriteTarget::File(
                    file.try_clone()
                        .map_err(|e| BackendError::StopFailed(format!("pty writer clone: {}", e)))?,
                ),
                #[cfg(any(test, feature = "test-support"))]
                PtyWriter::Channel(tx) => WriteTarget::Channel(tx.clone()),
            }
        };
        match target {
            WriteTarget::File(mut file) => tokio::task::spawn_blocking(move || {
                file.write_all(&bytes)
            })
            .await
            .map_err(|e| BackendError::StopFailed(format!("pty write join: {}", e)))?
            .map_err(|e| BackendError::StopFailed(format!("pty write: {}", e))),
            #[cfg(any(test, feature = "test-support"))]
            WriteTarget::Channel(tx) => tx
                .send(bytes)
                .await
                .map_err(|_| BackendError::StopFailed("pty input closed".into())),
        }
    }

    /// Wait for process exit; `None` when killed by signal.
    pub async fn wait(&self) -> Option<i32> {
        let mut rx = self.exit.clone();
        let result = match rx.wait_for(|v| v.is_some()).await {
            Ok(value) => (*value).flatten(),
            Err(_) => None,
        };
        result
    }

    pub fn is_running(&self) -> bool {
        self.exit.borrow().is_none()
    }

    /// Send SIGTERM (or SIGKILL when forced).
    pub fn signal(&self, force: bool) {
        let signal = if force { Signal::SIGKILL } else { Signal::SIGTERM };
        if let Err(e) = kill(Pid::from_raw(self.pid as i32), signal) {
            tracing::debug!(pid = self.pid, error = %e, "pty signal failed");
        }
    }

    /// In-process fake for tests: output is fed by `output_rx`'s sender,
    /// input lands on `input_tx`'s receiver, exit on the watch sender.
    #[cfg(any(test, feature = "test-support"))]
    pub fn fake(
        pid: u32,
        output_rx: mpsc::Receiver<Vec<u8>>,
        input_tx: mpsc::Sender<Vec<u8>>,
        exit: watch::Receiver<Option<Option<i32>>>,
    ) -> Self {
        Self {
            pid,
            output: Mutex::new(Some(output_rx)),
            writer: Mutex::new(PtyWriter::Channel(input_tx)),
            exit,
        }
    }

    /// Channel pair for [`PtyProcess::fake`].
    #[cfg(any(test, feature = "test-support"))]
    pub fn fake_channels() -> (
        mpsc::Sender<Vec<u8>>,
        mpsc::Receiver<Vec<u8>>,
        watch::Sender<Option<Option<i32>>>,
        watch::Receiver<Option<Option<i32>>>,
    ) {
        let (out_tx, out_rx) = mpsc::channel(OUTPUT_CHANNEL_CAPACITY);
        let (exit_tx, exit_rx) = watch::channel(None);
        (out_tx, out_rx, exit_tx, exit_rx)
    }
}

/// Runs PTY processes on the local machine.
#[derive(Debug, Default)]
pub struct LocalPtyRunner;

impl LocalPtyRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl InteractiveRunner for LocalPtyRunner {
    async fn start(&self, spec: PtySpec) -> Result<PtyProcess, BackendError> {
        let Some((program, args)) = spec.argv.split_first() else {
            return Err(BackendError::CreateFailed("empty passthrough argv".into()));
        };

        let pty = nix::pty::openpty(None, None)
            .map_err(|e| BackendError::CreateFailed(format!("openpty: {}", e)))?;
        let master = pty.master;
        let slave = pty.slave;

        let stdin = slave
            .try_clone()
            .map_err(|e| BackendError::CreateFailed(format!("slave clone: {}", e)))?;
        let stdout = slave
            .try_clone()
            .map_err(|e| BackendError::CreateFailed(format!("slave clone: {}", e)))?;

        let mut command = tokio::process::Command::new(program);
        command
            .args(args)
            .current_dir(&spec.cwd)
            .env("TERM", "xterm-256color")
            .envs(spec.env.iter())
            .stdin(Stdio::from(stdin))
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(slave));

        let mut child = command
            .spawn()
            .map_err(|e| BackendError::CreateFailed(format!("pty spawn: {}", e)))?;
        let pid = child
            .id()
            .ok_or_else(|| BackendError::CreateFailed("spawned process has no pid".into()))?;

        let master_file = std::fs::File::from(master);
        let writer = master_file
            .try_clone()
            .map_err(|e| BackendError::CreateFailed(format!("master clone: {}", e)))?;

        let (out_tx, out_rx) = mpsc::channel::<Vec<u8>>(OUTPUT_CHANNEL_CAPACITY);
        std::thread::spawn(move || {
            let mut file = master_file;
            let mut buf = [0u8; READ_BUF_SIZE];
            loop {
                match file.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        if out_tx.blocking_send(buf[..n].to_vec()).is_err() {
                            break;
                        }
                    }
                    // EIO once the child exits and the slave side closes.
                    Err(_) => break,
                }
            }
        });

        let (exit_tx, exit_rx) = watch::channel(None);
        tokio::spawn(async move {
            let status = child.wait().await.ok();
            let code = status.and_then(|s| s.code());
            tracing::info!(pid, exit_code = ?code, "pty process exited");
            let _ = exit_tx.send(Some(code));
        });

        Ok(PtyProcess {
            pid,
            output: Mutex::new(Some(out_rx)),
            writer: Mutex::new(PtyWriter::File(writer)),
            exit: exit_rx,
        })
    }
}

#[cfg(test)]
#[path = "interactive_tests.rs"]
mod tests;
