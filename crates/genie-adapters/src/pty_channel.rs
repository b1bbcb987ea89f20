//! [`ChildProcessChannel`] over a native pseudo-terminal.
//!
//! A blocking reader thread forwards raw output chunks into an unbounded
//! queue; `read_nonblocking` drains that queue without ever blocking the
//! async caller.

use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use genie_core::BridgeConfig;
use genie_proto::ChannelError;
#[cfg(unix)]
use nix::sys::signal::{Signal, kill};
#[cfg(unix)]
use nix::unistd::Pid;
use portable_pty::{Child, CommandBuilder, MasterPty, PtySize, native_pty_system};
use tokio::sync::mpsc::{self, error::TryRecvError};
use tracing::{debug, info};

use crate::channel::{ChannelSpawner, ChildProcessChannel, Utf8Decoder};

/// Grace period between SIGTERM and SIGKILL.
const TERMINATE_GRACE: Duration = Duration::from_secs(2);

/// Options for spawning a [`PtyChannel`].
#[derive(Debug, Clone)]
pub struct PtyOptions {
    pub program: String,
    pub args: Vec<String>,
    pub cols: u16,
    pub rows: u16,
    /// Working directory for the child.
    ///
    /// Captured at construction so a later `current_dir()` failure cannot
    /// break spawning.
    pub workspace_root: PathBuf,
}

impl PtyOptions {
    /// Spawn options for the configured shell.
    pub fn from_config(config: &BridgeConfig) -> Self {
        Self {
            program: config.shell.clone(),
            args: config.shell_args.clone(),
            cols: config.pty_cols,
            rows: config.pty_rows,
            workspace_root: config.workspace_root.clone().unwrap_or_else(|| {
                std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
            }),
        }
    }
}

/// A child process attached to a native pseudo-terminal.
pub struct PtyChannel {
    master: Option<Box<dyn MasterPty + Send>>,
    writer: Option<Box<dyn Write + Send>>,
    child: Box<dyn Child + Send + Sync>,
    output_rx: mpsc::UnboundedReceiver<Vec<u8>>,
    raw: Vec<u8>,
    decoder: Utf8Decoder,
    pushed_back: String,
    eof: bool,
    closed: bool,
}

impl std::fmt::Debug for PtyChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PtyChannel")
            .field("pid", &self.child.process_id())
            .field("eof", &self.eof)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl PtyChannel {
    /// Spawns `options.program` in a new pseudo-terminal.
    pub fn spawn(options: &PtyOptions) -> Result<Self, ChannelError> {
        let spawn_error = |reason: String| ChannelError::Spawn {
            command: options.program.clone(),
            reason,
        };

        let pair = native_pty_system()
            .openpty(PtySize {
                rows: options.rows,
                cols: options.cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| spawn_error(e.to_string()))?;

        let mut cmd_builder = CommandBuilder::new(&options.program);
        cmd_builder.args(&options.args);
        cmd_builder.cwd(&options.workspace_root);
        cmd_builder.env("TERM", "xterm-256color");

        let child = pair
            .slave
            .spawn_command(cmd_builder)
            .map_err(|e| spawn_error(e.to_string()))?;

        // Drop the slave so the reader sees EOF once the child exits.
        drop(pair.slave);

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| spawn_error(e.to_string()))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| spawn_error(e.to_string()))?;

        let (output_tx, output_rx) = mpsc::unbounded_channel();
        debug!("Spawning PTY output reader thread");
        std::thread::spawn(move || read_loop(reader, &output_tx));

        info!(
            program = %options.program,
            pid = ?child.process_id(),
            "Spawned child in pseudo-terminal"
        );

        Ok(Self {
            master: Some(pair.master),
            writer: Some(writer),
            child,
            output_rx,
            raw: Vec::new(),
            decoder: Utf8Decoder::default(),
            pushed_back: String::new(),
            eof: false,
            closed: false,
        })
    }

    /// Moves every queued chunk into the raw buffer, up to `max_bytes`.
    fn drain_queue(&mut self, max_bytes: usize) {
        while self.raw.len() < max_bytes {
            match self.output_rx.try_recv() {
                Ok(chunk) => self.raw.extend_from_slice(&chunk),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.eof = true;
                    break;
                }
            }
        }
    }

    #[cfg(not(unix))]
    async fn terminate_child(&mut self) {
        if let Err(e) = self.child.kill() {
            debug!(error = %e, "Kill failed");
        }
    }

    #[cfg(unix)]
    async fn terminate_child(&mut self) {
        let Some(id) = self.child.process_id() else {
            return;
        };
        let Ok(raw_pid) = i32::try_from(id) else {
            return;
        };
        let pid = Pid::from_raw(raw_pid);

        debug!(pid = %pid, "Sending SIGTERM");
        let _ = kill(pid, Signal::SIGTERM);

        let start = tokio::time::Instant::now();
        while start.elapsed() < TERMINATE_GRACE {
            if !self.is_alive() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        debug!(pid = %pid, "Grace period expired, sending SIGKILL");
        let _ = kill(pid, Signal::SIGKILL);
        let _ = self.child.try_wait();
    }
}

fn read_loop(mut reader: Box<dyn Read + Send>, output_tx: &mpsc::UnboundedSender<Vec<u8>>) {
    let mut buf = [0u8; 4096];
    loop {
        match reader.read(&mut buf) {
            Ok(0) => {
                debug!("PTY reader: EOF");
                break;
            }
            Ok(n) => {
                if output_tx.send(buf[..n].to_vec()).is_err() {
                    break;
                }
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(10));
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => {
                // Linux reports EIO on the master once the child side closes.
                debug!(error = %e, "PTY reader stopped");
                break;
            }
        }
    }
}

#[async_trait]
impl ChildProcessChannel for PtyChannel {
    fn send_raw(&mut self, bytes: &[u8]) -> Result<(), ChannelError> {
        let writer = self.writer.as_mut().ok_or(ChannelError::Closed)?;
        writer.write_all(bytes)?;
        writer.flush()?;
        Ok(())
    }

    fn read_nonblocking(&mut self, max_bytes: usize) -> Result<String, ChannelError> {
        if self.closed {
            return Err(ChannelError::Closed);
        }
        if !self.pushed_back.is_empty() {
            return Ok(std::mem::take(&mut self.pushed_back));
        }

        self.drain_queue(max_bytes.max(1));
        if self.raw.is_empty() {
            return if self.eof {
                Err(ChannelError::Closed)
            } else {
                Ok(String::new())
            };
        }

        let take = self.raw.len().min(max_bytes.max(1));
        let bytes: Vec<u8> = self.raw.drain(..take).collect();
        Ok(self.decoder.decode(&bytes))
    }

    fn push_back(&mut self, text: &str) {
        if !text.is_empty() {
            self.pushed_back.insert_str(0, text);
        }
    }

    fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    async fn terminate(&mut self) {
        if self.is_alive() {
            self.terminate_child().await;
        }
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.terminate().await;
        self.writer = None;
        self.master = None;
        self.closed = true;
        info!("PTY channel closed");
    }
}

impl Drop for PtyChannel {
    fn drop(&mut self) {
        if !self.closed && matches!(self.child.try_wait(), Ok(None)) {
            let _ = self.child.kill();
        }
    }
}

/// Spawns the configured shell in a [`PtyChannel`].
#[derive(Debug, Default, Clone, Copy)]
pub struct PtySpawner;

impl ChannelSpawner for PtySpawner {
    fn spawn(&self, config: &BridgeConfig) -> Result<Box<dyn ChildProcessChannel>, ChannelError> {
        Ok(Box::new(PtyChannel::spawn(&PtyOptions::from_config(config))?))
    }
}
