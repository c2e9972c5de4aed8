//! In-memory stand-in for the SSH transport.
//!
//! [`FakeConnector`] implements [`Connector`] without touching the network.
//! Commands are answered from scripted replies, file transfers go to an
//! in-memory file system, and every connect, command and close is counted
//! so tests can assert on exactly what reached the "remote" side.
//!
//! Clones share state: keep one handle in the test and give the other to
//! the gateway.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use pigate_config::TargetConfig;
use pigate_core::transport::{Connector, ExecOutput, RemoteSession, TransportError};

/// One command as seen by the fake remote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCommand {
    pub target: String,
    pub command: String,
    pub timeout: Duration,
}

#[derive(Default)]
struct FakeState {
    /// First reply whose needle occurs in the command wins.
    replies: Vec<(String, ExecOutput)>,
    fallback: ExecOutput,
    files: BTreeMap<String, Vec<u8>>,
    modes: BTreeMap<String, u32>,
    commands: Vec<RecordedCommand>,
    connects: usize,
    closes: usize,
    open: usize,
    refuse_connect: bool,
    exec_times_out: bool,
}

/// Scriptable [`Connector`] backed by shared in-memory state.
#[derive(Clone, Default)]
pub struct FakeConnector {
    state: Arc<Mutex<FakeState>>,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().expect("fake connector state poisoned")
    }

    /// Answer any command containing `needle` with the given output.
    pub fn reply(&self, needle: &str, stdout: &str, stderr: &str, exit_code: i32) -> &Self {
        self.state().replies.push((
            needle.to_string(),
            ExecOutput {
                stdout: stdout.to_string(),
                stderr: stderr.to_string(),
                exit_code,
            },
        ));
        self
    }

    /// Answer for commands no scripted reply matches. Defaults to empty
    /// output with exit code 0.
    pub fn fallback(&self, stdout: &str, stderr: &str, exit_code: i32) -> &Self {
        self.state().fallback = ExecOutput {
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
            exit_code,
        };
        self
    }

    /// Make every subsequent connect fail.
    pub fn refuse_connections(&self) -> &Self {
        self.state().refuse_connect = true;
        self
    }

    /// Make every subsequent command fail with a timeout.
    pub fn time_out_commands(&self) -> &Self {
        self.state().exec_times_out = true;
        self
    }

    /// Seed a remote file.
    pub fn put_file(&self, path: &str, data: &[u8]) -> &Self {
        self.state().files.insert(path.to_string(), data.to_vec());
        self
    }

    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.state().files.get(path).cloned()
    }

    /// Permission bits set by the last write to `path`, if any.
    pub fn mode(&self, path: &str) -> Option<u32> {
        self.state().modes.get(path).copied()
    }

    pub fn commands(&self) -> Vec<RecordedCommand> {
        self.state().commands.clone()
    }

    /// Command lines only, in order.
    pub fn command_lines(&self) -> Vec<String> {
        self.state()
            .commands
            .iter()
            .map(|c| c.command.clone())
            .collect()
    }

    pub fn connects(&self) -> usize {
        self.state().connects
    }

    pub fn closes(&self) -> usize {
        self.state().closes
    }

    /// Sessions opened and not yet dropped.
    pub fn open_sessions(&self) -> usize {
        self.state().open
    }
}

impl Connector for FakeConnector {
    fn connect(&self, target: &TargetConfig) -> Result<Box<dyn RemoteSession>, TransportError> {
        let mut state = self.state();
        if state.refuse_connect {
            return Err(TransportError::Connect {
                target: target.name.clone(),
                reason: "connection refused".to_string(),
            });
        }
        state.connects += 1;
        state.open += 1;
        Ok(Box::new(FakeSession {
            state: Arc::clone(&self.state),
            target: target.name.clone(),
        }))
    }
}

struct FakeSession {
    state: Arc<Mutex<FakeState>>,
    target: String,
}

impl FakeSession {
    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().expect("fake connector state poisoned")
    }
}

impl RemoteSession for FakeSession {
    fn exec(&mut self, command: &str, timeout: Duration) -> Result<ExecOutput, TransportError> {
        let mut state = self.state();
        state.commands.push(RecordedCommand {
            target: self.target.clone(),
            command: command.to_string(),
            timeout,
        });
        if state.exec_times_out {
            return Err(TransportError::Timeout(timeout));
        }
        let reply = state
            .replies
            .iter()
            .find(|(needle, _)| command.contains(needle.as_str()))
            .map(|(_, out)| out.clone())
            .unwrap_or_else(|| state.fallback.clone());
        Ok(reply)
    }

    fn put_bytes(
        &mut self,
        data: &[u8],
        remote_path: &str,
        mode: Option<u32>,
    ) -> Result<(), TransportError> {
        let mut state = self.state();
        state.files.insert(remote_path.to_string(), data.to_vec());
        if let Some(mode) = mode {
            state.modes.insert(remote_path.to_string(), mode);
        }
        Ok(())
    }

    fn get_bytes(&mut self, remote_path: &str) -> Result<Vec<u8>, TransportError> {
        self.state()
            .files
            .get(remote_path)
            .cloned()
            .ok_or_else(|| TransportError::Read {
                path: remote_path.to_string(),
                reason: "no such file".to_string(),
            })
    }
}

impl Drop for FakeSession {
    fn drop(&mut self) {
        if let Ok(mut state) = self.state.lock() {
            state.open -= 1;
            state.closes += 1;
        }
    }
}
