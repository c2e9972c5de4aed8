//! Per-call SSH transport.
//!
//! A [`Connector`] opens one authenticated [`RemoteSession`] for a target;
//! [`Transport`] runs a block of work against that session on tokio's
//! blocking pool and bounds the whole block with a timeout. Sessions are
//! never pooled or shared: every call opens its own and the session is
//! closed when it is dropped, on every exit path.
//!
//! ```text
//! Transport::with_session(target, budget, |session| { ... })
//!     → spawn_blocking
//!         → Connector::connect(target)      // TCP + handshake + host key + auth
//!         → closure(session)                // exec / put_bytes / get_bytes
//!         → drop(session)                   // SFTP channel + SSH disconnect
//! ```

use std::collections::{BTreeMap, HashMap};
use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use ssh2::{CheckResult, FileStat, KnownHostFileKind, OpenFlags, OpenType, Session};
use tracing::{debug, warn};

use pigate_config::TargetConfig;

/// Extra headroom on the async-side bound over connect + command timeouts.
const TIMEOUT_GRACE: Duration = Duration::from_secs(5);

/// Sleep between polls of an exec channel when neither stream had data.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Errors raised while talking to a remote host.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("connection to target '{target}' failed: {reason}")]
    Connect { target: String, reason: String },

    #[error("remote operation exceeded {0:?}")]
    Timeout(Duration),

    #[error("remote I/O failed: {0}")]
    Remote(String),

    #[error("write to {path} failed: {reason}")]
    Write { path: String, reason: String },

    #[error("read of {path} failed: {reason}")]
    Read { path: String, reason: String },

    #[error("{0}")]
    InvalidRequest(String),
}

/// Captured result of one remote command. A non-zero exit code is a normal
/// result, not an error.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    /// `-1` when the remote side reported no exit status.
    pub exit_code: i32,
}

/// A command to run on a target.
#[derive(Debug, Clone, Default)]
pub struct ExecRequest {
    pub command: String,
    pub cwd: Option<String>,
    pub env: BTreeMap<String, String>,
    /// Falls back to the transport's default when unset.
    pub timeout: Option<Duration>,
}

impl ExecRequest {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ..Self::default()
        }
    }

    pub fn cwd(mut self, cwd: impl Into<String>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn env(mut self, env: BTreeMap<String, String>) -> Self {
        self.env = env;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// An open, authenticated session to one target.
///
/// Implementations release every remote resource in `Drop`.
pub trait RemoteSession: Send {
    /// Run a fully composed command line.
    fn exec(&mut self, command: &str, timeout: Duration) -> Result<ExecOutput, TransportError>;

    /// Write `data` to `remote_path`, creating parent directories.
    fn put_bytes(
        &mut self,
        data: &[u8],
        remote_path: &str,
        mode: Option<u32>,
    ) -> Result<(), TransportError>;

    /// Read the whole file at `remote_path`.
    fn get_bytes(&mut self, remote_path: &str) -> Result<Vec<u8>, TransportError>;
}

/// Opens sessions. Blocking; always called from the blocking pool.
pub trait Connector: Send + Sync + 'static {
    fn connect(&self, target: &TargetConfig) -> Result<Box<dyn RemoteSession>, TransportError>;
}

/// Async front end over a [`Connector`].
#[derive(Clone)]
pub struct Transport {
    connector: Arc<dyn Connector>,
    default_timeout: Duration,
}

impl Transport {
    pub fn new(connector: Arc<dyn Connector>, default_timeout: Duration) -> Self {
        Self {
            connector,
            default_timeout,
        }
    }

    /// Bound applied to commands and transfers that set no timeout.
    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Open one session and run `work` against it.
    ///
    /// `budget` is the time the work itself may take. The async wait is
    /// bounded by connect timeout + budget + a small grace; when that fires
    /// the caller gets [`TransportError::Timeout`] and the blocking task
    /// drops the session as soon as libssh2 returns.
    pub async fn with_session<F, T>(
        &self,
        target: &TargetConfig,
        budget: Duration,
        work: F,
    ) -> Result<T, TransportError>
    where
        F: FnOnce(&mut dyn RemoteSession) -> Result<T, TransportError> + Send + 'static,
        T: Send + 'static,
    {
        let connector = Arc::clone(&self.connector);
        let bound = target.connect_timeout() + budget + TIMEOUT_GRACE;
        let target = target.clone();

        let task = tokio::task::spawn_blocking(move || {
            let mut session = connector.connect(&target)?;
            debug!(target = %target.name, "Session opened");
            work(session.as_mut())
        });

        match tokio::time::timeout(bound, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join)) => Err(TransportError::Remote(format!("session task failed: {join}"))),
            Err(_) => Err(TransportError::Timeout(bound)),
        }
    }

    /// Run one command in its own session.
    pub async fn exec(
        &self,
        target: &TargetConfig,
        request: ExecRequest,
    ) -> Result<ExecOutput, TransportError> {
        let line = compose_command(&request)?;
        let timeout = request.timeout.unwrap_or(self.default_timeout);
        self.with_session(target, timeout, move |session| session.exec(&line, timeout))
            .await
    }

    pub async fn put_bytes(
        &self,
        target: &TargetConfig,
        data: Vec<u8>,
        remote_path: String,
        mode: Option<u32>,
    ) -> Result<(), TransportError> {
        self.with_session(target, self.default_timeout, move |session| {
            session.put_bytes(&data, &remote_path, mode)
        })
        .await
    }

    pub async fn get_bytes(
        &self,
        target: &TargetConfig,
        remote_path: String,
    ) -> Result<Vec<u8>, TransportError> {
        self.with_session(target, self.default_timeout, move |session| {
            session.get_bytes(&remote_path)
        })
        .await
    }
}

/// Build the command line actually sent to the remote shell.
///
/// `export K="v" ...; ` comes first when env is set, then `cd <cwd> && `,
/// then the command verbatim.
pub fn compose_command(request: &ExecRequest) -> Result<String, TransportError> {
    let mut line = String::new();

    if !request.env.is_empty() {
        let mut assignments = Vec::with_capacity(request.env.len());
        for (key, value) in &request.env {
            if !is_shell_identifier(key) {
                return Err(TransportError::InvalidRequest(format!(
                    "env key {key:?} is not a valid shell identifier"
                )));
            }
            assignments.push(format!("{key}=\"{}\"", escape_double_quoted(value)));
        }
        line.push_str("export ");
        line.push_str(&assignments.join(" "));
        line.push_str("; ");
    }

    if let Some(cwd) = request.cwd.as_deref() {
        line.push_str("cd ");
        line.push_str(cwd);
        line.push_str(" && ");
    }

    line.push_str(&request.command);
    Ok(line)
}

fn is_shell_identifier(key: &str) -> bool {
    let mut chars = key.chars();
    matches!(chars.next(), Some(c) if c == '_' || c.is_ascii_alphabetic())
        && chars.all(|c| c == '_' || c.is_ascii_alphanumeric())
}

/// Escape a value for use inside a double-quoted shell string.
fn escape_double_quoted(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '\\' | '"' | '$' | '`') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

// ── ssh2 implementation ─────────────────────────────────────────────────

/// Production [`Connector`] over libssh2.
///
/// Host keys are checked against the target's known-hosts file when one is
/// configured. Otherwise the first key seen for `host:port` is pinned for
/// the life of the process and any later different key is rejected.
#[derive(Debug)]
pub struct SshConnector {
    transfer_timeout: Duration,
    pinned: Mutex<HashMap<String, Vec<u8>>>,
}

impl SshConnector {
    pub fn new(transfer_timeout: Duration) -> Self {
        Self {
            transfer_timeout,
            pinned: Mutex::new(HashMap::new()),
        }
    }

    fn check_host_key(&self, target: &TargetConfig, session: &Session) -> Result<(), String> {
        let (key, _kind) = session
            .host_key()
            .ok_or_else(|| "server presented no host key".to_string())?;

        if let Some(path) = target.known_hosts_path.as_deref() {
            let mut known = session.known_hosts().map_err(|e| e.to_string())?;
            known
                .read_file(path, KnownHostFileKind::OpenSSH)
                .map_err(|e| format!("cannot read known hosts {}: {e}", path.display()))?;
            return match known.check_port(&target.host, target.port, key) {
                CheckResult::Match => Ok(()),
                CheckResult::NotFound => Err("host key not present in known hosts".to_string()),
                CheckResult::Mismatch => Err("host key does not match known hosts".to_string()),
                CheckResult::Failure => Err("host key check failed".to_string()),
            };
        }

        let id = format!("{}:{}", target.host, target.port);
        let mut pinned = self
            .pinned
            .lock()
            .map_err(|_| "host key pin table unavailable".to_string())?;
        match pinned.get(&id) {
            Some(seen) if seen.as_slice() == key => Ok(()),
            Some(_) => Err("host key changed since first connection".to_string()),
            None => {
                warn!(target = %target.name, host = %id, "Pinning previously unseen host key");
                pinned.insert(id, key.to_vec());
                Ok(())
            }
        }
    }
}

impl Connector for SshConnector {
    fn connect(&self, target: &TargetConfig) -> Result<Box<dyn RemoteSession>, TransportError> {
        let fail = |reason: String| TransportError::Connect {
            target: target.name.clone(),
            reason,
        };
        let connect_timeout = target.connect_timeout();

        let addr = (target.host.as_str(), target.port)
            .to_socket_addrs()
            .map_err(|e| fail(format!("cannot resolve host: {e}")))?
            .next()
            .ok_or_else(|| fail("host resolved to no addresses".to_string()))?;
        let tcp = TcpStream::connect_timeout(&addr, connect_timeout)
            .map_err(|e| fail(format!("tcp connect: {e}")))?;

        let mut session = Session::new().map_err(|e| fail(e.to_string()))?;
        session.set_tcp_stream(tcp);
        session.set_timeout(millis(connect_timeout));
        session
            .handshake()
            .map_err(|e| fail(format!("handshake: {e}")))?;

        self.check_host_key(target, &session).map_err(&fail)?;

        session
            .userauth_pubkey_file(&target.username, None, &target.private_key_path, None)
            .map_err(|e| fail(format!("authentication: {e}")))?;
        if !session.authenticated() {
            return Err(fail("authentication rejected".to_string()));
        }

        Ok(Box::new(SshSession {
            session,
            transfer_timeout: self.transfer_timeout,
        }))
    }
}

struct SshSession {
    session: Session,
    transfer_timeout: Duration,
}

impl RemoteSession for SshSession {
    fn exec(&mut self, command: &str, timeout: Duration) -> Result<ExecOutput, TransportError> {
        self.session.set_timeout(millis(timeout));
        let ssh_err = |e: ssh2::Error| io_error(e.into(), timeout);
        let mut channel = self.session.channel_session().map_err(ssh_err)?;
        channel.exec(command).map_err(ssh_err)?;

        // Both streams share one channel window, so they are read together.
        self.session.set_blocking(false);
        let drained = drain_streams(&mut channel, Instant::now() + timeout, timeout);
        self.session.set_blocking(true);
        let (stdout, stderr) = drained?;

        channel.wait_close().map_err(ssh_err)?;
        let exit_code = channel.exit_status().unwrap_or(-1);

        Ok(ExecOutput {
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
            exit_code,
        })
    }

    fn put_bytes(
        &mut self,
        data: &[u8],
        remote_path: &str,
        mode: Option<u32>,
    ) -> Result<(), TransportError> {
        let fail = |reason: String| TransportError::Write {
            path: remote_path.to_string(),
            reason,
        };
        self.session.set_timeout(millis(self.transfer_timeout));
        let sftp = self.session.sftp().map_err(|e| fail(e.to_string()))?;

        ensure_parent_dirs(&sftp, Path::new(remote_path)).map_err(&fail)?;

        let mut file = sftp
            .open_mode(
                Path::new(remote_path),
                OpenFlags::WRITE | OpenFlags::CREATE | OpenFlags::TRUNCATE,
                0o644,
                OpenType::File,
            )
            .map_err(|e| fail(e.to_string()))?;
        file.write_all(data).map_err(|e| fail(e.to_string()))?;
        drop(file);

        if let Some(perm) = mode {
            let stat = FileStat {
                size: None,
                uid: None,
                gid: None,
                perm: Some(perm),
                atime: None,
                mtime: None,
            };
            sftp.setstat(Path::new(remote_path), stat)
                .map_err(|e| fail(format!("chmod: {e}")))?;
        }
        Ok(())
    }

    fn get_bytes(&mut self, remote_path: &str) -> Result<Vec<u8>, TransportError> {
        let fail = |reason: String| TransportError::Read {
            path: remote_path.to_string(),
            reason,
        };
        self.session.set_timeout(millis(self.transfer_timeout));
        let sftp = self.session.sftp().map_err(|e| fail(e.to_string()))?;
        let mut file = sftp
            .open(Path::new(remote_path))
            .map_err(|e| fail(e.to_string()))?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf).map_err(|e| fail(e.to_string()))?;
        Ok(buf)
    }
}

/// The two output streams of a running remote command.
///
/// Reads may fail with [`std::io::ErrorKind::WouldBlock`] when a stream has
/// nothing buffered yet.
trait ExecStreams {
    fn read_stdout(&mut self, buf: &mut [u8]) -> std::io::Result<usize>;
    fn read_stderr(&mut self, buf: &mut [u8]) -> std::io::Result<usize>;
    /// The remote side has closed its output.
    fn eof(&self) -> bool;
}

impl ExecStreams for ssh2::Channel {
    fn read_stdout(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.read(buf)
    }

    fn read_stderr(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.stderr().read(buf)
    }

    fn eof(&self) -> bool {
        ssh2::Channel::eof(self)
    }
}

/// Read stdout and stderr in turn until the remote closes its output and
/// both are empty. Neither stream can starve the other.
fn drain_streams<S: ExecStreams>(
    streams: &mut S,
    deadline: Instant,
    timeout: Duration,
) -> Result<(Vec<u8>, Vec<u8>), TransportError> {
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let mut buf = [0u8; 8192];

    loop {
        let mut progressed = false;
        match streams.read_stdout(&mut buf) {
            Ok(0) => {}
            Ok(n) => {
                stdout.extend_from_slice(&buf[..n]);
                progressed = true;
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
            Err(e) => return Err(io_error(e, timeout)),
        }
        match streams.read_stderr(&mut buf) {
            Ok(0) => {}
            Ok(n) => {
                stderr.extend_from_slice(&buf[..n]);
                progressed = true;
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
            Err(e) => return Err(io_error(e, timeout)),
        }

        if !progressed {
            if streams.eof() {
                return Ok((stdout, stderr));
            }
            if Instant::now() >= deadline {
                return Err(TransportError::Timeout(timeout));
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }
}

impl Drop for SshSession {
    fn drop(&mut self) {
        let _ = self.session.disconnect(None, "session closed", None);
    }
}

/// Create every missing ancestor of `path`, tolerating concurrent creators.
fn ensure_parent_dirs(sftp: &ssh2::Sftp, path: &Path) -> Result<(), String> {
    let Some(parent) = path.parent() else {
        return Ok(());
    };
    let mut current = PathBuf::new();
    for part in parent.components() {
        current.push(part);
        if current.as_os_str().is_empty() || sftp.stat(&current).is_ok() {
            continue;
        }
        if let Err(e) = sftp.mkdir(&current, 0o755) {
            // Someone else may have created it in the meantime.
            if sftp.stat(&current).is_err() {
                return Err(format!("mkdir {}: {e}", current.display()));
            }
        }
    }
    Ok(())
}

fn millis(d: Duration) -> u32 {
    u32::try_from(d.as_millis()).unwrap_or(u32::MAX)
}

fn io_error(err: std::io::Error, timeout: Duration) -> TransportError {
    match err.kind() {
        std::io::ErrorKind::TimedOut => TransportError::Timeout(timeout),
        _ => TransportError::Remote(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::VecDeque;

    fn env(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_compose_plain_command_untouched() {
        let line = compose_command(&ExecRequest::new("ls -la | grep x")).unwrap();
        assert_eq!(line, "ls -la | grep x");
    }

    #[test]
    fn test_compose_with_cwd() {
        let line = compose_command(&ExecRequest::new("make").cwd("/srv/app")).unwrap();
        assert_eq!(line, "cd /srv/app && make");
    }

    #[test]
    fn test_compose_with_env_and_cwd() {
        let req = ExecRequest::new("./run")
            .cwd("/srv")
            .env(env(&[("B", "two"), ("A", "one")]));
        let line = compose_command(&req).unwrap();
        assert_eq!(line, "export A=\"one\" B=\"two\"; cd /srv && ./run");
    }

    #[test]
    fn test_compose_escapes_env_values() {
        let req = ExecRequest::new("true").env(env(&[("MSG", r#"say "hi" $HOME `id` \n"#)]));
        let line = compose_command(&req).unwrap();
        assert_eq!(
            line,
            r#"export MSG="say \"hi\" \$HOME \`id\` \\n"; true"#
        );
    }

    #[test]
    fn test_compose_rejects_bad_env_key() {
        for key in ["1ABC", "A-B", "A B", "", "X;rm"] {
            let req = ExecRequest::new("true").env(env(&[(key, "v")]));
            assert!(
                matches!(compose_command(&req), Err(TransportError::InvalidRequest(_))),
                "key {key:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_shell_identifier() {
        assert!(is_shell_identifier("_PRIVATE"));
        assert!(is_shell_identifier("PATH2"));
        assert!(!is_shell_identifier("2PATH"));
    }

    #[test]
    fn test_millis_saturates() {
        assert_eq!(millis(Duration::from_secs(2)), 2000);
        assert_eq!(millis(Duration::from_secs(u64::MAX / 1000)), u32::MAX);
    }

    #[test]
    fn test_io_timeout_maps_to_timeout() {
        let bound = Duration::from_secs(3);
        let err = io_error(std::io::Error::new(std::io::ErrorKind::TimedOut, "slow"), bound);
        assert!(matches!(err, TransportError::Timeout(d) if d == bound));
        let err = io_error(std::io::Error::other("broken pipe"), bound);
        assert!(matches!(err, TransportError::Remote(_)));
    }

    /// Scripted streams. `None` is a read that would block.
    struct ScriptedStreams {
        stdout: VecDeque<Option<&'static [u8]>>,
        stderr: VecDeque<Option<&'static [u8]>>,
        stdout_reads: usize,
    }

    impl ScriptedStreams {
        fn next(
            queue: &mut VecDeque<Option<&'static [u8]>>,
            buf: &mut [u8],
        ) -> std::io::Result<usize> {
            match queue.pop_front() {
                None => Ok(0),
                Some(None) => Err(std::io::ErrorKind::WouldBlock.into()),
                Some(Some(chunk)) => {
                    buf[..chunk.len()].copy_from_slice(chunk);
                    Ok(chunk.len())
                }
            }
        }
    }

    impl ExecStreams for ScriptedStreams {
        fn read_stdout(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            self.stdout_reads += 1;
            // Stdout stays blocked while stderr output is unread.
            if !self.stderr.is_empty() && self.stdout.front() != Some(&None) {
                return Err(std::io::ErrorKind::WouldBlock.into());
            }
            Self::next(&mut self.stdout, buf)
        }

        fn read_stderr(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            Self::next(&mut self.stderr, buf)
        }

        fn eof(&self) -> bool {
            self.stdout.is_empty() && self.stderr.is_empty()
        }
    }

    fn scripted(
        stdout: &[Option<&'static [u8]>],
        stderr: &[Option<&'static [u8]>],
    ) -> ScriptedStreams {
        ScriptedStreams {
            stdout: stdout.iter().copied().collect(),
            stderr: stderr.iter().copied().collect(),
            stdout_reads: 0,
        }
    }

    #[test]
    fn test_drain_reads_stderr_while_stdout_is_blocked() {
        let mut streams = scripted(
            &[Some(b"done\n")],
            &[Some(b"warn 1\n"), None, Some(b"warn 2\n"), Some(b"warn 3\n")],
        );
        let deadline = Instant::now() + Duration::from_secs(5);
        let (stdout, stderr) =
            drain_streams(&mut streams, deadline, Duration::from_secs(5)).unwrap();
        assert_eq!(stdout, b"done\n");
        assert_eq!(stderr, b"warn 1\nwarn 2\nwarn 3\n");
        assert!(streams.stdout_reads > 1);
    }

    #[test]
    fn test_drain_waits_out_would_block_until_eof() {
        let mut streams = scripted(&[None, Some(b"a"), None, Some(b"b")], &[]);
        let deadline = Instant::now() + Duration::from_secs(5);
        let (stdout, stderr) =
            drain_streams(&mut streams, deadline, Duration::from_secs(5)).unwrap();
        assert_eq!(stdout, b"ab");
        assert!(stderr.is_empty());
    }

    #[test]
    fn test_drain_times_out_on_silent_channel() {
        let mut streams = scripted(&[None; 64], &[]);
        let bound = Duration::from_millis(1);
        let err = drain_streams(&mut streams, Instant::now(), bound).unwrap_err();
        assert!(matches!(err, TransportError::Timeout(d) if d == bound));
    }

    struct BrokenStreams;

    impl ExecStreams for BrokenStreams {
        fn read_stdout(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
            Ok(0)
        }

        fn read_stderr(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
            Err(std::io::Error::other("channel reset"))
        }

        fn eof(&self) -> bool {
            false
        }
    }

    #[test]
    fn test_drain_surfaces_read_errors() {
        let deadline = Instant::now() + Duration::from_secs(5);
        let err = drain_streams(&mut BrokenStreams, deadline, Duration::from_secs(5)).unwrap_err();
        assert!(matches!(err, TransportError::Remote(r) if r.contains("channel reset")));
    }

    struct RefusingConnector;

    impl Connector for RefusingConnector {
        fn connect(
            &self,
            target: &TargetConfig,
        ) -> Result<Box<dyn RemoteSession>, TransportError> {
            Err(TransportError::Connect {
                target: target.name.clone(),
                reason: "refused".into(),
            })
        }
    }

    fn target() -> TargetConfig {
        TargetConfig {
            name: "t".into(),
            host: "localhost".into(),
            port: 22,
            username: "u".into(),
            private_key_path: PathBuf::from("/k"),
            known_hosts_path: None,
            connect_timeout_secs: 1,
        }
    }

    #[tokio::test]
    async fn test_connect_failure_surfaces() {
        let transport = Transport::new(Arc::new(RefusingConnector), Duration::from_secs(1));
        let err = transport
            .exec(&target(), ExecRequest::new("true"))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Connect { .. }));
    }

    #[tokio::test]
    async fn test_invalid_env_rejected_before_connect() {
        let transport = Transport::new(Arc::new(RefusingConnector), Duration::from_secs(1));
        let req = ExecRequest::new("true").env(env(&[("BAD-KEY", "v")]));
        let err = transport.exec(&target(), req).await.unwrap_err();
        assert!(matches!(err, TransportError::InvalidRequest(_)));
    }
}
