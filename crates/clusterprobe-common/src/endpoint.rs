//! Waiting for an external endpoint to accept connections
//!
//! Each evaluation makes a real connection attempt. The first connection that
//! succeeds is handed back to the caller as-is, so "reachable" and "connected"
//! are the same event.

use std::future::Future;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::poll::{wait_for_value, PollSpec, Readiness, WaitError};
use crate::ssh::{SshCredentials, SshSession};
use crate::Error;

/// Default SSH port
pub const SSH_PORT: u16 = 22;
/// Per-attempt connect timeout for [`SshEndpoint`]
pub const DEFAULT_SSH_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Identification strings longer than this are rejected (RFC 4253 §4.2)
const MAX_BANNER_LEN: usize = 255;

/// Poll until `connect` succeeds and return the connection.
///
/// Poll engine semantics apply unchanged. `Ok(conn)` ends the wait with that
/// connection, `Err` is a transient failure and the next tick tries again.
pub async fn wait_for_endpoint<C, F, Fut>(
    target: &str,
    spec: &PollSpec,
    cancel: &CancellationToken,
    mut connect: F,
) -> Result<C, WaitError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<C, Error>>,
{
    wait_for_value(target, spec, cancel, || {
        let attempt = connect();
        async move { attempt.await.map(Readiness::Ready) }
    })
    .await
}

/// A live SSH transport connection, after the server identified itself
#[derive(Debug)]
pub struct SshConnection {
    /// The connected stream, positioned after the identification line
    pub stream: BufReader<TcpStream>,
    /// Server identification line without the trailing CR LF
    pub banner: String,
}

/// An SSH server reachable at `host:port`
#[derive(Clone, Debug)]
pub struct SshEndpoint {
    host: String,
    port: u16,
    connect_timeout: Duration,
}

impl SshEndpoint {
    /// Endpoint on the default SSH port
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: SSH_PORT,
            connect_timeout: DEFAULT_SSH_CONNECT_TIMEOUT,
        }
    }

    /// Use a non-default port
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Bound each connection attempt, including reading the banner
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// "host:port"
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// One connection attempt: connect, then read the identification line.
    ///
    /// Servers may send other lines before the identification string; those
    /// are skipped.
    pub async fn connect(&self) -> Result<SshConnection, Error> {
        let address = self.address();
        tokio::time::timeout(self.connect_timeout, self.handshake(&address))
            .await
            .map_err(|_| {
                Error::query(
                    format!("ssh {}", address),
                    format!("no ssh banner within {:?}", self.connect_timeout),
                )
            })?
    }

    async fn handshake(&self, address: &str) -> Result<SshConnection, Error> {
        let stream = TcpStream::connect(address)
            .await
            .map_err(|e| Error::io(format!("connect to {}", address), e))?;
        debug!(address = %address, "tcp connected");

        let mut stream = BufReader::new(stream);
        let mut line = Vec::with_capacity(MAX_BANNER_LEN + 1);
        loop {
            line.clear();
            // one byte past the limit is enough to know a line is too long
            (&mut stream)
                .take(MAX_BANNER_LEN as u64 + 1)
                .read_until(b'\n', &mut line)
                .await
                .map_err(|e| Error::io(format!("read banner from {}", address), e))?;
            if line.len() > MAX_BANNER_LEN {
                return Err(Error::query(
                    format!("ssh {}", address),
                    "identification line too long",
                ));
            }
            if !line.ends_with(b"\n") {
                return Err(Error::query(
                    format!("ssh {}", address),
                    "connection closed before identification",
                ));
            }
            if line.starts_with(b"SSH-") {
                let banner = String::from_utf8_lossy(&line)
                    .trim_end_matches(['\r', '\n'])
                    .to_string();
                return Ok(SshConnection { stream, banner });
            }
        }
    }

    /// Wait until the server answers with an SSH identification line
    pub async fn wait(
        &self,
        spec: &PollSpec,
        cancel: &CancellationToken,
    ) -> Result<SshConnection, WaitError> {
        let target = format!("ssh {}", self.address());
        let conn = wait_for_endpoint(&target, spec, cancel, || self.connect()).await?;
        info!(address = %self.address(), banner = %conn.banner, "ssh reachable");
        Ok(conn)
    }

    /// One login attempt with `credentials`
    pub async fn session(&self, credentials: &SshCredentials) -> Result<SshSession, Error> {
        SshSession::connect(&self.address(), credentials, self.connect_timeout).await
    }

    /// Wait until `credentials` log in and return the authenticated session.
    ///
    /// Bad credentials (missing key file, empty user) fail before the first
    /// attempt; a refused login is retried like any other connect failure,
    /// since cloud-init may not have installed the key yet.
    pub async fn wait_session(
        &self,
        credentials: &SshCredentials,
        spec: &PollSpec,
        cancel: &CancellationToken,
    ) -> Result<SshSession, Error> {
        credentials.validate()?;
        let target = format!("ssh {}@{}", credentials.user, self.address());
        let session =
            wait_for_endpoint(&target, spec, cancel, || self.session(credentials)).await?;
        info!(address = %self.address(), user = %credentials.user, "ssh login succeeded");
        Ok(session)
    }
}
