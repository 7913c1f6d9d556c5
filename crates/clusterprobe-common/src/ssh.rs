//! Authenticated SSH sessions into guests
//!
//! libssh2 is blocking, so every operation runs on the blocking pool and the
//! session is cloned into it. One [`SshSession`] is one authenticated
//! transport; each command opens its own channel.

use std::fmt;
use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, info};

use crate::Error;

/// Login user and key for a guest
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SshCredentials {
    /// Remote user
    pub user: String,
    /// Path to the private key
    pub private_key: PathBuf,
    /// Passphrase for an encrypted key
    pub passphrase: Option<String>,
}

impl SshCredentials {
    /// Credentials for an unencrypted key
    pub fn new(user: impl Into<String>, private_key: impl Into<PathBuf>) -> Self {
        Self {
            user: user.into(),
            private_key: private_key.into(),
            passphrase: None,
        }
    }

    /// Fail early on inputs no connection attempt can fix
    pub fn validate(&self) -> Result<(), Error> {
        if self.user.is_empty() {
            return Err(Error::validation_for_field("ssh_user", "ssh user must not be empty"));
        }
        if !self.private_key.is_file() {
            return Err(Error::validation_for_field(
                "ssh_key",
                format!("private key {} is not a file", self.private_key.display()),
            ));
        }
        Ok(())
    }
}

/// Result of a remote command
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit status reported by the remote side
    pub exit_status: i32,
    /// Captured stdout
    pub stdout: String,
    /// Captured stderr
    pub stderr: String,
}

impl CommandOutput {
    /// Exit status zero
    pub fn success(&self) -> bool {
        self.exit_status == 0
    }

    /// stdout followed by stderr
    pub fn combined(&self) -> String {
        format!("{}{}", self.stdout, self.stderr)
    }
}

/// An authenticated SSH session
#[derive(Clone)]
pub struct SshSession {
    session: ssh2::Session,
    address: String,
}

impl fmt::Debug for SshSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SshSession")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

impl SshSession {
    /// Connect to `address`, complete the handshake and log in with a key.
    ///
    /// `timeout` bounds the TCP connect and every later blocking libssh2 call.
    pub async fn connect(
        address: &str,
        credentials: &SshCredentials,
        timeout: Duration,
    ) -> Result<Self, Error> {
        credentials.validate()?;
        let address = address.to_string();
        let credentials = credentials.clone();
        blocking("ssh connect", move || {
            Self::connect_blocking(address, &credentials, timeout)
        })
        .await
    }

    fn connect_blocking(
        address: String,
        credentials: &SshCredentials,
        timeout: Duration,
    ) -> Result<Self, Error> {
        let context = format!("ssh {}", address);
        let socket_addr = address
            .to_socket_addrs()
            .map_err(|e| Error::io(format!("resolve {}", address), e))?
            .next()
            .ok_or_else(|| Error::query(&context, "address resolved to nothing"))?;

        let tcp = TcpStream::connect_timeout(&socket_addr, timeout)
            .map_err(|e| Error::io(format!("connect to {}", address), e))?;
        debug!(address = %address, "tcp connected");

        let mut session = ssh2::Session::new().map_err(|e| Error::ssh(&context, e))?;
        session.set_timeout(timeout_millis(timeout));
        session.set_tcp_stream(tcp);
        session
            .handshake()
            .map_err(|e| Error::ssh(format!("handshake with {}", address), e))?;
        session
            .userauth_pubkey_file(
                &credentials.user,
                None,
                &credentials.private_key,
                credentials.passphrase.as_deref(),
            )
            .map_err(|e| Error::ssh(format!("login as {} on {}", credentials.user, address), e))?;
        if !session.authenticated() {
            return Err(Error::query(
                &context,
                format!("server did not accept key for {}", credentials.user),
            ));
        }

        info!(address = %address, user = %credentials.user, "ssh session established");
        Ok(Self { session, address })
    }

    /// "host:port" of the remote side
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Run `command` through the remote shell and capture its output
    pub async fn run_command(&self, command: &str) -> Result<CommandOutput, Error> {
        let session = self.session.clone();
        let command = command.to_string();
        let context = format!("ssh {}: {}", self.address, command);
        blocking("ssh exec", move || exec(&session, &command, &context)).await
    }

    /// Contents of a remote file. A missing or unreadable file is an error.
    pub async fn read_file(&self, path: &str) -> Result<String, Error> {
        let output = self.run_command(&format!("cat -- {}", shell_quote(path))).await?;
        if !output.success() {
            return Err(Error::query(
                format!("file {} on {}", path, self.address),
                format!(
                    "cat exited with {}: {}",
                    output.exit_status,
                    output.stderr.trim()
                ),
            ));
        }
        Ok(output.stdout)
    }

    /// Write `contents` to `remote_path` over SCP with the given file mode
    pub async fn copy_file(
        &self,
        contents: Vec<u8>,
        remote_path: &str,
        mode: i32,
    ) -> Result<(), Error> {
        let session = self.session.clone();
        let remote = remote_path.to_string();
        let context = format!("scp to {}:{}", self.address, remote_path);
        blocking("ssh scp", move || {
            let mut channel = session
                .scp_send(Path::new(&remote), mode, contents.len() as u64, None)
                .map_err(|e| Error::ssh(&context, e))?;
            channel
                .write_all(&contents)
                .map_err(|e| Error::io(&context, e))?;
            channel.send_eof().map_err(|e| Error::ssh(&context, e))?;
            channel.wait_eof().map_err(|e| Error::ssh(&context, e))?;
            channel.close().map_err(|e| Error::ssh(&context, e))?;
            channel.wait_close().map_err(|e| Error::ssh(&context, e))?;
            debug!(path = %remote, bytes = contents.len(), "copied file");
            Ok(())
        })
        .await
    }
}

fn exec(session: &ssh2::Session, command: &str, context: &str) -> Result<CommandOutput, Error> {
    let mut channel = session
        .channel_session()
        .map_err(|e| Error::ssh(context, e))?;
    channel.exec(command).map_err(|e| Error::ssh(context, e))?;

    let mut stdout = String::new();
    channel
        .read_to_string(&mut stdout)
        .map_err(|e| Error::io(context, e))?;
    let mut stderr = String::new();
    channel
        .stderr()
        .read_to_string(&mut stderr)
        .map_err(|e| Error::io(context, e))?;

    channel.wait_close().map_err(|e| Error::ssh(context, e))?;
    let exit_status = channel.exit_status().map_err(|e| Error::ssh(context, e))?;
    debug!(command = %command, exit_status, "remote command finished");

    Ok(CommandOutput {
        exit_status,
        stdout,
        stderr,
    })
}

async fn blocking<T, F>(what: &'static str, f: F) -> Result<T, Error>
where
    F: FnOnce() -> Result<T, Error> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| Error::internal_with_context(what, e.to_string()))?
}

/// libssh2 takes milliseconds as u32, where 0 means no timeout
fn timeout_millis(timeout: Duration) -> u32 {
    u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX).max(1)
}

/// Single-quote `s` for a POSIX shell
pub fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}
