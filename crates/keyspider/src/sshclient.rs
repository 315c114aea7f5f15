//! Remote command transport over the system `ssh` binary.
//!
//! Every remote interaction of the scanner and watcher flows through here:
//! one-shot commands with captured stdout, and long-lived streams consumed
//! line by line. Children are spawned `kill_on_drop`, so cancelling a
//! pending stream future also terminates the remote process.

use crate::config::SshConfig;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tokio::process::{Child, ChildStdout, Command};

#[derive(Debug, thiserror::Error)]
pub enum SshError {
    #[error("failed to spawn ssh")]
    Spawn(#[source] std::io::Error),
    #[error("ssh {host} exited with {status}: {stderr}")]
    Exit {
        host: String,
        status: ExitStatus,
        stderr: String,
    },
    #[error("ssh {host}: i/o failure")]
    Io {
        host: String,
        #[source]
        source: std::io::Error,
    },
}

/// How a streamed command ended: the remote process completed on its own,
/// or the per-line handler asked for termination.
#[derive(Debug, PartialEq, Eq)]
pub enum StreamEnd {
    Completed(ExitStatus),
    Stopped,
}

#[derive(Debug, Clone)]
pub struct Client {
    program: String,
    user: String,
    connect_timeout: Duration,
}

impl Client {
    pub fn new(ssh: &SshConfig) -> Self {
        Self {
            program: "ssh".to_string(),
            user: ssh.user.clone(),
            connect_timeout: ssh.connect_timeout(),
        }
    }

    #[cfg(test)]
    fn with_program(mut self, program: &str) -> Self {
        self.program = program.to_string();
        self
    }

    fn user_host(&self, host: &str) -> String {
        if !self.user.is_empty() && !host.contains('@') {
            format!("{}@{}", self.user, host)
        } else {
            host.to_string()
        }
    }

    fn command(&self, user_host: &str, remote_cmd: &str) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg("-o")
            .arg("BatchMode=yes")
            .arg("-o")
            .arg(format!("ConnectTimeout={}", self.connect_timeout.as_secs()))
            .arg(user_host)
            .arg("--")
            .arg(remote_cmd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    /// Lightweight connectivity probe, bounded by the connect timeout.
    pub async fn can_connect(&self, host: &str) -> bool {
        matches!(
            tokio::time::timeout(self.connect_timeout, self.run(host, "true")).await,
            Ok(Ok(_))
        )
    }

    /// Execute a remote command and return its full stdout. A non-zero exit
    /// surfaces as an error carrying a stderr excerpt.
    pub async fn run(&self, host: &str, remote_cmd: &str) -> Result<String, SshError> {
        let user_host = self.user_host(host);
        tracing::debug!(host = %user_host, cmd = remote_cmd, "ssh run");

        let output = self
            .command(&user_host, remote_cmd)
            .output()
            .await
            .map_err(SshError::Spawn)?;

        if !output.status.success() {
            return Err(SshError::Exit {
                host: user_host,
                status: output.status,
                stderr: stderr_excerpt(&output.stderr),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Start a remote command whose stdout is consumed line by line.
    pub async fn stream_lines(
        &self,
        host: &str,
        remote_cmd: &str,
    ) -> Result<LineStream, SshError> {
        let user_host = self.user_host(host);
        tracing::debug!(host = %user_host, cmd = remote_cmd, "ssh stream");

        let mut child = self
            .command(&user_host, remote_cmd)
            // Long-lived streams never read stderr; leaving it piped but
            // unconsumed can wedge the child once the pipe buffer fills.
            .stderr(Stdio::null())
            .spawn()
            .map_err(SshError::Spawn)?;
        let stdout = child.stdout.take().expect("child stdout is piped");

        Ok(LineStream {
            host: user_host,
            child,
            lines: BufReader::new(stdout).lines(),
        })
    }

    /// Run a remote command, delivering each stdout line to `on_line`.
    /// Returning `false` from the handler terminates the remote process.
    pub async fn stream<F>(
        &self,
        host: &str,
        remote_cmd: &str,
        mut on_line: F,
    ) -> Result<StreamEnd, SshError>
    where
        F: FnMut(&str) -> bool,
    {
        let mut stream = self.stream_lines(host, remote_cmd).await?;
        while let Some(line) = stream.next_line().await? {
            if !on_line(&line) {
                stream.stop().await?;
                return Ok(StreamEnd::Stopped);
            }
        }
        Ok(StreamEnd::Completed(stream.finish().await?))
    }
}

/// A live remote stream. The child is killed if the stream is dropped.
pub struct LineStream {
    host: String,
    child: Child,
    lines: Lines<BufReader<ChildStdout>>,
}

impl LineStream {
    pub async fn next_line(&mut self) -> Result<Option<String>, SshError> {
        self.lines.next_line().await.map_err(|source| SshError::Io {
            host: self.host.clone(),
            source,
        })
    }

    /// Kill the remote process and reap it.
    pub async fn stop(mut self) -> Result<(), SshError> {
        let _ = self.child.start_kill();
        self.child
            .wait()
            .await
            .map_err(|source| SshError::Io {
                host: self.host.clone(),
                source,
            })
            .map(|_| ())
    }

    /// Wait for an already-ended stream, returning the exit status.
    pub async fn finish(mut self) -> Result<ExitStatus, SshError> {
        self.child.wait().await.map_err(|source| SshError::Io {
            host: self.host,
            source,
        })
    }
}

fn stderr_excerpt(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    text.trim().chars().take(512).collect()
}

#[cfg(test)]
mod test {
    use super::{Client, StreamEnd};
    use crate::config::SshConfig;
    use std::os::unix::fs::PermissionsExt;

    // A stand-in for the ssh binary: skips the option arguments and runs the
    // remote command locally through /bin/sh.
    fn fake_ssh() -> (tempfile::TempDir, Client) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fake-ssh");
        std::fs::write(
            &path,
            "#!/bin/sh\nwhile [ \"$1\" != \"--\" ]; do shift; done\nshift\nexec /bin/sh -c \"$1\"\n",
        )
        .unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();

        let client =
            Client::new(&SshConfig::default()).with_program(path.to_str().unwrap());
        (dir, client)
    }

    #[test]
    fn user_host_prefixes_configured_user() {
        let client = Client::new(&SshConfig::default());
        assert_eq!(client.user_host("web1.example.com"), "root@web1.example.com");
        assert_eq!(client.user_host("scan@web1.example.com"), "scan@web1.example.com");
    }

    #[test]
    fn command_shape_matches_ssh_invocation() {
        let client = Client::new(&SshConfig {
            user: "scanner".to_string(),
            connect_timeout_seconds: 7,
        });
        let cmd = client.command("scanner@host", "uname -s");
        let args: Vec<String> = cmd
            .as_std()
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            args,
            vec![
                "-o",
                "BatchMode=yes",
                "-o",
                "ConnectTimeout=7",
                "scanner@host",
                "--",
                "uname -s",
            ]
        );
    }

    #[tokio::test]
    async fn run_captures_stdout() {
        let (_dir, client) = fake_ssh();
        let out = client.run("anyhost", "echo hello").await.unwrap();
        assert_eq!(out, "hello\n");
    }

    #[tokio::test]
    async fn run_failure_carries_stderr_excerpt() {
        let (_dir, client) = fake_ssh();
        let err = client
            .run("anyhost", "echo broken pipe to remote >&2; exit 1")
            .await
            .unwrap_err();
        let rendered = err.to_string();
        assert!(rendered.contains("broken pipe to remote"), "{rendered}");
    }

    #[tokio::test]
    async fn stream_delivers_lines_in_order() {
        let (_dir, client) = fake_ssh();
        let mut seen = Vec::new();
        let end = client
            .stream("anyhost", "printf 'a\\nb\\nc\\n'", |line| {
                seen.push(line.to_string());
                true
            })
            .await
            .unwrap();
        assert_eq!(seen, vec!["a", "b", "c"]);
        assert!(matches!(end, StreamEnd::Completed(status) if status.success()));
    }

    #[tokio::test]
    async fn stream_handler_false_kills_the_child() {
        let (_dir, client) = fake_ssh();
        let mut count = 0;
        let end = client
            .stream("anyhost", "yes tick", |_line| {
                count += 1;
                count < 3
            })
            .await
            .unwrap();
        assert_eq!(count, 3);
        assert_eq!(end, StreamEnd::Stopped);
    }

    #[tokio::test]
    async fn can_connect_reflects_exit_status() {
        let (_dir, client) = fake_ssh();
        assert!(client.can_connect("anyhost").await);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fake-ssh-down");
        std::fs::write(&path, "#!/bin/sh\nexit 255\n").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        let down = Client::new(&SshConfig::default()).with_program(path.to_str().unwrap());
        assert!(!down.can_connect("anyhost").await);
    }
}
