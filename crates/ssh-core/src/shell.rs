//! Interactive shell channel.
//!
//! A russh session channel multiplexes stdout (`Data`) and stderr
//! (`ExtendedData`, ext 1) over one wire channel. [`spawn_shell`] demuxes
//! them into two independent byte streams and accepts input and window
//! resizes, so the bridge can relay each direction without the streams
//! blocking one another.
//!
//! The channel-owning task is the single point that touches the russh
//! channel; everything else talks to it through queues and observes one
//! shared cancellation token, so a close from either side unblocks all
//! cooperating tasks.

use russh::client::Msg;
use russh::{Channel, ChannelMsg};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{SshCoreError, SshResult};

const STREAM_BUFFER: usize = 64;
const STDERR_EXT: u32 = 1;

/// Consumer side of a shell: input/resize senders plus the demuxed
/// stdout and stderr streams.
pub struct ShellChannel {
    input_tx: mpsc::Sender<Vec<u8>>,
    resize_tx: mpsc::Sender<(u16, u16)>,
    stdout_rx: mpsc::Receiver<Vec<u8>>,
    stderr_rx: mpsc::Receiver<Vec<u8>>,
    closed: CancellationToken,
}

/// Driver side of a shell, held by the task that owns the underlying
/// channel (or by a test double standing in for one).
pub struct ShellBackend {
    pub input_rx: mpsc::Receiver<Vec<u8>>,
    pub resize_rx: mpsc::Receiver<(u16, u16)>,
    pub stdout_tx: mpsc::Sender<Vec<u8>>,
    pub stderr_tx: mpsc::Sender<Vec<u8>>,
    pub closed: CancellationToken,
}

/// Write/resize handle left with the bridge's receive loop after the
/// output streams have been split off.
pub struct ShellInput {
    input_tx: mpsc::Sender<Vec<u8>>,
    resize_tx: mpsc::Sender<(u16, u16)>,
}

impl ShellChannel {
    /// Split into the input handle, the stdout stream, the stderr stream,
    /// and the shared close signal.
    pub fn into_parts(
        self,
    ) -> (
        ShellInput,
        mpsc::Receiver<Vec<u8>>,
        mpsc::Receiver<Vec<u8>>,
        CancellationToken,
    ) {
        (
            ShellInput {
                input_tx: self.input_tx,
                resize_tx: self.resize_tx,
            },
            self.stdout_rx,
            self.stderr_rx,
            self.closed,
        )
    }
}

impl ShellInput {
    /// Queue bytes for the remote shell's stdin.
    pub async fn write(&self, bytes: Vec<u8>) -> SshResult<()> {
        self.input_tx
            .send(bytes)
            .await
            .map_err(|_| SshCoreError::Other("shell channel closed".into()))
    }

    /// Advisory window-size update; never blocks on the shell itself.
    pub fn resize(&self, rows: u16, cols: u16) {
        let _ = self.resize_tx.try_send((rows, cols));
    }
}

/// Create a connected consumer/driver pair without a real channel behind
/// it. The real connector drives the backend from a russh channel; tests
/// drive it directly.
pub fn shell_pipe() -> (ShellChannel, ShellBackend) {
    let (input_tx, input_rx) = mpsc::channel(STREAM_BUFFER);
    let (resize_tx, resize_rx) = mpsc::channel(8);
    let (stdout_tx, stdout_rx) = mpsc::channel(STREAM_BUFFER);
    let (stderr_tx, stderr_rx) = mpsc::channel(STREAM_BUFFER);
    let closed = CancellationToken::new();
    (
        ShellChannel {
            input_tx,
            resize_tx,
            stdout_rx,
            stderr_rx,
            closed: closed.clone(),
        },
        ShellBackend {
            input_rx,
            resize_rx,
            stdout_tx,
            stderr_tx,
            closed,
        },
    )
}

/// Spawn the channel-owning task for an opened shell and return the
/// consumer side.
pub fn spawn_shell(channel: Channel<Msg>) -> ShellChannel {
    let (shell, backend) = shell_pipe();
    tokio::spawn(drive_channel(channel, backend));
    shell
}

async fn drive_channel(mut channel: Channel<Msg>, mut backend: ShellBackend) {
    loop {
        tokio::select! {
            _ = backend.closed.cancelled() => {
                let _ = channel.eof().await;
                let _ = channel.close().await;
                break;
            }
            msg = channel.wait() => {
                match msg {
                    Some(ChannelMsg::Data { data }) => {
                        if backend.stdout_tx.send(data.to_vec()).await.is_err() {
                            break;
                        }
                    }
                    Some(ChannelMsg::ExtendedData { data, ext }) if ext == STDERR_EXT => {
                        if backend.stderr_tx.send(data.to_vec()).await.is_err() {
                            break;
                        }
                    }
                    Some(ChannelMsg::ExitStatus { exit_status }) => {
                        debug!(exit_status, "remote shell exited");
                    }
                    Some(ChannelMsg::Eof) | Some(ChannelMsg::Close) | None => {
                        break;
                    }
                    _ => {}
                }
            }
            maybe_input = backend.input_rx.recv() => {
                match maybe_input {
                    Some(bytes) if !bytes.is_empty() => {
                        let mut cursor = std::io::Cursor::new(bytes);
                        if channel.data(&mut cursor).await.is_err() {
                            break;
                        }
                    }
                    Some(_) => {}
                    None => {
                        let _ = channel.eof().await;
                        let _ = channel.close().await;
                        break;
                    }
                }
            }
            maybe_size = backend.resize_rx.recv() => {
                match maybe_size {
                    Some((rows, cols)) => {
                        let cols = u32::from(cols.max(1));
                        let rows = u32::from(rows.max(1));
                        if channel.window_change(cols, rows, 0, 0).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
        }
    }
    // Wake readers and any peer task still waiting on this shell.
    backend.closed.cancel();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pipe_carries_input_and_outputs_independently() {
        let (shell, mut backend) = shell_pipe();
        let (input, mut stdout_rx, mut stderr_rx, _closed) = shell.into_parts();

        input.write(b"whoami\n".to_vec()).await.unwrap();
        assert_eq!(backend.input_rx.recv().await.unwrap(), b"whoami\n");

        backend.stdout_tx.send(b"root\n".to_vec()).await.unwrap();
        backend.stderr_tx.send(b"warning\n".to_vec()).await.unwrap();
        assert_eq!(stdout_rx.recv().await.unwrap(), b"root\n");
        assert_eq!(stderr_rx.recv().await.unwrap(), b"warning\n");
    }

    #[tokio::test]
    async fn cancelling_the_token_unblocks_the_backend() {
        let (shell, backend) = shell_pipe();
        let (_input, _stdout, _stderr, closed) = shell.into_parts();
        closed.cancel();
        backend.closed.cancelled().await;
    }

    #[tokio::test]
    async fn write_after_backend_drop_is_an_error() {
        let (shell, backend) = shell_pipe();
        drop(backend);
        let (input, _, _, _) = shell.into_parts();
        assert!(input.write(b"x".to_vec()).await.is_err());
    }
}
