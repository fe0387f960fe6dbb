//! Remote file access over the SFTP subsystem.
//!
//! A [`FileSession`] owns its underlying connection: file channels are
//! opened per request and torn down when the request completes, so no
//! long-lived SFTP state outlives the operation that needed it.

use russh_sftp::client::error::Error as SftpError;
use russh_sftp::client::fs::File;
use russh_sftp::client::SftpSession;
use russh_sftp::protocol::StatusCode;
use sg_types::{files::sort_listing, RemoteFileInfo};
use tokio::io::{AsyncRead, AsyncWriteExt};
use tracing::debug;

use crate::connect::RemoteConnection;
use crate::error::{SshCoreError, SshResult};

/// An open remote file handle, readable and writable as tokio I/O.
pub type RemoteFile = File;

/// An SFTP session bound to one authenticated connection.
pub struct FileSession {
    connection: RemoteConnection,
    sftp: SftpSession,
}

impl FileSession {
    /// Open the SFTP subsystem on a fresh session channel.
    pub(crate) async fn open(connection: RemoteConnection) -> SshResult<Self> {
        let channel = connection.handle().channel_open_session().await?;
        channel.request_subsystem(true, "sftp").await?;
        let sftp = SftpSession::new(channel.into_stream()).await?;
        Ok(Self { connection, sftp })
    }

    /// The remote account's working directory, as an absolute path.
    pub async fn working_dir(&self) -> SshResult<String> {
        Ok(self.sftp.canonicalize(".").await?)
    }

    /// List a directory, directories first then by name. An empty path
    /// lists the remote working directory.
    pub async fn list(&self, path: &str) -> SshResult<Vec<RemoteFileInfo>> {
        let dir = self.resolve(path).await?;
        let mut entries = Vec::new();
        for entry in self.sftp.read_dir(dir.as_str()).await.map_err(not_found(&dir))? {
            let name = entry.file_name();
            if name == "." || name == ".." {
                continue;
            }
            let attrs = entry.metadata();
            let is_dir = attrs.is_dir();
            entries.push(RemoteFileInfo {
                path: join_remote(&dir, &name),
                mode: format_mode(attrs.permissions.unwrap_or(0), is_dir),
                size: attrs.size.unwrap_or(0),
                mtime: i64::from(attrs.mtime.unwrap_or(0)),
                is_dir,
                name,
            });
        }
        sort_listing(&mut entries);
        debug!(dir = %dir, entries = entries.len(), "listed remote directory");
        Ok(entries)
    }

    /// Open a remote file for streaming download. Returns the open file
    /// and its size so the caller can set response headers up front.
    pub async fn read(&self, path: &str) -> SshResult<(File, u64)> {
        let attrs = self.stat(path).await?;
        if attrs.is_dir {
            return Err(SshCoreError::IsDirectory { path: path.into() });
        }
        let file = self.sftp.open(path).await.map_err(not_found(path))?;
        Ok((file, attrs.size))
    }

    /// Create (or truncate) a remote file and stream `reader` into it.
    /// Missing parent directories are created first.
    pub async fn write<R>(&self, path: &str, reader: &mut R) -> SshResult<u64>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        if let Some(parent) = parent_of(path) {
            self.mkdir_all(parent).await?;
        }
        let mut file = self.sftp.create(path).await?;
        let written = tokio::io::copy(reader, &mut file).await?;
        file.shutdown().await?;
        debug!(path = %path, bytes = written, "wrote remote file");
        Ok(written)
    }

    /// Remove a file or an (empty) directory.
    pub async fn remove(&self, path: &str) -> SshResult<()> {
        let attrs = self.stat(path).await?;
        if attrs.is_dir {
            self.sftp.remove_dir(path).await?;
        } else {
            self.sftp.remove_file(path).await?;
        }
        Ok(())
    }

    /// Create a directory and any missing parents.
    pub async fn mkdir_all(&self, path: &str) -> SshResult<()> {
        let mut current = String::new();
        if path.starts_with('/') {
            current.push('/');
        }
        for part in path.split('/').filter(|p| !p.is_empty()) {
            if !current.is_empty() && !current.ends_with('/') {
                current.push('/');
            }
            current.push_str(part);
            match self.sftp.metadata(current.as_str()).await {
                Ok(attrs) if attrs.is_dir() => continue,
                Ok(_) => {
                    return Err(SshCoreError::Other(format!(
                        "remote path exists and is not a directory: {current}"
                    )))
                }
                Err(_) => self.sftp.create_dir(current.as_str()).await?,
            }
        }
        Ok(())
    }

    pub async fn rename(&self, from: &str, to: &str) -> SshResult<()> {
        self.sftp.rename(from, to).await.map_err(not_found(from))?;
        Ok(())
    }

    /// Metadata for a single remote path.
    pub async fn stat(&self, path: &str) -> SshResult<RemoteFileInfo> {
        let attrs = self.sftp.metadata(path).await.map_err(not_found(path))?;
        let is_dir = attrs.is_dir();
        Ok(RemoteFileInfo {
            name: base_name(path).to_string(),
            path: path.to_string(),
            size: attrs.size.unwrap_or(0),
            mode: format_mode(attrs.permissions.unwrap_or(0), is_dir),
            mtime: i64::from(attrs.mtime.unwrap_or(0)),
            is_dir,
        })
    }

    /// Close the SFTP session and the connection beneath it.
    pub async fn close(self) {
        let _ = self.sftp.close().await;
        self.connection.close().await;
    }

    async fn resolve(&self, path: &str) -> SshResult<String> {
        let target = if path.is_empty() { "." } else { path };
        Ok(self.sftp.canonicalize(target).await.map_err(not_found(target))?)
    }
}

fn not_found(path: &str) -> impl FnOnce(SftpError) -> SshCoreError + '_ {
    move |err| match err {
        SftpError::Status(status) if status.status_code == StatusCode::NoSuchFile => {
            SshCoreError::NotFound { path: path.into() }
        }
        other => other.into(),
    }
}

fn join_remote(dir: &str, name: &str) -> String {
    if dir.ends_with('/') {
        format!("{dir}{name}")
    } else {
        format!("{dir}/{name}")
    }
}

fn parent_of(path: &str) -> Option<&str> {
    match path.rfind('/') {
        Some(0) | None => None,
        Some(idx) => Some(&path[..idx]),
    }
}

fn base_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Render a permission word in `ls -l` style, e.g. `drwxr-xr-x`.
fn format_mode(permissions: u32, is_dir: bool) -> String {
    let mut out = String::with_capacity(10);
    out.push(if is_dir { 'd' } else { '-' });
    for shift in [6u32, 3, 0] {
        let bits = (permissions >> shift) & 0o7;
        out.push(if bits & 0o4 != 0 { 'r' } else { '-' });
        out.push(if bits & 0o2 != 0 { 'w' } else { '-' });
        out.push(if bits & 0o1 != 0 { 'x' } else { '-' });
    }
    out
}
