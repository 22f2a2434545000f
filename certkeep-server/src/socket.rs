//! Management socket
//!
//! One JSON `Command` per line in, one JSON `Response` per line out, over a
//! Unix socket. Lines over [`MAX_LINE_BYTES`] are answered with an
//! `invalid` error and the connection keeps going.

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader,
};
use tokio::net::{UnixListener, UnixStream};

pub use certkeep_core::{Command, ErrorKind, Response};

pub const MAX_LINE_BYTES: usize = 1024 * 1024;

fn invalid_data(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::InvalidData, err)
}

/// Read one newline-terminated JSON value, holding at most `max_bytes` of it.
///
/// An oversized line is skipped up to its newline and reported as
/// `InvalidData`, leaving the reader at the start of the next line.
/// `Ok(None)` means the peer closed the stream.
pub async fn read_json_line_with_limit<R, T>(
    reader: &mut R,
    max_bytes: usize,
) -> std::io::Result<Option<T>>
where
    R: AsyncBufRead + Unpin,
    T: DeserializeOwned,
{
    let mut line = Vec::new();
    let read = (&mut *reader)
        .take(max_bytes as u64 + 1)
        .read_until(b'\n', &mut line)
        .await?;
    if read == 0 {
        return Ok(None);
    }

    if line.last() == Some(&b'\n') {
        line.pop();
    } else if line.len() > max_bytes {
        skip_line(reader).await?;
        return Err(invalid_data(format!(
            "command line exceeds {} bytes",
            max_bytes
        )));
    }

    serde_json::from_slice(&line).map(Some).map_err(invalid_data)
}

/// Discard input through the next newline, one buffered chunk at a time
async fn skip_line<R>(reader: &mut R) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
{
    loop {
        let (consumed, done) = {
            let chunk = reader.fill_buf().await?;
            if chunk.is_empty() {
                return Ok(());
            }
            match chunk.iter().position(|b| *b == b'\n') {
                Some(newline) => (newline + 1, true),
                None => (chunk.len(), false),
            }
        };
        reader.consume(consumed);
        if done {
            return Ok(());
        }
    }
}

pub async fn read_json_line<R, T>(reader: &mut R) -> std::io::Result<Option<T>>
where
    R: AsyncBufRead + Unpin,
    T: DeserializeOwned,
{
    read_json_line_with_limit(reader, MAX_LINE_BYTES).await
}

/// Write `value` as a single JSON line
pub async fn write_json_line<W, T>(writer: &mut W, value: &T) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let mut line = serde_json::to_vec(value).map_err(invalid_data)?;
    line.push(b'\n');
    writer.write_all(&line).await
}

fn prepare_socket_path(path: &Path) -> Result<(), std::io::Error> {
    if path.exists() {
        std::fs::remove_file(path)?;
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    Ok(())
}

/// Management socket server
pub struct SocketServer {
    path: PathBuf,
}

impl SocketServer {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Start listening for commands
    pub async fn run<F, Fut>(&self, handler: F) -> Result<(), std::io::Error>
    where
        F: Fn(Command) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Response> + Send + 'static,
    {
        prepare_socket_path(&self.path)?;

        let listener = UnixListener::bind(&self.path)?;
        tracing::info!("Management socket listening on {}", self.path.display());

        let handler = Arc::new(handler);

        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    let handler = handler.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, handler).await {
                            tracing::error!("Connection error: {}", e);
                        }
                    });
                }
                Err(e) => {
                    tracing::error!("Accept error: {}", e);
                }
            }
        }
    }
}

async fn handle_connection<F, Fut>(stream: UnixStream, handler: Arc<F>) -> std::io::Result<()>
where
    F: Fn(Command) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Response> + Send + 'static,
{
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);

    loop {
        let cmd = match read_json_line::<_, Command>(&mut reader).await {
            Ok(Some(cmd)) => cmd,
            Ok(None) => break,
            Err(e) if e.kind() == std::io::ErrorKind::InvalidData => {
                let resp = Response::error(ErrorKind::Invalid, format!("Invalid command: {}", e));
                write_json_line(&mut writer, &resp).await?;
                continue;
            }
            Err(e) => return Err(e),
        };

        tracing::debug!(command = cmd.name(), "Received command");
        let resp = handler(cmd).await;
        write_json_line(&mut writer, &resp).await?;
    }

    Ok(())
}

/// Client side of the management socket
pub mod client {
    use super::*;

    /// Send one command and wait for its response
    pub async fn request(path: impl AsRef<Path>, cmd: &Command) -> std::io::Result<Response> {
        let stream = UnixStream::connect(path.as_ref()).await?;
        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);

        write_json_line(&mut writer, cmd).await?;
        read_json_line::<_, Response>(&mut reader)
            .await?
            .ok_or_else(|| {
                std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "connection closed before response",
                )
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::FileTypeExt;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::io::AsyncReadExt;
    use tokio::time::sleep;

    #[tokio::test]
    async fn returns_invalid_data_on_bad_json() {
        let (a, b) = tokio::io::duplex(1024);
        let (_ar, mut aw) = tokio::io::split(a);
        let (mut br, _bw) = tokio::io::split(b);
        let mut br = BufReader::new(&mut br);

        aw.write_all(b"{not json}\n").await.unwrap();

        let err = read_json_line::<_, serde_json::Value>(&mut br)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn errors_when_line_exceeds_limit() {
        let (a, b) = tokio::io::duplex(1024 * 1024);
        let (_ar, mut aw) = tokio::io::split(a);
        let (mut br, _bw) = tokio::io::split(b);
        let mut br = BufReader::new(&mut br);

        let big = "a".repeat(33);
        aw.write_all(big.as_bytes()).await.unwrap();
        aw.write_all(b"\n").await.unwrap();

        let err = read_json_line_with_limit::<_, serde_json::Value>(&mut br, 32)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn oversized_line_streams_through_a_small_buffer() {
        // The pipe only holds 64 bytes, so the writer finishes only if the
        // reader keeps discarding instead of accumulating the line
        let (client, server) = tokio::io::duplex(64);
        let writer = tokio::spawn(async move {
            let mut client = client;
            client.write_all(&vec![b'x'; 64 * 1024]).await.unwrap();
            client
                .write_all(b"\n{\"command\":\"list_certs\"}\n")
                .await
                .unwrap();
            client
        });

        let mut reader = BufReader::with_capacity(32, server);
        let err = read_json_line_with_limit::<_, Command>(&mut reader, 128)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
        assert!(err.to_string().contains("exceeds 128 bytes"), "{}", err);

        let next = read_json_line_with_limit::<_, Command>(&mut reader, 128)
            .await
            .unwrap();
        assert!(matches!(next, Some(Command::ListCerts)));
        drop(writer.await.unwrap());
    }

    #[tokio::test]
    async fn line_at_the_limit_is_accepted() {
        let mut reader: &[u8] = b"{\"a\":1}\n";
        let value: serde_json::Value = read_json_line_with_limit(&mut reader, 7)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(value, serde_json::json!({"a": 1}));
    }

    #[tokio::test]
    async fn oversized_line_at_eof_then_reports_closed() {
        let mut reader: &[u8] = b"aaaaaaaaaaaa";
        let err = read_json_line_with_limit::<_, serde_json::Value>(&mut reader, 4)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);

        let next = read_json_line_with_limit::<_, serde_json::Value>(&mut reader, 4)
            .await
            .unwrap();
        assert!(next.is_none());
    }

    #[tokio::test]
    async fn unterminated_final_line_is_parsed() {
        let mut reader: &[u8] = b"{\"command\":\"hello\",\"protocol_version\":1}";
        let cmd: Option<Command> = read_json_line(&mut reader).await.unwrap();
        assert!(matches!(cmd, Some(Command::Hello { .. })));
    }

    #[test]
    fn test_prepare_socket_path_removes_stale_file_and_creates_parent() {
        let temp = TempDir::new().unwrap();
        let socket_path = temp.path().join("nested").join("certkeep.sock");
        std::fs::create_dir_all(socket_path.parent().unwrap()).unwrap();
        std::fs::write(&socket_path, b"stale").unwrap();

        prepare_socket_path(&socket_path).unwrap();

        assert!(socket_path.parent().unwrap().exists());
        assert!(!socket_path.exists(), "stale socket file should be removed");
    }

    #[tokio::test]
    async fn test_handle_connection_answers_invalid_json_and_continues() {
        let (client, server) = UnixStream::pair().unwrap();

        let handler = Arc::new(|_cmd: Command| async move { Response::ok(serde_json::json!({})) });
        let server_task = tokio::spawn(handle_connection(server, handler));

        let (r, mut w) = client.into_split();
        let mut r = BufReader::new(r);

        w.write_all(b"not-json\n").await.unwrap();
        let resp: Response = read_json_line(&mut r).await.unwrap().unwrap();
        assert_eq!(resp.error_kind(), Some(ErrorKind::Invalid));
        assert!(resp.error_message().unwrap().contains("Invalid command"));

        write_json_line(&mut w, &Command::ListCerts).await.unwrap();
        let resp: Response = read_json_line(&mut r).await.unwrap().unwrap();
        assert!(resp.is_ok());

        drop(w);
        server_task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_run_replaces_stale_socket_file() {
        let temp = TempDir::new().unwrap();
        let bind_check_path = temp.path().join("bind-check.sock");
        if std::os::unix::net::UnixListener::bind(&bind_check_path).is_err() {
            return;
        }
        let _ = std::fs::remove_file(&bind_check_path);

        let socket_path = temp.path().join("sockdir").join("certkeep.sock");
        std::fs::create_dir_all(socket_path.parent().unwrap()).unwrap();
        std::fs::write(&socket_path, b"stale-file").unwrap();

        let server = SocketServer::new(&socket_path);
        let server_task = tokio::spawn(async move {
            let _ = server
                .run(|cmd| async move {
                    match cmd {
                        Command::ListCerts => Response::ok(serde_json::json!([])),
                        _ => Response::error(ErrorKind::Invalid, "unexpected command"),
                    }
                })
                .await;
        });

        let mut ready = false;
        for _ in 0..100 {
            if let Ok(meta) = std::fs::metadata(&socket_path)
                && meta.file_type().is_socket()
            {
                ready = true;
                break;
            }
            sleep(Duration::from_millis(20)).await;
        }
        assert!(ready, "socket was not created at {}", socket_path.display());

        let resp = client::request(&socket_path, &Command::ListCerts)
            .await
            .unwrap();
        assert!(resp.is_ok());

        let mut raw_client = UnixStream::connect(&socket_path).await.unwrap();
        raw_client
            .write_all(br#"{"command":"super_admin"}"#)
            .await
            .unwrap();
        raw_client.write_all(b"\n").await.unwrap();
        raw_client.shutdown().await.unwrap();
        let mut raw = Vec::new();
        raw_client.read_to_end(&mut raw).await.unwrap();
        let response = String::from_utf8(raw).unwrap();
        assert!(response.contains("\"status\":\"error\""), "{}", response);

        server_task.abort();
        let _ = server_task.await;
    }
}
