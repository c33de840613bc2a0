//! CLI <-> daemon protocol over a Unix socket.
//!
//! Every message is a frame: a big-endian `u32` length followed by that
//! many bytes of bincode. A `Subscribe` request keeps its connection open
//! and the daemon streams `Event` and `Notice` frames until either side
//! goes away.

use anyhow::{Context, Result};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::{
    fs, io,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::{UnixListener, UnixStream},
    sync::{broadcast, mpsc},
};

use crate::config::get_data_dir;
use crate::daemon::Monitor;
use crate::error::EngineError;
use crate::events::{BlockEvent, Notice, Subscription};
use crate::machine::MonitorStatus;
use crate::usage::UsageSnapshot;

const MAX_FRAME_LEN: u32 = 64 * 1024;

/// IPC request from CLI to daemon
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub enum IpcRequest {
    Status,
    Start { delay_minutes: u32 },
    Stop,
    Unblock,
    Usage,
    Subscribe,
    Shutdown,
}

/// IPC response from daemon to CLI
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub enum IpcResponse {
    Status(MonitorStatus),
    Usage(UsageSnapshot),
    Subscribed,
    Event(BlockEvent),
    Notice(Notice),
    Error(String),
    Shutdown,
}

/// Default socket location inside the data directory
///
/// # Errors
///
/// Returns an error if the data directory cannot be determined
pub fn socket_path() -> Result<PathBuf> {
    Ok(get_data_dir()?.join("wordgate.sock"))
}

async fn write_frame<W, T>(writer: &mut W, value: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let encoded = bincode::serialize(value)?;
    let len = u32::try_from(encoded.len()).context("IPC frame too large")?;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(&encoded).await?;
    writer.flush().await?;
    Ok(())
}

/// Next frame, or `None` if the peer closed the connection between frames
async fn read_frame<R, T>(reader: &mut R) -> Result<Option<T>>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    let len = u32::from_be_bytes(len_buf);
    if len > MAX_FRAME_LEN {
        anyhow::bail!("IPC frame of {len} bytes exceeds limit");
    }
    let mut buf = vec![0u8; usize::try_from(len)?];
    reader.read_exact(&mut buf).await?;
    Ok(Some(bincode::deserialize(&buf)?))
}

#[derive(Debug, Clone)]
pub struct IpcClient {
    sock_path: PathBuf,
}

impl IpcClient {
    #[must_use]
    pub fn new(sock_path: &Path) -> Self {
        Self {
            sock_path: sock_path.to_path_buf(),
        }
    }

    /// One request, one response
    ///
    /// # Errors
    ///
    /// Returns an error if the daemon is unreachable or answers garbage
    pub async fn send_command(&self, request: IpcRequest) -> Result<IpcResponse> {
        let mut stream = self.connect().await?;
        write_frame(&mut stream, &request).await?;
        read_frame(&mut stream)
            .await?
            .context("Daemon closed the connection without answering")
    }

    pub(crate) async fn expect_status(&self, request: IpcRequest) -> Result<MonitorStatus> {
        match self.send_command(request).await? {
            IpcResponse::Status(status) => Ok(status),
            IpcResponse::Error(message) => Err(EngineError::Ipc(message).into()),
            other => anyhow::bail!("Unexpected daemon response: {other:?}"),
        }
    }

    pub(crate) async fn fetch_usage(&self) -> Result<UsageSnapshot> {
        match self.send_command(IpcRequest::Usage).await? {
            IpcResponse::Usage(snapshot) => Ok(snapshot),
            IpcResponse::Error(message) => Err(EngineError::Ipc(message).into()),
            other => anyhow::bail!("Unexpected daemon response: {other:?}"),
        }
    }

    /// Open a streaming subscription. Notices are logged as they arrive.
    ///
    /// # Errors
    ///
    /// Returns an error if the daemon is unreachable or refuses
    pub async fn subscribe(&self) -> Result<Subscription> {
        let mut stream = self.connect().await?;
        write_frame(&mut stream, &IpcRequest::Subscribe).await?;
        match read_frame::<_, IpcResponse>(&mut stream).await? {
            Some(IpcResponse::Subscribed) => {}
            other => anyhow::bail!("Subscription refused: {other:?}"),
        }

        let (tx, rx) = mpsc::channel(64);
        let reader = tokio::spawn(async move {
            loop {
                match read_frame::<_, IpcResponse>(&mut stream).await {
                    Ok(Some(IpcResponse::Event(event))) => {
                        if tx.send(event).await.is_err() {
                            break;
                        }
                    }
                    Ok(Some(IpcResponse::Notice(notice))) => log::warn!("{notice}"),
                    Ok(Some(other)) => log::debug!("Ignoring {other:?} on subscription"),
                    Ok(None) => break,
                    Err(e) => {
                        log::error!("Subscription read error: {e}");
                        break;
                    }
                }
            }
        });
        Ok(Subscription::remote(rx, reader))
    }

    async fn connect(&self) -> Result<UnixStream> {
        UnixStream::connect(&self.sock_path)
            .await
            .with_context(|| format!("Cannot reach daemon at {}", self.sock_path.display()))
    }
}

pub struct IpcHandler {
    monitor: Monitor,
    shutdown_signal: Arc<AtomicBool>,
}

impl IpcHandler {
    #[must_use]
    pub fn new(monitor: Monitor, shutdown_signal: Arc<AtomicBool>) -> Self {
        Self {
            monitor,
            shutdown_signal,
        }
    }

    /// Answer one request on `stream`
    ///
    /// # Errors
    ///
    /// Returns an error if writing to the client fails
    pub async fn handle(&self, stream: &mut UnixStream, request: IpcRequest) -> Result<()> {
        log::debug!("IPC request: {request:?}");
        let response = match request {
            IpcRequest::Status => IpcResponse::Status(self.monitor.status().await),
            IpcRequest::Start { delay_minutes } => {
                IpcResponse::Status(self.monitor.start(delay_minutes).await)
            }
            IpcRequest::Stop => IpcResponse::Status(self.monitor.stop().await),
            IpcRequest::Unblock => IpcResponse::Status(self.monitor.unblock().await),
            IpcRequest::Usage => match self.monitor.usage().await {
                Ok(snapshot) => IpcResponse::Usage(snapshot),
                Err(e) => IpcResponse::Error(e.to_string()),
            },
            IpcRequest::Subscribe => return self.stream_events(stream).await,
            IpcRequest::Shutdown => {
                self.shutdown_signal.store(true, Ordering::SeqCst);
                IpcResponse::Shutdown
            }
        };
        write_frame(stream, &response).await
    }

    /// Forward events until the subscriber hangs up, noticed even while idle
    async fn stream_events<S>(&self, stream: &mut S) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut events = self.monitor.subscribe();
        let mut notices = self.monitor.events().subscribe_notices();
        write_frame(stream, &IpcResponse::Subscribed).await?;

        let mut inbound = [0u8; 64];
        loop {
            let frame = tokio::select! {
                read = stream.read(&mut inbound) => match read {
                    Ok(0) | Err(_) => {
                        log::debug!("Subscriber hung up");
                        break;
                    }
                    // Subscribers have nothing more to say
                    Ok(_) => continue,
                },
                event = events.recv() => match event {
                    Some(event) => IpcResponse::Event(event),
                    None => break,
                },
                notice = notices.recv() => match notice {
                    Ok(notice) => IpcResponse::Notice(notice),
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            };
            if write_frame(stream, &frame).await.is_err() {
                log::debug!("Subscriber went away");
                break;
            }
        }
        Ok(())
    }
}

/// Accept connections until the process exits
///
/// # Errors
///
/// Returns an error if the socket cannot be bound
pub async fn listen(handler: Arc<IpcHandler>, sock_path: &Path) -> io::Result<()> {
    if sock_path.exists() {
        fs::remove_file(sock_path)?;
    }
    let listener = UnixListener::bind(sock_path)?;

    loop {
        match listener.accept().await {
            Ok((mut stream, _)) => {
                let handler = handler.clone();
                tokio::spawn(async move {
                    match read_frame::<_, IpcRequest>(&mut stream).await {
                        Ok(Some(request)) => {
                            if let Err(e) = handler.handle(&mut stream, request).await {
                                log::error!("IPC handle error: {e}");
                            }
                        }
                        Ok(None) => {} // Connection closed
                        Err(e) => {
                            log::error!("IPC read error: {e}");
                        }
                    }
                });
            }
            Err(e) => {
                log::error!("IPC accept error: {e}");
            }
        }
    }
}
