//! Fire-and-forget UDP delivery: one datagram per record.

use crate::error::{Result, SinkError};
use crate::format::{FormatterOptions, SplunkJsonFormatter};
use crate::record::LogRecord;
use crate::sink::LogSink;
use async_trait::async_trait;
use tokio::net::UdpSocket;
use tokio::sync::Mutex;

/// Addressing for a [`UdpSink`]. Immutable once built.
#[derive(Debug, Clone)]
pub struct UdpConnectionInfo {
    pub host: String,
    pub port: u16,
}

impl UdpConnectionInfo {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        UdpConnectionInfo {
            host: host.into(),
            port,
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Sink that sends each record as a single datagram on the caller's
/// task. UDP is already best-effort, so there is no queue and no
/// backoff: a socket error triggers exactly one reopen-and-resend, and
/// a second failure propagates to the caller.
pub struct UdpSink {
    info: UdpConnectionInfo,
    formatter: SplunkJsonFormatter,
    socket: Mutex<Option<UdpSocket>>,
}

impl UdpSink {
    pub async fn new(info: UdpConnectionInfo, options: &FormatterOptions) -> Result<Self> {
        let socket = Self::connect(&info).await?;
        Ok(UdpSink {
            info,
            formatter: SplunkJsonFormatter::new(options),
            socket: Mutex::new(Some(socket)),
        })
    }

    async fn connect(info: &UdpConnectionInfo) -> Result<UdpSocket> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket
            .connect(info.addr())
            .await
            .map_err(|source| SinkError::Connect {
                addr: info.addr(),
                source,
            })?;
        Ok(socket)
    }
}

#[async_trait]
impl LogSink for UdpSink {
    async fn emit(&self, record: LogRecord) -> Result<()> {
        let payload = self.formatter.format(&record);
        let mut guard = self.socket.lock().await;
        let socket = guard.as_ref().ok_or(SinkError::Closed)?;

        match socket.send(payload.as_bytes()).await {
            Ok(_) => Ok(()),
            Err(err) => {
                tracing::debug!(error = %err, "udp send failed; reopening socket once");
                let fresh = Self::connect(&self.info).await?;
                fresh
                    .send(payload.as_bytes())
                    .await
                    .map_err(|e| SinkError::Send {
                        transport: "udp",
                        message: e.to_string(),
                    })?;
                *guard = Some(fresh);
                Ok(())
            }
        }
    }

    async fn close(&self) -> Result<()> {
        self.socket.lock().await.take();
        Ok(())
    }
}
