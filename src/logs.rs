//! Job log streaming.
//!
//! A job's log endpoint may hold the connection open and send zero bytes as
//! keepalive padding long before the job prints anything. [`LogStream`]
//! splits consumption in two phases so a caller can tell "still waiting"
//! from "output has begun":
//!
//! 1. [`LogStream::peek`] skips padding until the first real byte and
//!    forwards it, confirming the stream is live.
//! 2. [`LogStream::drain`] relays everything else until the service closes
//!    the stream.
//!
//! ```text
//! NotStarted --peek--> Confirmed --drain--> Streaming --EOF--> Closed
//!      |                                        ^
//!      +-------------------drain----------------+
//! ```

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{RecoError, Result};

/// Padding byte the service sends while it has nothing to say.
const KEEPALIVE: u8 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// Opened, nothing read yet
    NotStarted,
    /// First non-padding byte seen and forwarded
    Confirmed,
    /// Relaying the remainder
    Streaming,
    /// End of stream or read failure; the reader has been dropped
    Closed,
}

impl std::fmt::Display for StreamState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamState::NotStarted => write!(f, "not-started"),
            StreamState::Confirmed => write!(f, "confirmed"),
            StreamState::Streaming => write!(f, "streaming"),
            StreamState::Closed => write!(f, "closed"),
        }
    }
}

pub struct LogStream<R> {
    reader: Option<R>,
    state: StreamState,
}

impl<R: AsyncRead + Unpin> LogStream<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader: Some(reader),
            state: StreamState::NotStarted,
        }
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    /// Wait for the first non-padding byte and write it to `out`.
    ///
    /// Returns `true` once output has started, `false` if the stream ended
    /// before any real byte arrived (the stream is then closed).
    pub async fn peek<W>(&mut self, out: &mut W) -> Result<bool>
    where
        W: AsyncWrite + Unpin,
    {
        if self.state != StreamState::NotStarted {
            return Err(RecoError::InvalidLogState {
                op: "peek",
                state: self.state,
            });
        }
        let Some(reader) = self.reader.as_mut() else {
            return Err(RecoError::InvalidLogState {
                op: "peek",
                state: self.state,
            });
        };

        let mut buf = [0u8; 1];
        let mut skipped = 0usize;
        loop {
            let n = match reader.read(&mut buf).await {
                Ok(n) => n,
                Err(e) => {
                    self.close();
                    return Err(e.into());
                }
            };
            if n == 0 {
                tracing::debug!(skipped, "Log stream ended before any output");
                self.close();
                return Ok(false);
            }
            if buf[0] == KEEPALIVE {
                skipped += 1;
                continue;
            }
            out.write_all(&buf).await?;
            out.flush().await?;
            tracing::debug!(skipped, "Log stream confirmed");
            self.state = StreamState::Confirmed;
            return Ok(true);
        }
    }

    /// Copy everything left in the stream to `out`, then close it.
    ///
    /// Returns the number of bytes relayed. Draining a closed stream is a
    /// no-op.
    pub async fn drain<W>(&mut self, out: &mut W) -> Result<u64>
    where
        W: AsyncWrite + Unpin,
    {
        match self.state {
            StreamState::NotStarted | StreamState::Confirmed => {}
            StreamState::Closed => return Ok(0),
            StreamState::Streaming => {
                return Err(RecoError::InvalidLogState {
                    op: "drain",
                    state: self.state,
                })
            }
        }
        let Some(mut reader) = self.reader.take() else {
            self.state = StreamState::Closed;
            return Ok(0);
        };

        self.state = StreamState::Streaming;
        let copied = tokio::io::copy(&mut reader, out).await;
        self.close();
        let copied = copied?;
        out.flush().await?;
        Ok(copied)
    }

    fn close(&mut self) {
        self.reader = None;
        self.state = StreamState::Closed;
    }
}
