// Line-delimited JSON-RPC over a byte stream (stdin/stdout in production)

use crate::dispatcher::Dispatcher;
use crate::error::{McpError, McpResult};
use crate::protocol::JsonRpcResponse;
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::watch;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec, LinesCodecError};

/// Longest accepted request line.
pub const DEFAULT_MAX_LINE_LENGTH: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Stopped,
    Running,
}

/// Handle used to stop a running transport from another task.
#[derive(Clone)]
pub struct StdioHandle {
    state: Arc<watch::Sender<TransportState>>,
}

impl StdioHandle {
    pub fn stop(&self) {
        self.state.send_replace(TransportState::Stopped);
    }

    pub fn state(&self) -> TransportState {
        *self.state.borrow()
    }
}

/// Sequential read-dispatch-respond loop, one request in flight at a time.
pub struct StdioTransport<R, W> {
    dispatcher: Arc<Dispatcher>,
    reader: FramedRead<R, LinesCodec>,
    writer: FramedWrite<W, LinesCodec>,
    state: Arc<watch::Sender<TransportState>>,
}

impl<R, W> StdioTransport<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(dispatcher: Arc<Dispatcher>, reader: R, writer: W) -> Self {
        Self::with_max_line_length(dispatcher, reader, writer, DEFAULT_MAX_LINE_LENGTH)
    }

    pub fn with_max_line_length(
        dispatcher: Arc<Dispatcher>,
        reader: R,
        writer: W,
        max_line_length: usize,
    ) -> Self {
        let (state, _) = watch::channel(TransportState::Stopped);
        Self {
            dispatcher,
            reader: FramedRead::new(reader, LinesCodec::new_with_max_length(max_line_length)),
            writer: FramedWrite::new(writer, LinesCodec::new()),
            state: Arc::new(state),
        }
    }

    pub fn handle(&self) -> StdioHandle {
        StdioHandle {
            state: self.state.clone(),
        }
    }

    pub fn state(&self) -> TransportState {
        *self.state.borrow()
    }

    /// Serve requests until end of input or until stopped.
    ///
    /// Malformed lines are answered with a parse error and never end the loop;
    /// only I/O failures on the underlying streams do.
    pub async fn run(&mut self) -> McpResult<()> {
        let mut state = self.state.subscribe();
        self.state.send_replace(TransportState::Running);
        tracing::info!("Stdio transport running");

        let result = self.serve(&mut state).await;

        self.state.send_replace(TransportState::Stopped);
        tracing::info!("Stdio transport stopped");
        result
    }

    async fn serve(&mut self, state: &mut watch::Receiver<TransportState>) -> McpResult<()> {
        // The codec yields `None` once right after a decode error; that one is
        // not end of input.
        let mut after_decode_error = false;
        loop {
            if *state.borrow_and_update() == TransportState::Stopped {
                return Ok(());
            }

            let next = tokio::select! {
                biased;
                _ = state.changed() => continue,
                next = self.reader.next() => next,
            };

            let response = match next {
                None if after_decode_error => {
                    after_decode_error = false;
                    continue;
                }
                None => {
                    tracing::info!("Input closed");
                    return Ok(());
                }
                Some(Ok(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    self.dispatcher.handle_raw(line.as_bytes()).await
                }
                Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                    tracing::warn!("Discarding oversized request line");
                    after_decode_error = true;
                    parse_failure("request line exceeds maximum length")
                }
                Some(Err(LinesCodecError::Io(e)))
                    if e.kind() == std::io::ErrorKind::InvalidData =>
                {
                    tracing::warn!(error = %e, "Request line is not valid UTF-8");
                    after_decode_error = true;
                    parse_failure(e)
                }
                Some(Err(LinesCodecError::Io(e))) => {
                    tracing::error!(error = %e, "Failed to read request");
                    return Err(e.into());
                }
            };

            self.write(&response).await?;
        }
    }

    async fn write(&mut self, response: &JsonRpcResponse) -> McpResult<()> {
        // `send` flushes, so each response reaches the peer immediately
        self.writer
            .send(response.encode())
            .await
            .map_err(|e| match e {
                LinesCodecError::Io(e) => McpError::Io(e),
                LinesCodecError::MaxLineLengthExceeded => {
                    McpError::Internal("response line too long".to_string())
                }
            })
    }
}

fn parse_failure(detail: impl std::fmt::Display) -> JsonRpcResponse {
    JsonRpcResponse::error(
        Value::Null,
        McpError::Decode(detail.to_string()).to_rpc_error(),
    )
}
