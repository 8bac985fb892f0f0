use std::{io::ErrorKind, path::Path, sync::Arc};

use async_trait::async_trait;
use kapsule_core::{
    ErrorCode, Event, OperationHandle, ReqId, Request, RequestEnvelope, Response,
    ResponseEnvelope, ServerFrame, Severity,
};
use serde::Deserialize;
use tokio::{
    net::{UnixListener, UnixStream},
    sync::mpsc,
};

use crate::{
    IpcError,
    codec::{decode, encode},
    framing::{read_frame, write_frame},
};

/// Handles one decoded request and produces the reply.
///
/// Long-running operations should return [`Response::OperationStarted`]
/// promptly and emit progress through the notifier from a spawned task; the
/// notifier stays valid for the lifetime of the connection.
#[async_trait]
pub trait RequestHandler: Send + Sync + 'static {
    async fn handle(&self, req: Request, events: EventNotifier) -> Response;
}

/// Emits operation events back over the connection a request arrived on.
#[derive(Clone)]
pub struct EventNotifier {
    tx: mpsc::UnboundedSender<ServerFrame>,
}

impl EventNotifier {
    /// Sends a progress message for `handle`. Returns false once the
    /// connection is gone.
    pub fn message(
        &self,
        handle: &OperationHandle,
        severity: Severity,
        text: impl Into<String>,
        indent: i32,
    ) -> bool {
        self.emit(Event::Message {
            handle: handle.clone(),
            severity,
            text: text.into(),
            indent,
        })
    }

    /// Sends the terminal event for `handle`.
    pub fn completed(&self, handle: &OperationHandle, success: bool, error: impl Into<String>) -> bool {
        self.emit(Event::Completed {
            handle: handle.clone(),
            success,
            error: error.into(),
        })
    }

    /// Sends a raw event frame.
    pub fn emit(&self, event: Event) -> bool {
        self.tx.send(ServerFrame::Event(event)).is_ok()
    }
}

/// Accept loop binding the daemon socket and serving connections forever.
pub async fn serve_unix(path: &Path, handler: Arc<dyn RequestHandler>) -> Result<(), IpcError> {
    let listener = UnixListener::bind(path)?;

    loop {
        let (stream, _) = listener.accept().await?;
        let handler = Arc::clone(&handler);

        tokio::spawn(async move {
            if let Err(err) = handle_connection(stream, handler).await {
                tracing::debug!(error = %err, "connection handler exited with error");
            }
        });
    }
}

async fn handle_connection(
    stream: UnixStream,
    handler: Arc<dyn RequestHandler>,
) -> Result<(), IpcError> {
    let (mut read_half, mut write_half) = stream.into_split();
    let (frame_tx, mut frame_rx) = mpsc::unbounded_channel::<ServerFrame>();

    // Replies and events share one writer so their relative order on the
    // wire matches the order they were produced in.
    let writer = tokio::spawn(async move {
        while let Some(frame) = frame_rx.recv().await {
            let payload = match encode(&frame) {
                Ok(payload) => payload,
                Err(err) => {
                    tracing::warn!(error = %err, "dropping unencodable frame");
                    continue;
                }
            };
            if write_frame(&mut write_half, &payload).await.is_err() {
                break;
            }
        }
    });

    let notifier = EventNotifier {
        tx: frame_tx.clone(),
    };

    let result = loop {
        let frame = match read_frame(&mut read_half).await {
            Ok(frame) => frame,
            Err(IpcError::Io(err))
                if matches!(
                    err.kind(),
                    ErrorKind::UnexpectedEof | ErrorKind::ConnectionReset | ErrorKind::BrokenPipe
                ) =>
            {
                break Ok(());
            }
            Err(err) => break Err(err),
        };

        match decode::<RequestEnvelope<Request>>(&frame) {
            Ok(req) => {
                let response = handler.handle(req.body, notifier.clone()).await;
                let reply = ServerFrame::Reply(ResponseEnvelope {
                    req_id: req.req_id,
                    body: response,
                });
                if frame_tx.send(reply).is_err() {
                    break Ok(());
                }
            }
            Err(err) => {
                if let Some(req_id) = extract_req_id(&frame) {
                    let reply = ServerFrame::Reply(ResponseEnvelope {
                        req_id,
                        body: Response::Error {
                            code: ErrorCode::InvalidRequest,
                            message: "failed to decode request envelope".to_string(),
                            detail: Some(err.to_string()),
                        },
                    });
                    let _ = frame_tx.send(reply);
                }

                break Ok(());
            }
        }
    };

    drop(frame_tx);
    drop(notifier);
    let _ = writer.await;
    result
}

#[derive(Debug, Deserialize)]
struct ReqIdOnly {
    req_id: ReqId,
}

fn extract_req_id(frame: &[u8]) -> Option<ReqId> {
    decode::<ReqIdOnly>(frame)
        .ok()
        .map(|decoded| decoded.req_id)
}
