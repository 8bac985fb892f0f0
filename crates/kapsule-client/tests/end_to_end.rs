//! Full-stack run: ServiceClient over a real socket connection against a
//! stub daemon that answers calls and pushes operation events.

use std::{
    path::Path,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use kapsule_client::{ProgressSink, ServiceClient};
use kapsule_core::{
    ContainerMode, ContainerRecord, ContainerState, ErrorCode, OperationHandle,
    PROTOCOL_VERSION, ProgressMessage, Request, Response, Severity, now_ms,
};
use kapsule_ipc::{EventNotifier, RequestHandler, serve_unix};
use tempfile::tempdir;
use tokio::time::{Duration, sleep};

struct StubDaemon;

#[async_trait]
impl RequestHandler for StubDaemon {
    async fn handle(&self, req: Request, events: EventNotifier) -> Response {
        match req {
            Request::Version {} => Response::Version {
                daemon: "0.1.0".to_string(),
                protocol: PROTOCOL_VERSION,
            },
            Request::ListContainers {} => Response::Containers {
                containers: vec![ContainerRecord {
                    name: "web".to_string(),
                    status: "Running".to_string(),
                    image: "images:ubuntu/24.04".to_string(),
                    created_ms: now_ms(),
                    mode: "default".to_string(),
                }],
            },
            Request::CreateContainer { name, image, .. } => {
                let handle = OperationHandle::new(format!("op-create-{name}"));
                let emitted = handle.clone();
                tokio::spawn(async move {
                    sleep(Duration::from_millis(10)).await;
                    events.message(
                        &emitted,
                        Severity::Info,
                        format!("Fetching image {image}"),
                        0,
                    );
                    events.message(&emitted, Severity::Success, "Container created", 0);
                    events.completed(&emitted, true, "");
                });
                Response::OperationStarted { handle }
            }
            Request::StartContainer { name } if name == "missing" => Response::Error {
                code: ErrorCode::NotFound,
                message: format!("container not found: {name}"),
                detail: None,
            },
            _ => Response::Error {
                code: ErrorCode::InvalidRequest,
                message: "unsupported in test".to_string(),
                detail: None,
            },
        }
    }
}

async fn connect_with_retry(path: &Path) -> ServiceClient<kapsule_ipc::Connection> {
    for _ in 0..200 {
        match ServiceClient::connect(path).await {
            Ok(client) => return client,
            Err(_) => sleep(Duration::from_millis(10)).await,
        }
    }
    panic!("server socket never came up");
}

#[derive(Clone, Default)]
struct RecordingSink {
    messages: Arc<Mutex<Vec<ProgressMessage>>>,
}

impl ProgressSink for RecordingSink {
    fn message(&mut self, message: &ProgressMessage) {
        self.messages.lock().unwrap().push(message.clone());
    }
}

#[tokio::test]
async fn create_and_query_over_a_real_socket() {
    let tmp = tempdir().expect("tempdir should be created");
    let socket_path = tmp.path().join("kapsuled.sock");

    let server_socket = socket_path.clone();
    let server = tokio::spawn(async move {
        let _ = serve_unix(&server_socket, Arc::new(StubDaemon)).await;
    });

    let client = connect_with_retry(&socket_path).await;
    assert!(client.is_connected());
    assert_eq!(client.remote_version(), "0.1.0");

    let mut sink = RecordingSink::default();
    let result = client
        .create_container(
            "web",
            "images:ubuntu/24.04",
            ContainerMode::Default,
            Some(&mut sink),
        )
        .await;
    assert!(result.success, "create failed: {}", result.error);

    let texts: Vec<_> = sink
        .messages
        .lock()
        .unwrap()
        .iter()
        .map(|m| m.text.clone())
        .collect();
    assert_eq!(
        texts,
        vec!["Fetching image images:ubuntu/24.04", "Container created"]
    );

    let containers = client.list_containers().await;
    assert_eq!(containers.len(), 1);
    assert_eq!(containers[0].name, "web");
    assert_eq!(containers[0].state, ContainerState::Running);

    let rejected = client.start_container("missing", None).await;
    assert!(!rejected.success);
    assert_eq!(rejected.error, "container not found: missing");

    server.abort();
}
