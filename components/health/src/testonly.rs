//! Test-only utilities: a mock JSON-RPC node serving programmable replies.
use crate::{rpc, NodeUrl};
use http_body_util::{BodyExt as _, Full};
use hyper::{body::Bytes, server::conn::http1, service::service_fn, Response, StatusCode};
use hyper_util::rt::tokio::TokioIo;
use std::{
    convert::Infallible,
    net::SocketAddr,
    sync::{Arc, Mutex},
};
use tokio::net::TcpListener;

/// Reply of the mock node to every request.
#[derive(Debug, Clone)]
pub enum Reply {
    /// Respond with the given status and body.
    Http(StatusCode, String),
    /// Never respond.
    Hang,
}

impl Reply {
    /// Successful `eth_blockNumber` response, with the height hex-encoded.
    pub fn height(height: rpc::Height) -> Self {
        Self::Http(
            StatusCode::OK,
            serde_json::json!({"jsonrpc": "2.0", "result": format!("{height:#x}"), "id": 1})
                .to_string(),
        )
    }
}

#[derive(Debug)]
struct State {
    reply: Reply,
    requests: Vec<Bytes>,
}

/// JSON-RPC node listening on a random local port.
/// The server task is aborted when the node is dropped.
#[derive(Debug)]
pub struct MockNode {
    addr: SocketAddr,
    state: Arc<Mutex<State>>,
    task: tokio::task::JoinHandle<()>,
}

impl Drop for MockNode {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl MockNode {
    /// Starts a node replying with `reply`.
    pub async fn spawn(reply: Reply) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(Mutex::new(State {
            reply,
            requests: vec![],
        }));
        let task = tokio::spawn({
            let state = state.clone();
            async move {
                while let Ok((stream, _)) = listener.accept().await {
                    let state = state.clone();
                    tokio::spawn(async move {
                        let service = service_fn(|req: hyper::Request<hyper::body::Incoming>| {
                            let state = state.clone();
                            async move {
                                let body = req.into_body().collect().await.unwrap().to_bytes();
                                let reply = {
                                    let mut state = state.lock().unwrap();
                                    state.requests.push(body);
                                    state.reply.clone()
                                };
                                let (status, body) = match reply {
                                    Reply::Http(status, body) => (status, body),
                                    Reply::Hang => std::future::pending().await,
                                };
                                let mut response = Response::new(Full::new(Bytes::from(body)));
                                *response.status_mut() = status;
                                Ok::<_, Infallible>(response)
                            }
                        });
                        let _ = http1::Builder::new()
                            .serve_connection(TokioIo::new(stream), service)
                            .await;
                    });
                }
            }
        });
        Self { addr, state, task }
    }

    /// Starts a node reporting `height`.
    pub async fn with_height(height: rpc::Height) -> Self {
        Self::spawn(Reply::height(height)).await
    }

    /// Changes the reply to subsequent requests.
    pub fn set_reply(&self, reply: Reply) {
        self.state.lock().unwrap().reply = reply;
    }

    /// Bodies of all the requests received so far.
    pub fn requests(&self) -> Vec<Bytes> {
        self.state.lock().unwrap().requests.clone()
    }

    /// Endpoint of this node.
    pub fn url(&self) -> NodeUrl {
        self.addr.to_string().parse().unwrap()
    }
}

/// Endpoint on which nothing is listening.
pub async fn unreachable_url() -> NodeUrl {
    // Bind to get a free port, then release it.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr.to_string().parse().unwrap()
}
