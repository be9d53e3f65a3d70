use super::RpcError;
use super::messages::{FaultKind, RpcFault, RpcRequest, RpcResponse};
use crate::authority::AuthorityClient;
use crate::node::NodeServices;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub async fn bind(address: &str) -> Result<TcpListener, RpcError> {
    let listener = TcpListener::bind(address).await?;
    info!("RPC listening on {}", listener.local_addr()?);
    Ok(listener)
}

/// Serves newline-delimited JSON requests, one task per connection.
pub struct RpcServer<A: AuthorityClient> {
    services: Arc<NodeServices<A>>,
}

impl<A: AuthorityClient + 'static> RpcServer<A> {
    pub fn new(services: Arc<NodeServices<A>>) -> Self {
        Self { services }
    }

    /// Accept connections until `cancel` fires.
    pub async fn serve(
        &self,
        listener: TcpListener,
        cancel: CancellationToken,
    ) -> Result<(), RpcError> {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("RPC server stopped");
                    return Ok(());
                }
                accepted = listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            warn!("Failed to accept RPC connection: {}", e);
                            continue;
                        }
                    };
                    debug!("RPC connection from {}", peer);
                    let services = self.services.clone();
                    let cancel = cancel.child_token();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(services, stream, cancel).await {
                            debug!("RPC connection from {} closed: {}", peer, e);
                        }
                    });
                }
            }
        }
    }
}

async fn handle_connection<A: AuthorityClient>(
    services: Arc<NodeServices<A>>,
    stream: TcpStream,
    cancel: CancellationToken,
) -> Result<(), RpcError> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    loop {
        line.clear();
        let read = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            read = reader.read_line(&mut line) => read?,
        };
        if read == 0 {
            return Ok(());
        }
        if line.trim().is_empty() {
            continue;
        }

        let response: RpcResponse = match serde_json::from_str::<RpcRequest>(line.trim()) {
            Ok(request) => services.dispatch(request).await.into(),
            Err(e) => RpcResponse::Failure {
                fault: RpcFault::new(FaultKind::Validation, format!("malformed request: {}", e)),
            },
        };

        let mut encoded = serde_json::to_vec(&response)?;
        encoded.push(b'\n');
        writer.write_all(&encoded).await?;
    }
}
