use super::RpcError;
use super::messages::{RpcMethod, RpcRequest, RpcResponse};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tracing::debug;

/// Client holding one connection to the daemon.
pub struct RpcClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    line: String,
}

impl RpcClient {
    pub async fn connect(address: &str) -> Result<Self, RpcError> {
        let stream = TcpStream::connect(address).await?;
        let (reader, writer) = stream.into_split();
        Ok(Self {
            reader: BufReader::new(reader),
            writer,
            line: String::new(),
        })
    }

    /// Send one request and wait for its reply.
    pub async fn call<M: RpcMethod>(&mut self, args: M) -> Result<M::Reply, RpcError> {
        debug!("Calling {}", M::NAME);
        let request: RpcRequest = args.into();
        let mut encoded = serde_json::to_vec(&request)?;
        encoded.push(b'\n');
        self.writer.write_all(&encoded).await?;

        self.line.clear();
        if self.reader.read_line(&mut self.line).await? == 0 {
            return Err(RpcError::ConnectionClosedError);
        }

        match serde_json::from_str::<RpcResponse>(self.line.trim())? {
            RpcResponse::Success { reply } => M::take_reply(reply)
                .ok_or_else(|| RpcError::UnexpectedReplyError(M::NAME.to_string())),
            RpcResponse::Failure { fault } => Err(RpcError::FaultError(fault)),
        }
    }
}
