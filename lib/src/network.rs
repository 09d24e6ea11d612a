use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::{
    error::{ChainError, Result},
    sha256::canonical_bytes,
    types::{Block, Transaction},
};

/// Frames larger than this are refused without reading them.
pub const MAX_FRAME_LEN: u64 = 64 * 1024 * 1024;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub enum Message {
    /// Liveness probe carrying the sender's address.
    Ping(String),
    /// Reply to `Ping`.
    Pong(String),
    /// Hand a transaction to a node for its mempool.
    SubmitTransaction(Transaction),
    /// Announce a freshly mined block, or a whole chain.
    SubmitBlock(BlockPayload),
    /// Ask for the node's current chain. Carries a tag naming the caller, for logs only.
    FetchChain(String),
    /// Reply to `FetchChain`.
    Chain(Vec<Block>),
    /// Reply to `SubmitTransaction` and `SubmitBlock`.
    Status(Status),
}

/// A block announcement is either one block extending the receiver's tip, or a full chain
/// snapshot that goes through the reconciler. Which one is decided by the JSON shape alone: an
/// object or a list.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(untagged)]
pub enum BlockPayload {
    Block(Block),
    Chain(Vec<Block>),
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub enum Status {
    /// Taken into the mempool or appended to the chain.
    Accepted,
    /// A chain snapshot was handed to the reconciler.
    Queued,
    /// Seen before; nothing done.
    AlreadyProcessed,
    Rejected(String),
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Accepted => write!(f, "accepted"),
            Status::Queued => write!(f, "queued for reconciliation"),
            Status::AlreadyProcessed => write!(f, "already processed"),
            Status::Rejected(reason) => write!(f, "rejected: {reason}"),
        }
    }
}

impl Message {
    pub fn encode(&self) -> Vec<u8> {
        canonical_bytes(self)
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(data)?)
    }

    /// Write one frame: big-endian u64 length, then the JSON body.
    pub async fn send_async(&self, stream: &mut (impl AsyncWrite + Unpin)) -> Result<()> {
        let bytes = self.encode();
        let len = bytes.len() as u64;
        stream.write_all(&len.to_be_bytes()).await?;
        stream.write_all(&bytes).await?;
        stream.flush().await?;
        Ok(())
    }

    pub async fn receive_async(stream: &mut (impl AsyncRead + Unpin)) -> Result<Self> {
        let mut len_bytes = [0u8; 8];
        stream.read_exact(&mut len_bytes).await?;
        let len = u64::from_be_bytes(len_bytes);
        if len > MAX_FRAME_LEN {
            return Err(ChainError::Malformed(format!(
                "frame of {len} bytes exceeds the {MAX_FRAME_LEN} byte limit"
            )));
        }
        // grows with what actually arrives, not with what the header claims
        let mut data = Vec::new();
        (&mut *stream).take(len).read_to_end(&mut data).await?;
        if data.len() as u64 != len {
            return Err(std::io::Error::from(std::io::ErrorKind::UnexpectedEof).into());
        }
        Self::decode(&data)
    }
}

/// One request/reply round trip with a peer. Connecting, sending and waiting for the reply all
/// share a single deadline; any failure is reported as the peer being unreachable.
pub async fn call(peer: &str, request: &Message, deadline: Duration) -> Result<Message> {
    let exchange = async {
        let mut stream = TcpStream::connect(peer).await?;
        request.send_async(&mut stream).await?;
        Message::receive_async(&mut stream).await
    };
    match timeout(deadline, exchange).await {
        Ok(Ok(reply)) => Ok(reply),
        Ok(Err(e)) => Err(ChainError::PeerUnreachable {
            peer: peer.to_string(),
            reason: e.to_string(),
        }),
        Err(_) => Err(ChainError::PeerUnreachable {
            peer: peer.to_string(),
            reason: format!("no reply within {deadline:?}"),
        }),
    }
}
