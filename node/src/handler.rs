use std::io::ErrorKind;
use std::sync::Arc;

use chainlib::error::ChainError;
use chainlib::network::{Message, Status};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::*;

use crate::runtime::Node;

/// Serve requests on one connection until the peer hangs up, goes quiet for longer than the rpc
/// timeout, or sends something that is not a request.
pub async fn handle_connection(node: Arc<Node>, mut socket: TcpStream) {
    let peer = socket
        .peer_addr()
        .map(|addr| addr.to_string())
        .unwrap_or_else(|_| "unknown".to_string());
    loop {
        let received = timeout(node.config().rpc_timeout(), Message::receive_async(&mut socket));
        let message = match received.await {
            Err(_) => {
                debug!(%peer, "connection idle, closing");
                return;
            }
            Ok(Err(ChainError::Io(e))) if e.kind() == ErrorKind::UnexpectedEof => return,
            Ok(Err(e)) => {
                warn!(%peer, "invalid message received: {e}");
                return;
            }
            Ok(Ok(message)) => message,
        };

        let Some(reply) = respond(&node, &peer, message).await else {
            return;
        };
        if let Err(e) = reply.send_async(&mut socket).await {
            warn!(%peer, "failed to send reply: {e}");
            return;
        }
    }
}

/// The reply to one request, or `None` if the message is not a request at all.
async fn respond(node: &Node, peer: &str, message: Message) -> Option<Message> {
    let reply = match message {
        Message::Ping(sender) => {
            debug!(%peer, "ping from {sender}");
            Message::Pong(node.ping(&sender))
        }
        Message::SubmitTransaction(transaction) => Message::Status(
            node.submit_transaction(transaction)
                .await
                .unwrap_or_else(|e| rejected(peer, "transaction", e)),
        ),
        Message::SubmitBlock(payload) => Message::Status(
            node.submit_block(payload)
                .await
                .unwrap_or_else(|e| rejected(peer, "block", e)),
        ),
        Message::FetchChain(tag) => {
            debug!(%peer, "chain requested by {tag}");
            Message::Chain(node.chain().await.into_blocks())
        }
        Message::Pong(_) | Message::Chain(_) | Message::Status(_) => {
            warn!(%peer, "received a reply where a request was expected");
            return None;
        }
    };
    Some(reply)
}

fn rejected(peer: &str, what: &str, error: ChainError) -> Status {
    info!(%peer, "rejected {what}: {error}");
    Status::Rejected(error.to_string())
}
