//! Node-to-node messages and the per-node inbox channel

use crate::ledger::{Block, NodeId, Transaction};
use tokio::sync::mpsc::{self, error::TryRecvError, UnboundedReceiver, UnboundedSender};

#[derive(Debug, Clone)]
pub enum Message {
    Transaction(Transaction),
    Block(Block),
}

impl Message {
    pub fn label(&self) -> &'static str {
        match self {
            Message::Transaction(_) => "transaction",
            Message::Block(_) => "block",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Envelope {
    pub from: NodeId,
    pub message: Message,
}

/// Sending half of a node's inbox. Cloned into every peer.
#[derive(Debug, Clone)]
pub struct Mailbox {
    owner: NodeId,
    sender: UnboundedSender<Envelope>,
}

impl Mailbox {
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Queues an envelope; false once the inbox has been dropped.
    pub fn deliver(&self, envelope: Envelope) -> bool {
        self.sender.send(envelope).is_ok()
    }
}

/// Receiving half of a node's inbox, drained by the dispatcher.
#[derive(Debug)]
pub struct Inbox {
    owner: NodeId,
    receiver: UnboundedReceiver<Envelope>,
}

impl Inbox {
    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn try_next(&mut self) -> Option<Envelope> {
        match self.receiver.try_recv() {
            Ok(envelope) => Some(envelope),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    pub async fn next(&mut self) -> Option<Envelope> {
        self.receiver.recv().await
    }
}

pub fn channel(owner: &str) -> (Mailbox, Inbox) {
    let (sender, receiver) = mpsc::unbounded_channel();
    (
        Mailbox {
            owner: owner.to_string(),
            sender,
        },
        Inbox {
            owner: owner.to_string(),
            receiver,
        },
    )
}
