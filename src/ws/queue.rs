//! Outbound queue: commands waiting for an open transport.

use std::collections::VecDeque;

use crate::error::WsError;
use crate::ws::transport::Transport;
use crate::ws::OutboundCommand;

/// Strict FIFO of not-yet-sent commands. Unbounded.
#[derive(Debug, Default)]
pub struct OutboundQueue {
    pending: VecDeque<OutboundCommand>,
}

impl OutboundQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&mut self, command: OutboundCommand) {
        tracing::debug!("Queued {:?}", command);
        self.pending.push_back(command);
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &OutboundCommand> {
        self.pending.iter()
    }

    /// Put `commands` back at the front, ahead of everything queued, keeping
    /// their order.
    pub fn requeue_front(&mut self, commands: Vec<OutboundCommand>) {
        for command in commands.into_iter().rev() {
            self.pending.push_front(command);
        }
    }

    /// Send from the front until empty or a send fails.
    ///
    /// On failure the unsent commands, including the one that failed, stay at the
    /// front in their original order and the error is returned. Returns the number
    /// of commands sent.
    pub fn flush(&mut self, transport: &mut dyn Transport) -> Result<usize, WsError> {
        let mut sent = 0;
        while let Some(command) = self.pending.pop_front() {
            let result = command
                .to_frame()
                .and_then(|frame| transport.send(frame));
            if let Err(e) = result {
                self.pending.push_front(command);
                tracing::warn!(
                    "Flush halted after {} command(s), {} left queued: {}",
                    sent,
                    self.pending.len(),
                    e
                );
                return Err(e);
            }
            sent += 1;
        }
        Ok(sent)
    }
}
