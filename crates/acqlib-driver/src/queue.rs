//! Bounded FIFO of client requests accepted while the driver is busy.

use std::collections::VecDeque;

use acqlib_core::{ClientId, ClientRequest, Verb};

/// A request parked until the driver returns to idle.
#[derive(Debug)]
pub(crate) struct QueuedRequest {
    pub client: ClientId,
    pub request: ClientRequest,
}

/// Bounded FIFO with head insertion for the stop verb.
///
/// Stop must act as soon as possible even under a backlog, so it bypasses
/// everything already waiting. Requests from a client that has since
/// disconnected are dropped when they surface.
#[derive(Debug)]
pub(crate) struct CommandQueue {
    entries: VecDeque<QueuedRequest>,
    capacity: usize,
}

impl CommandQueue {
    pub fn new(capacity: usize) -> Self {
        CommandQueue {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Park a request. Returns `false` when the queue is full; the caller
    /// answers with a busy acknowledgement instead.
    pub fn push(&mut self, client: ClientId, request: ClientRequest) -> bool {
        if self.entries.len() >= self.capacity {
            return false;
        }
        let entry = QueuedRequest { client, request };
        if entry.request.verb == Verb::Stop {
            self.entries.push_front(entry);
        } else {
            self.entries.push_back(entry);
        }
        true
    }

    pub fn pop(&mut self) -> Option<QueuedRequest> {
        self.entries.pop_front()
    }

    /// Silently drop everything a disconnected client had queued.
    pub fn drop_client(&mut self, client: ClientId) {
        self.entries.retain(|e| e.client != client);
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use acqlib_core::{BoardMask, ChannelMask, RequestParams};

    fn request(verb: Verb) -> ClientRequest {
        ClientRequest {
            verb,
            board_mask: BoardMask::EMPTY,
            channel_mask: ChannelMask::EMPTY,
            params: RequestParams::None,
        }
    }

    #[test]
    fn fifo_order_for_normal_requests() {
        let mut queue = CommandQueue::new(8);
        assert!(queue.push(ClientId(1), request(Verb::Allocate)));
        assert!(queue.push(ClientId(2), request(Verb::Record)));

        assert_eq!(queue.pop().unwrap().request.verb, Verb::Allocate);
        assert_eq!(queue.pop().unwrap().request.verb, Verb::Record);
        assert!(queue.pop().is_none());
    }

    #[test]
    fn stop_jumps_to_the_head() {
        let mut queue = CommandQueue::new(8);
        queue.push(ClientId(1), request(Verb::Allocate));
        queue.push(ClientId(1), request(Verb::Record));
        queue.push(ClientId(2), request(Verb::Stop));

        assert_eq!(queue.pop().unwrap().request.verb, Verb::Stop);
        assert_eq!(queue.pop().unwrap().request.verb, Verb::Allocate);
    }

    #[test]
    fn overflow_is_rejected() {
        let mut queue = CommandQueue::new(2);
        assert!(queue.push(ClientId(1), request(Verb::Allocate)));
        assert!(queue.push(ClientId(1), request(Verb::Record)));
        assert!(!queue.push(ClientId(1), request(Verb::Free)));
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn drop_client_removes_only_their_requests() {
        let mut queue = CommandQueue::new(8);
        queue.push(ClientId(1), request(Verb::Allocate));
        queue.push(ClientId(2), request(Verb::Record));
        queue.push(ClientId(1), request(Verb::Free));

        queue.drop_client(ClientId(1));
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.pop().unwrap().client, ClientId(2));
    }
}
