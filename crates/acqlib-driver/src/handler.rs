//! The CommandHandler: single owning slot for the active Operation.
//!
//! At most one Operation is active at a time; its lifetime is exactly the
//! span from promotion of a client request to production of the final
//! reply. The handler is pure sequencing logic: the driver performs the
//! actual sends and timer arming based on the returned [`HandlerStep`].

use std::time::Duration;

use acqlib_core::{ClientId, ClientReply, ClientRequest, SharedBoardState};
use tracing::debug;

use crate::ops::{build_operation, BoardAck, BoardRequest, Operation};

/// What the driver must do next for the active Operation.
#[derive(Debug)]
pub(crate) enum HandlerStep {
    /// Send this frame, optionally after a settle delay, and arm the ack
    /// timeout.
    Send {
        request: BoardRequest,
        settle: Option<Duration>,
    },
    /// The Operation finished; deliver the reply unless suppressed.
    Complete {
        client: ClientId,
        reply: ClientReply,
        suppressed: bool,
    },
}

struct ActiveOperation {
    op: Box<dyn Operation>,
    client: ClientId,
    /// Set when the owning client disconnected mid-operation; the Operation
    /// still runs to completion so hardware state stays consistent.
    suppressed: bool,
}

/// Owns and sequences the active Operation.
pub(crate) struct CommandHandler {
    active: Option<ActiveOperation>,
}

impl CommandHandler {
    pub fn new() -> Self {
        CommandHandler { active: None }
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    /// Promote a client request into the active Operation and produce the
    /// first step.
    pub fn start(
        &mut self,
        client: ClientId,
        request: &ClientRequest,
        state: &mut SharedBoardState,
    ) -> HandlerStep {
        debug!(verb = %request.verb, %client, "starting operation");
        let mut op = build_operation(request);
        op.consume_client_request(state);
        self.active = Some(ActiveOperation {
            op,
            client,
            suppressed: false,
        });
        self.next_step()
    }

    /// `true` if the given ack signal belongs to the active Operation.
    pub fn accepts(&self, ack_signal: u16) -> bool {
        self.active
            .as_ref()
            .is_some_and(|a| a.op.is_applicable(ack_signal))
    }

    /// Feed an acknowledgement (real or synthetic) to the active Operation
    /// and produce the next step.
    pub fn on_ack(&mut self, ack: BoardAck, state: &mut SharedBoardState) -> Option<HandlerStep> {
        let active = self.active.as_mut()?;
        active.op.consume_board_ack(ack, state);
        Some(self.next_step())
    }

    /// Suppress the final reply if `client` owns the active Operation.
    pub fn suppress_reply_for(&mut self, client: ClientId) {
        if let Some(active) = self.active.as_mut() {
            if active.client == client {
                debug!(%client, "client gone, operation continues with reply suppressed");
                active.suppressed = true;
            }
        }
    }

    fn next_step(&mut self) -> HandlerStep {
        let active = self.active.as_mut().expect("next_step without operation");
        match active.op.produce_board_request() {
            Some(request) => HandlerStep::Send {
                settle: active.op.settle_delay(),
                request,
            },
            None => {
                let active = self.active.take().expect("operation vanished");
                let reply = active.op.produce_client_reply();
                debug!(verb = %reply.verb, client = %active.client, "operation complete");
                HandlerStep::Complete {
                    client: active.client,
                    reply,
                    suppressed: active.suppressed,
                }
            }
        }
    }
}
