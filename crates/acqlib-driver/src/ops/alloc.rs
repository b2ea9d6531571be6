//! Allocate and free Operations.
//!
//! Allocation claims channels and starts them recording into the board
//! buffer; free releases them back to the pool. Free is idempotent: freeing
//! an already-free channel is "nothing to do" and reports success.

use acqlib_core::{
    ChannelEntry, ChannelMode, ClientReply, ClientRequest, SharedBoardState, Status, Verb,
};
use acqlib_wire::frame::{signal, Frame};

use super::{failure_status, BoardAck, BoardRequest, ChannelPlan, Operation, Target};

/// Claim channels and start recording.
pub struct AllocateOp {
    plan: ChannelPlan,
}

impl AllocateOp {
    pub fn new(request: &ClientRequest) -> Self {
        AllocateOp {
            plan: ChannelPlan::new(request.channel_mask),
        }
    }
}

impl Operation for AllocateOp {
    fn verb(&self) -> Verb {
        Verb::Allocate
    }

    fn is_applicable(&self, ack_signal: u16) -> bool {
        ack_signal == signal::ack_of(signal::ALLOCATE)
    }

    fn consume_client_request(&mut self, state: &mut SharedBoardState) {
        // A channel already recording cannot be re-allocated.
        self.plan.plan(state, true, |ch, state| {
            match state.channel(ch).mode {
                ChannelMode::Recording => Status::SELECT_ERROR_CHANNEL,
                _ => Status::SUCCESS,
            }
        });
    }

    fn produce_board_request(&mut self) -> Option<BoardRequest> {
        self.plan.current().map(|target| BoardRequest {
            board: target.board(),
            frame: Frame::request(signal::ALLOCATE, target.wire_channel(), vec![]),
        })
    }

    fn consume_board_ack(&mut self, ack: BoardAck, state: &mut SharedBoardState) {
        match failure_status(&ack) {
            Some(fs) => {
                self.plan.merge_current(fs);
                for ch in self.plan.current_channels() {
                    state.channel_mut(ch).status |= fs;
                }
            }
            None => {
                if let BoardAck::Frame(frame) = ack {
                    let status = Status::from_wire(frame.status);
                    self.plan.merge_current(status);
                    for ch in self.plan.current_channels() {
                        let entry = state.channel_mut(ch);
                        entry.status = status;
                        if status.is_success() {
                            entry.mode = ChannelMode::Recording;
                            entry.selected = true;
                        }
                    }
                    // A single-channel ack reports where the board placed
                    // the buffer; a wildcard ack carries no per-channel
                    // layout.
                    if status.is_success() && frame.payload.len() >= 4 {
                        if let Some(Target::Single { channel }) = self.plan.current() {
                            state.channel_mut(channel).start_addr = u32::from_be_bytes([
                                frame.payload[0],
                                frame.payload[1],
                                frame.payload[2],
                                frame.payload[3],
                            ]);
                        }
                    }
                }
            }
        }
        self.plan.advance();
    }

    fn produce_client_reply(&self) -> ClientReply {
        ClientReply::with_status(Verb::Allocate, self.plan.statuses())
    }

    fn is_complete(&self) -> bool {
        self.plan.is_done()
    }
}

/// Release channels back to the free pool.
pub struct FreeOp {
    plan: ChannelPlan,
}

impl FreeOp {
    pub fn new(request: &ClientRequest) -> Self {
        FreeOp {
            plan: ChannelPlan::new(request.channel_mask),
        }
    }
}

impl Operation for FreeOp {
    fn verb(&self) -> Verb {
        Verb::Free
    }

    fn is_applicable(&self, ack_signal: u16) -> bool {
        ack_signal == signal::ack_of(signal::FREE)
    }

    fn consume_client_request(&mut self, state: &mut SharedBoardState) {
        // Free is always valid; an already-free channel is a no-op.
        self.plan.plan(state, true, |_, _| Status::SUCCESS);
    }

    fn produce_board_request(&mut self) -> Option<BoardRequest> {
        self.plan.current().map(|target| BoardRequest {
            board: target.board(),
            frame: Frame::request(signal::FREE, target.wire_channel(), vec![]),
        })
    }

    fn consume_board_ack(&mut self, ack: BoardAck, state: &mut SharedBoardState) {
        match failure_status(&ack) {
            Some(fs) => {
                self.plan.merge_current(fs);
                for ch in self.plan.current_channels() {
                    state.channel_mut(ch).status |= fs;
                }
            }
            None => {
                if let BoardAck::Frame(frame) = ack {
                    let status = Status::from_wire(frame.status);
                    self.plan.merge_current(status);
                    if status.is_success() {
                        for ch in self.plan.current_channels() {
                            *state.channel_mut(ch) = ChannelEntry::default();
                        }
                    } else {
                        for ch in self.plan.current_channels() {
                            state.channel_mut(ch).status |= status;
                        }
                    }
                }
            }
        }
        self.plan.advance();
    }

    fn produce_client_reply(&self) -> ClientReply {
        ClientReply::with_status(Verb::Free, self.plan.statuses())
    }

    fn is_complete(&self) -> bool {
        self.plan.is_done()
    }
}
