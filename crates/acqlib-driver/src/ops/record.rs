//! Record and stop Operations.
//!
//! Stop is idempotent: a channel that is not recording is "nothing to do"
//! and reports success. After a wildcard stop ack the driver does not
//! re-verify per-channel state on the board; the single ack status is
//! fanned out to every channel of that board, which keeps a full-board stop
//! at one wire exchange.

use acqlib_core::{ChannelMode, ClientReply, ClientRequest, SharedBoardState, Status, Verb};
use acqlib_wire::frame::{signal, Frame};

use super::{failure_status, BoardAck, BoardRequest, ChannelPlan, Operation, Target};

/// (Re)start recording on allocated channels.
pub struct RecordOp {
    plan: ChannelPlan,
}

impl RecordOp {
    pub fn new(request: &ClientRequest) -> Self {
        RecordOp {
            plan: ChannelPlan::new(request.channel_mask),
        }
    }
}

impl Operation for RecordOp {
    fn verb(&self) -> Verb {
        Verb::Record
    }

    fn is_applicable(&self, ack_signal: u16) -> bool {
        ack_signal == signal::ack_of(signal::RECORD)
    }

    fn consume_client_request(&mut self, state: &mut SharedBoardState) {
        // Recording requires a prior allocate; a free channel has no buffer.
        self.plan.plan(state, true, |ch, state| {
            match state.channel(ch).mode {
                ChannelMode::Free => Status::SELECT_ERROR_CHANNEL,
                _ => Status::SUCCESS,
            }
        });
    }

    fn produce_board_request(&mut self) -> Option<BoardRequest> {
        self.plan.current().map(|target| BoardRequest {
            board: target.board(),
            frame: Frame::request(signal::RECORD, target.wire_channel(), vec![]),
        })
    }

    fn consume_board_ack(&mut self, ack: BoardAck, state: &mut SharedBoardState) {
        match failure_status(&ack) {
            Some(fs) => self.plan.merge_current(fs),
            None => {
                if let BoardAck::Frame(frame) = ack {
                    let status = Status::from_wire(frame.status);
                    self.plan.merge_current(status);
                    for ch in self.plan.current_channels() {
                        let entry = state.channel_mut(ch);
                        entry.status = status;
                        if status.is_success() {
                            entry.mode = ChannelMode::Recording;
                        }
                    }
                }
            }
        }
        self.plan.advance();
    }

    fn produce_client_reply(&self) -> ClientReply {
        ClientReply::with_status(Verb::Record, self.plan.statuses())
    }

    fn is_complete(&self) -> bool {
        self.plan.is_done()
    }
}

/// Stop recording. Idempotent on non-recording channels.
pub struct StopOp {
    plan: ChannelPlan,
}

impl StopOp {
    pub fn new(request: &ClientRequest) -> Self {
        StopOp {
            plan: ChannelPlan::new(request.channel_mask),
        }
    }
}

impl Operation for StopOp {
    fn verb(&self) -> Verb {
        Verb::Stop
    }

    fn is_applicable(&self, ack_signal: u16) -> bool {
        ack_signal == signal::ack_of(signal::STOP)
    }

    fn consume_client_request(&mut self, state: &mut SharedBoardState) {
        self.plan.plan(state, true, |_, _| Status::SUCCESS);
    }

    fn produce_board_request(&mut self) -> Option<BoardRequest> {
        self.plan.current().map(|target| BoardRequest {
            board: target.board(),
            frame: Frame::request(signal::STOP, target.wire_channel(), vec![]),
        })
    }

    fn consume_board_ack(&mut self, ack: BoardAck, state: &mut SharedBoardState) {
        match failure_status(&ack) {
            Some(fs) => self.plan.merge_current(fs),
            None => {
                if let BoardAck::Frame(frame) = ack {
                    let status = Status::from_wire(frame.status);
                    self.plan.merge_current(status);
                    for ch in self.plan.current_channels() {
                        let entry = state.channel_mut(ch);
                        entry.status = status;
                        // Only a channel that was actually recording moves
                        // to Stopped; the rest keep their mode.
                        if status.is_success() && entry.mode == ChannelMode::Recording {
                            entry.mode = ChannelMode::Stopped;
                        }
                    }
                    // A single-channel ack reports how many pages were
                    // captured; a wildcard ack carries no per-channel
                    // count.
                    if status.is_success() && frame.payload.len() >= 4 {
                        if let Some(Target::Single { channel }) = self.plan.current() {
                            state.channel_mut(channel).page_count = u32::from_be_bytes([
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
        ClientReply::with_status(Verb::Stop, self.plan.statuses())
    }

    fn is_complete(&self) -> bool {
        self.plan.is_done()
    }
}
