//! Board-level query and control Operations.
//!
//! All five verbs here iterate selected boards ascending with one exchange
//! per board. The queries (version, status, size) collect a per-slot result
//! vector alongside the status array; temperature-limit and reset are
//! control verbs with no result fields.

use acqlib_core::{
    BoardLiveness, ClientReply, ClientRequest, ReplyData, RequestParams, SharedBoardState, Status,
    Verb, NUM_BOARDS,
};
use acqlib_wire::frame::{signal, Frame};

use super::{failure_status, BoardAck, BoardPlan, BoardRequest, Operation};

/// Query the firmware version of each selected board.
pub struct VersionOp {
    plan: BoardPlan,
    versions: Vec<Option<u32>>,
}

impl VersionOp {
    pub fn new(request: &ClientRequest) -> Self {
        VersionOp {
            plan: BoardPlan::new(request.board_mask),
            versions: vec![None; NUM_BOARDS],
        }
    }
}

impl Operation for VersionOp {
    fn verb(&self) -> Verb {
        Verb::Version
    }

    fn is_applicable(&self, ack_signal: u16) -> bool {
        ack_signal == signal::ack_of(signal::VERSION)
    }

    fn consume_client_request(&mut self, state: &mut SharedBoardState) {
        self.plan.plan(state);
    }

    fn produce_board_request(&mut self) -> Option<BoardRequest> {
        self.plan.current().map(|board| BoardRequest {
            board,
            frame: Frame::request(signal::VERSION, 0, vec![]),
        })
    }

    fn consume_board_ack(&mut self, ack: BoardAck, _state: &mut SharedBoardState) {
        match failure_status(&ack) {
            Some(fs) => self.plan.merge_current(fs),
            None => {
                if let BoardAck::Frame(frame) = ack {
                    self.plan.merge_current(Status::from_wire(frame.status));
                    if let Some(board) = self.plan.current() {
                        if frame.payload.len() >= 4 {
                            let v = u32::from_be_bytes([
                                frame.payload[0],
                                frame.payload[1],
                                frame.payload[2],
                                frame.payload[3],
                            ]);
                            self.versions[board.index() as usize] = Some(v);
                        } else {
                            self.plan.merge_current(Status::COMM_ERROR);
                        }
                    }
                }
            }
        }
        self.plan.advance();
    }

    fn produce_client_reply(&self) -> ClientReply {
        ClientReply {
            verb: Verb::Version,
            status: self.plan.statuses(),
            data: ReplyData::Versions(self.versions.clone()),
        }
    }

    fn is_complete(&self) -> bool {
        self.plan.is_done()
    }
}

/// Query the raw hardware status word of each selected board.
pub struct BoardStatusOp {
    plan: BoardPlan,
    words: Vec<Option<u16>>,
}

impl BoardStatusOp {
    pub fn new(request: &ClientRequest) -> Self {
        BoardStatusOp {
            plan: BoardPlan::new(request.board_mask),
            words: vec![None; NUM_BOARDS],
        }
    }
}

impl Operation for BoardStatusOp {
    fn verb(&self) -> Verb {
        Verb::BoardStatus
    }

    fn is_applicable(&self, ack_signal: u16) -> bool {
        ack_signal == signal::ack_of(signal::STATUS)
    }

    fn consume_client_request(&mut self, state: &mut SharedBoardState) {
        self.plan.plan(state);
    }

    fn produce_board_request(&mut self) -> Option<BoardRequest> {
        self.plan.current().map(|board| BoardRequest {
            board,
            frame: Frame::request(signal::STATUS, 0, vec![]),
        })
    }

    fn consume_board_ack(&mut self, ack: BoardAck, _state: &mut SharedBoardState) {
        match failure_status(&ack) {
            Some(fs) => self.plan.merge_current(fs),
            None => {
                if let BoardAck::Frame(frame) = ack {
                    self.plan.merge_current(Status::from_wire(frame.status));
                    if let Some(board) = self.plan.current() {
                        if frame.payload.len() >= 2 {
                            let w = u16::from_be_bytes([frame.payload[0], frame.payload[1]]);
                            self.words[board.index() as usize] = Some(w);
                        } else {
                            self.plan.merge_current(Status::COMM_ERROR);
                        }
                    }
                }
            }
        }
        self.plan.advance();
    }

    fn produce_client_reply(&self) -> ClientReply {
        ClientReply {
            verb: Verb::BoardStatus,
            status: self.plan.statuses(),
            data: ReplyData::HardwareStatus(self.words.clone()),
        }
    }

    fn is_complete(&self) -> bool {
        self.plan.is_done()
    }
}

/// Query the buffer memory size of each selected board.
pub struct SizeOp {
    plan: BoardPlan,
    sizes: Vec<Option<u32>>,
}

impl SizeOp {
    pub fn new(request: &ClientRequest) -> Self {
        SizeOp {
            plan: BoardPlan::new(request.board_mask),
            sizes: vec![None; NUM_BOARDS],
        }
    }
}

impl Operation for SizeOp {
    fn verb(&self) -> Verb {
        Verb::Size
    }

    fn is_applicable(&self, ack_signal: u16) -> bool {
        ack_signal == signal::ack_of(signal::SIZE)
    }

    fn consume_client_request(&mut self, state: &mut SharedBoardState) {
        self.plan.plan(state);
    }

    fn produce_board_request(&mut self) -> Option<BoardRequest> {
        self.plan.current().map(|board| BoardRequest {
            board,
            frame: Frame::request(signal::SIZE, 0, vec![]),
        })
    }

    fn consume_board_ack(&mut self, ack: BoardAck, _state: &mut SharedBoardState) {
        match failure_status(&ack) {
            Some(fs) => self.plan.merge_current(fs),
            None => {
                if let BoardAck::Frame(frame) = ack {
                    self.plan.merge_current(Status::from_wire(frame.status));
                    if let Some(board) = self.plan.current() {
                        if frame.payload.len() >= 4 {
                            let pages = u32::from_be_bytes([
                                frame.payload[0],
                                frame.payload[1],
                                frame.payload[2],
                                frame.payload[3],
                            ]);
                            self.sizes[board.index() as usize] = Some(pages);
                        } else {
                            self.plan.merge_current(Status::COMM_ERROR);
                        }
                    }
                }
            }
        }
        self.plan.advance();
    }

    fn produce_client_reply(&self) -> ClientReply {
        ClientReply {
            verb: Verb::Size,
            status: self.plan.statuses(),
            data: ReplyData::Sizes(self.sizes.clone()),
        }
    }

    fn is_complete(&self) -> bool {
        self.plan.is_done()
    }
}

/// Set the over-temperature shutdown limit on each selected board.
pub struct TempLimitOp {
    plan: BoardPlan,
    limit_c: i16,
}

impl TempLimitOp {
    pub fn new(request: &ClientRequest) -> Self {
        let limit_c = match request.params {
            RequestParams::Temperature { limit_c } => limit_c,
            _ => 0,
        };
        TempLimitOp {
            plan: BoardPlan::new(request.board_mask),
            limit_c,
        }
    }
}

impl Operation for TempLimitOp {
    fn verb(&self) -> Verb {
        Verb::TemperatureLimit
    }

    fn is_applicable(&self, ack_signal: u16) -> bool {
        ack_signal == signal::ack_of(signal::TEMP_LIMIT)
    }

    fn consume_client_request(&mut self, state: &mut SharedBoardState) {
        self.plan.plan(state);
    }

    fn produce_board_request(&mut self) -> Option<BoardRequest> {
        let limit = self.limit_c;
        self.plan.current().map(|board| BoardRequest {
            board,
            frame: Frame::request(signal::TEMP_LIMIT, 0, limit.to_be_bytes().to_vec()),
        })
    }

    fn consume_board_ack(&mut self, ack: BoardAck, _state: &mut SharedBoardState) {
        match failure_status(&ack) {
            Some(fs) => self.plan.merge_current(fs),
            None => {
                if let BoardAck::Frame(frame) = ack {
                    self.plan.merge_current(Status::from_wire(frame.status));
                }
            }
        }
        self.plan.advance();
    }

    fn produce_client_reply(&self) -> ClientReply {
        ClientReply::with_status(Verb::TemperatureLimit, self.plan.statuses())
    }

    fn is_complete(&self) -> bool {
        self.plan.is_done()
    }
}

/// Hard-reset boards, forcing them back through the setup pipeline.
pub struct ResetOp {
    plan: BoardPlan,
}

impl ResetOp {
    pub fn new(request: &ClientRequest) -> Self {
        ResetOp {
            plan: BoardPlan::new(request.board_mask),
        }
    }
}

impl Operation for ResetOp {
    fn verb(&self) -> Verb {
        Verb::Reset
    }

    fn is_applicable(&self, ack_signal: u16) -> bool {
        ack_signal == signal::ack_of(signal::RESET)
    }

    fn consume_client_request(&mut self, state: &mut SharedBoardState) {
        self.plan.plan(state);
    }

    fn produce_board_request(&mut self) -> Option<BoardRequest> {
        self.plan.current().map(|board| BoardRequest {
            board,
            frame: Frame::request(signal::RESET, 0, vec![]),
        })
    }

    fn consume_board_ack(&mut self, ack: BoardAck, state: &mut SharedBoardState) {
        match failure_status(&ack) {
            Some(fs) => self.plan.merge_current(fs),
            None => {
                if let BoardAck::Frame(frame) = ack {
                    let status = Status::from_wire(frame.status);
                    self.plan.merge_current(status);
                    if status.is_success() {
                        if let Some(board) = self.plan.current() {
                            // The board is rebooting: drop it from the ready
                            // set and invalidate all its channel state. The
                            // monitor's next probe cycle restarts setup.
                            let entry = state.board_mut(board);
                            entry.liveness = BoardLiveness::Resetting;
                            entry.setup_retries = 0;
                            state.free_channels_on(board);
                        }
                    }
                }
            }
        }
        self.plan.advance();
    }

    fn produce_client_reply(&self) -> ClientReply {
        ClientReply::with_status(Verb::Reset, self.plan.statuses())
    }

    fn is_complete(&self) -> bool {
        self.plan.is_done()
    }
}
