//! Data read-out and stream configuration Operations.

use acqlib_core::{
    ChannelId, ChannelMode, ClientReply, ClientRequest, ReplyData, RequestParams,
    SharedBoardState, Status, Verb,
};
use acqlib_wire::checksum::fold_checksum;
use acqlib_wire::frame::{signal, Frame};

use super::{failure_status, BoardAck, BoardRequest, ChannelPlan, Operation, Target};

/// Read buffered pages from stopped channels.
///
/// Read-out never collapses to a wildcard: each channel has its own page
/// range, and the page data must be attributed per channel. A channel still
/// recording cannot be read; a free channel has no buffer to read.
pub struct ReadDataOp {
    plan: ChannelPlan,
    start_page: u32,
    page_count: u32,
    pages: Vec<(ChannelId, Vec<u8>)>,
}

impl ReadDataOp {
    pub fn new(request: &ClientRequest) -> Self {
        let (start_page, page_count) = match request.params {
            RequestParams::Read {
                start_page,
                page_count,
            } => (start_page, page_count),
            _ => (0, 0),
        };
        ReadDataOp {
            plan: ChannelPlan::new(request.channel_mask),
            start_page,
            page_count,
            pages: Vec::new(),
        }
    }
}

impl Operation for ReadDataOp {
    fn verb(&self) -> Verb {
        Verb::ReadData
    }

    fn is_applicable(&self, ack_signal: u16) -> bool {
        ack_signal == signal::ack_of(signal::READ_DATA)
    }

    fn consume_client_request(&mut self, state: &mut SharedBoardState) {
        self.plan.plan(state, false, |ch, state| {
            match state.channel(ch).mode {
                ChannelMode::Stopped => Status::SUCCESS,
                ChannelMode::Recording => Status::SELECT_ERROR_CHANNEL,
                _ => Status::NOT_RECORDING,
            }
        });
    }

    fn produce_board_request(&mut self) -> Option<BoardRequest> {
        let mut payload = Vec::with_capacity(8);
        payload.extend_from_slice(&self.start_page.to_be_bytes());
        payload.extend_from_slice(&self.page_count.to_be_bytes());
        self.plan.current().map(|target| BoardRequest {
            board: target.board(),
            frame: Frame::request(signal::READ_DATA, target.wire_channel(), payload),
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
                        state.channel_mut(ch).status = status;
                    }
                    if status.is_success() {
                        // Read-out never collapses, so the target is always
                        // a single channel.
                        if let Some(Target::Single { channel }) = self.plan.current() {
                            self.pages.push((channel, frame.payload));
                        }
                    }
                }
            }
        }
        self.plan.advance();
    }

    fn produce_client_reply(&self) -> ClientReply {
        ClientReply {
            verb: Verb::ReadData,
            status: self.plan.statuses(),
            data: ReplyData::Pages(self.pages.clone()),
        }
    }

    fn is_complete(&self) -> bool {
        self.plan.is_done()
    }
}

/// Length of the stream setup header carried in the request payload.
const STREAM_HEADER_LEN: usize = 12;

/// Configure data streaming for channels.
///
/// The request payload is a 12-byte header the board forwards verbatim into
/// its streaming engine, protected by the one's-complement checksum:
///
/// ```text
/// offset 0..6    destination hardware address
/// offset 6..8    stream id            u16
/// offset 8       channel              u8
/// offset 9       reserved (zero)
/// offset 10..12  checksum             u16
/// ```
pub struct StreamSetupOp {
    plan: ChannelPlan,
    dest_addr: [u8; 6],
    stream_id: u16,
}

impl StreamSetupOp {
    pub fn new(request: &ClientRequest) -> Self {
        let (dest_addr, stream_id) = match request.params {
            RequestParams::Stream {
                dest_addr,
                stream_id,
            } => (dest_addr, stream_id),
            _ => ([0; 6], 0),
        };
        StreamSetupOp {
            plan: ChannelPlan::new(request.channel_mask),
            dest_addr,
            stream_id,
        }
    }

    fn header(&self, wire_channel: u8) -> Vec<u8> {
        let mut buf = vec![0u8; STREAM_HEADER_LEN];
        buf[0..6].copy_from_slice(&self.dest_addr);
        buf[6..8].copy_from_slice(&self.stream_id.to_be_bytes());
        buf[8] = wire_channel;
        let ck = fold_checksum(&buf);
        buf[10..12].copy_from_slice(&ck.to_be_bytes());
        buf
    }
}

impl Operation for StreamSetupOp {
    fn verb(&self) -> Verb {
        Verb::StreamSetup
    }

    fn is_applicable(&self, ack_signal: u16) -> bool {
        ack_signal == signal::ack_of(signal::STREAM_SETUP)
    }

    fn consume_client_request(&mut self, state: &mut SharedBoardState) {
        self.plan.plan(state, true, |_, _| Status::SUCCESS);
    }

    fn produce_board_request(&mut self) -> Option<BoardRequest> {
        self.plan.current().map(|target| BoardRequest {
            board: target.board(),
            frame: Frame::request(
                signal::STREAM_SETUP,
                target.wire_channel(),
                self.header(target.wire_channel()),
            ),
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
                        state.channel_mut(ch).status = status;
                    }
                }
            }
        }
        self.plan.advance();
    }

    fn produce_client_reply(&self) -> ClientReply {
        ClientReply::with_status(Verb::StreamSetup, self.plan.statuses())
    }

    fn is_complete(&self) -> bool {
        self.plan.is_done()
    }
}
