//! Flash image write and image metadata query Operations.
//!
//! A flash-image write runs a fixed stage pipeline per board: unprotect,
//! erase every sector of the slot's region, then write and read-verify the
//! image block by block, write and verify the info block, and finally
//! re-protect. Any failure along the way skips straight to the protect
//! stage so a board is never left with its flash writable.

use std::time::Duration;

use acqlib_core::{
    ClientReply, ClientRequest, ImageMeta, ReplyData, RequestParams, SharedBoardState, Status,
    Verb, NUM_BOARDS,
};
use acqlib_wire::flash::{
    block_addr, blocks_for, decode_info, encode_info, info_addr, sector_addr, FACTORY_PASSWORD,
    FACTORY_SLOT, IMAGE_SLOTS, INFO_BLOCK_SIZE, MAX_IMAGE_LEN, SECTORS_PER_IMAGE,
};
use acqlib_wire::frame::{signal, Frame};

use super::{failure_status, BoardAck, BoardPlan, BoardRequest, Operation};

/// Settle time the flash needs after a sector erase before the next
/// request.
const ERASE_SETTLE: Duration = Duration::from_millis(20);

/// Per-board position in the write pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Unprotect,
    Erase(usize),
    Write(usize),
    Verify(usize),
    WriteInfo,
    VerifyInfo,
    Protect,
}

/// Write a firmware/data image into a flash slot on each selected board.
pub struct FlashWriteOp {
    plan: BoardPlan,
    stage: Stage,
    slot: u8,
    password: u32,
    meta: ImageMeta,
    image: Vec<u8>,
    settle: Option<Duration>,
}

impl FlashWriteOp {
    pub fn new(request: &ClientRequest) -> Self {
        let (slot, password, meta, image) = match &request.params {
            RequestParams::FlashWrite {
                slot,
                password,
                meta,
                image,
            } => (*slot, *password, meta.clone(), image.clone()),
            _ => (
                0,
                0,
                ImageMeta {
                    version: 0,
                    timestamp: 0,
                    artifact: String::new(),
                },
                Vec::new(),
            ),
        };
        FlashWriteOp {
            plan: BoardPlan::new(request.board_mask),
            stage: Stage::Unprotect,
            slot,
            password,
            meta,
            image,
            settle: None,
        }
    }

    /// The image bytes covered by write/verify block `block`.
    fn chunk(&self, block: usize) -> &[u8] {
        let start = block * acqlib_wire::flash::BLOCK_SIZE;
        let end = (start + acqlib_wire::flash::BLOCK_SIZE).min(self.image.len());
        &self.image[start..end]
    }

    fn block_count(&self) -> usize {
        blocks_for(self.image.len())
    }

    /// Next stage after a successful step.
    fn next_stage(&self, stage: Stage) -> Option<Stage> {
        match stage {
            Stage::Unprotect => Some(Stage::Erase(0)),
            Stage::Erase(s) if s + 1 < SECTORS_PER_IMAGE => Some(Stage::Erase(s + 1)),
            Stage::Erase(_) => {
                if self.block_count() > 0 {
                    Some(Stage::Write(0))
                } else {
                    Some(Stage::WriteInfo)
                }
            }
            Stage::Write(b) => Some(Stage::Verify(b)),
            Stage::Verify(b) if b + 1 < self.block_count() => Some(Stage::Write(b + 1)),
            Stage::Verify(_) => Some(Stage::WriteInfo),
            Stage::WriteInfo => Some(Stage::VerifyInfo),
            Stage::VerifyInfo => Some(Stage::Protect),
            Stage::Protect => None,
        }
    }

    /// Finish the current board and line up the next one.
    fn finish_board(&mut self) {
        self.plan.advance();
        self.stage = Stage::Unprotect;
    }

    /// Verify a read-back against the bytes that were written.
    fn verify_payload(&self, stage: Stage, payload: &[u8]) -> bool {
        match stage {
            Stage::Verify(b) => payload == self.chunk(b),
            Stage::VerifyInfo => payload == encode_info(&self.meta),
            _ => true,
        }
    }
}

impl Operation for FlashWriteOp {
    fn verb(&self) -> Verb {
        Verb::WriteFlashImage
    }

    fn is_applicable(&self, ack_signal: u16) -> bool {
        matches!(
            signal::request_of(ack_signal),
            signal::FLASH_UNPROTECT
                | signal::FLASH_ERASE
                | signal::FLASH_WRITE
                | signal::FLASH_READ
                | signal::FLASH_PROTECT
        ) && signal::is_ack(ack_signal)
    }

    fn consume_client_request(&mut self, state: &mut SharedBoardState) {
        self.plan.plan(state);
        if self.slot >= IMAGE_SLOTS || self.image.len() > MAX_IMAGE_LEN {
            self.plan.fail_all(Status::FLASH_ERROR);
            return;
        }
        if self.slot == FACTORY_SLOT && self.password != FACTORY_PASSWORD {
            self.plan.fail_all(Status::BAD_PASSWORD);
        }
    }

    fn produce_board_request(&mut self) -> Option<BoardRequest> {
        let board = self.plan.current()?;
        let frame = match self.stage {
            Stage::Unprotect => Frame::request(
                signal::FLASH_UNPROTECT,
                0,
                self.password.to_be_bytes().to_vec(),
            ),
            Stage::Erase(s) => Frame::request(
                signal::FLASH_ERASE,
                0,
                sector_addr(self.slot, s).to_be_bytes().to_vec(),
            ),
            Stage::Write(b) => {
                let mut payload = block_addr(self.slot, b).to_be_bytes().to_vec();
                payload.extend_from_slice(self.chunk(b));
                Frame::request(signal::FLASH_WRITE, 0, payload)
            }
            Stage::Verify(b) => {
                let mut payload = block_addr(self.slot, b).to_be_bytes().to_vec();
                payload.extend_from_slice(&(self.chunk(b).len() as u16).to_be_bytes());
                Frame::request(signal::FLASH_READ, 0, payload)
            }
            Stage::WriteInfo => {
                let mut payload = info_addr(self.slot).to_be_bytes().to_vec();
                payload.extend_from_slice(&encode_info(&self.meta));
                Frame::request(signal::FLASH_WRITE, 0, payload)
            }
            Stage::VerifyInfo => {
                let mut payload = info_addr(self.slot).to_be_bytes().to_vec();
                payload.extend_from_slice(&(INFO_BLOCK_SIZE as u16).to_be_bytes());
                Frame::request(signal::FLASH_READ, 0, payload)
            }
            Stage::Protect => Frame::request(signal::FLASH_PROTECT, 0, vec![]),
        };
        Some(BoardRequest { board, frame })
    }

    fn consume_board_ack(&mut self, ack: BoardAck, _state: &mut SharedBoardState) {
        self.settle = None;
        let stage = self.stage;

        let step_status = match failure_status(&ack) {
            Some(fs) => fs,
            None => match &ack {
                BoardAck::Frame(frame) => {
                    let status = Status::from_wire(frame.status);
                    if status.is_success() && !self.verify_payload(stage, &frame.payload) {
                        Status::FLASH_ERROR
                    } else {
                        status
                    }
                }
                _ => unreachable!(),
            },
        };

        if step_status.is_success() {
            if let Stage::Erase(_) = stage {
                self.settle = Some(ERASE_SETTLE);
            }
            match self.next_stage(stage) {
                Some(next) => self.stage = next,
                None => self.finish_board(),
            }
        } else {
            self.plan.merge_current(step_status);
            if stage == Stage::Protect {
                // Protect itself failed; nothing left to salvage here.
                self.finish_board();
            } else {
                // Abort the pipeline but always re-protect the flash.
                self.stage = Stage::Protect;
            }
        }
    }

    fn produce_client_reply(&self) -> ClientReply {
        ClientReply::with_status(Verb::WriteFlashImage, self.plan.statuses())
    }

    fn is_complete(&self) -> bool {
        self.plan.is_done()
    }

    fn settle_delay(&self) -> Option<Duration> {
        self.settle
    }
}

/// Read back flash image metadata for one slot on each selected board.
pub struct ImageInfoOp {
    plan: BoardPlan,
    slot: u8,
    metas: Vec<Option<ImageMeta>>,
}

impl ImageInfoOp {
    pub fn new(request: &ClientRequest) -> Self {
        let slot = match request.params {
            RequestParams::ImageSlot { slot } => slot,
            _ => 0,
        };
        ImageInfoOp {
            plan: BoardPlan::new(request.board_mask),
            slot,
            metas: vec![None; NUM_BOARDS],
        }
    }
}

impl Operation for ImageInfoOp {
    fn verb(&self) -> Verb {
        Verb::ImageInfo
    }

    fn is_applicable(&self, ack_signal: u16) -> bool {
        ack_signal == signal::ack_of(signal::IMAGE_INFO)
    }

    fn consume_client_request(&mut self, state: &mut SharedBoardState) {
        self.plan.plan(state);
        if self.slot >= IMAGE_SLOTS {
            self.plan.fail_all(Status::FLASH_ERROR);
        }
    }

    fn produce_board_request(&mut self) -> Option<BoardRequest> {
        let slot = self.slot;
        self.plan.current().map(|board| BoardRequest {
            board,
            frame: Frame::request(signal::IMAGE_INFO, 0, vec![slot]),
        })
    }

    fn consume_board_ack(&mut self, ack: BoardAck, _state: &mut SharedBoardState) {
        match failure_status(&ack) {
            Some(fs) => self.plan.merge_current(fs),
            None => {
                if let BoardAck::Frame(frame) = ack {
                    let status = Status::from_wire(frame.status);
                    self.plan.merge_current(status);
                    if status.is_success() {
                        if let Some(board) = self.plan.current() {
                            match decode_info(&frame.payload) {
                                Ok(meta) => self.metas[board.index() as usize] = Some(meta),
                                Err(_) => self.plan.merge_current(Status::COMM_ERROR),
                            }
                        }
                    }
                }
            }
        }
        self.plan.advance();
    }

    fn produce_client_reply(&self) -> ClientReply {
        ClientReply {
            verb: Verb::ImageInfo,
            status: self.plan.statuses(),
            data: ReplyData::ImageInfo(self.metas.clone()),
        }
    }

    fn is_complete(&self) -> bool {
        self.plan.is_done()
    }
}
