//! The per-board setup pipeline.
//!
//! A board entering the bank (or coming back from a reset) walks a fixed
//! forward-only sequence before it accepts client commands: clear firmware
//! registers, reconfigure the active image, enable the watchdog, enable
//! link-level address resolution, free all channels, then a final liveness
//! probe. One board runs at a time with one outstanding request; each step
//! has a bounded retry budget, and exhausting it parks the board in `Error`
//! until a later probe cycle reports it alive again.

use acqlib_core::{BoardId, BoardLiveness, SharedBoardState, Status, NUM_BOARDS, WILDCARD_CHANNEL};
use acqlib_wire::frame::{signal, Frame};
use tracing::{debug, info, warn};

use crate::ops::BoardRequest;

/// Notification the driver surfaces when a pipeline finishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SetupEvent {
    /// The board completed setup and is ready for commands.
    Ready(BoardId),
    /// Retries exhausted; the board is parked in `Error`.
    Failed(BoardId),
}

/// Drives boards through the setup pipeline, one at a time.
pub(crate) struct SetupEngine {
    max_retries: u32,
}

impl SetupEngine {
    pub fn new(max_retries: u32) -> Self {
        SetupEngine { max_retries }
    }

    /// Put a board at the head of the pipeline.
    pub fn begin(&self, board: BoardId, state: &mut SharedBoardState) {
        let entry = state.board_mut(board);
        info!(%board, "entering setup pipeline");
        entry.liveness = BoardLiveness::ClearingFirmware;
        entry.setup_retries = 0;
    }

    /// The board whose pipeline runs next, lowest slot first.
    pub fn current_board(&self, state: &SharedBoardState) -> Option<BoardId> {
        (0..NUM_BOARDS as u8)
            .map(BoardId::from_index)
            .find(|&id| state.board(id).liveness.in_setup())
    }

    /// Build the wire request for a board's current pipeline step.
    pub fn next_request(&self, state: &SharedBoardState) -> Option<BoardRequest> {
        let board = self.current_board(state)?;
        let entry = state.board(board);
        let frame = match entry.liveness {
            // Waiting for a reset board to come back: poll with a probe.
            BoardLiveness::Resetting => Frame::request(signal::PROBE, 0, vec![]),
            BoardLiveness::ClearingFirmware => Frame::request(signal::CLEAR_FIRMWARE, 0, vec![]),
            BoardLiveness::LoadingImage => {
                Frame::request(signal::LOAD_IMAGE, 0, vec![entry.image_slot])
            }
            BoardLiveness::EnablingWatchdog => Frame::request(signal::WATCHDOG_ENABLE, 0, vec![]),
            BoardLiveness::EnablingArp => Frame::request(signal::ARP_ENABLE, 0, vec![]),
            BoardLiveness::Freeing => Frame::request(signal::FREE, WILDCARD_CHANNEL, vec![]),
            BoardLiveness::Alive => Frame::request(signal::PROBE, 0, vec![]),
            // Not in the pipeline.
            _ => return None,
        };
        Some(BoardRequest { board, frame })
    }

    /// Consume the current step's acknowledgement and advance the pipeline.
    pub fn on_ack(
        &self,
        board: BoardId,
        frame: &Frame,
        state: &mut SharedBoardState,
    ) -> Option<SetupEvent> {
        let status = Status::from_wire(frame.status);
        if !status.is_success() {
            return self.step_failed(board, state);
        }

        let entry = state.board_mut(board);
        entry.setup_retries = 0;
        let next = match entry.liveness {
            BoardLiveness::Resetting => BoardLiveness::ClearingFirmware,
            BoardLiveness::ClearingFirmware => {
                // An operator-loaded image survives the reset; do not
                // reconfigure over it.
                if entry.preserve_image {
                    BoardLiveness::EnablingWatchdog
                } else {
                    BoardLiveness::LoadingImage
                }
            }
            BoardLiveness::LoadingImage => BoardLiveness::EnablingWatchdog,
            BoardLiveness::EnablingWatchdog => BoardLiveness::EnablingArp,
            BoardLiveness::EnablingArp => BoardLiveness::Freeing,
            BoardLiveness::Freeing => BoardLiveness::Alive,
            BoardLiveness::Alive => {
                entry.liveness = BoardLiveness::Ready;
                entry.silent_cycles = 0;
                state.free_channels_on(board);
                info!(%board, "setup complete");
                return Some(SetupEvent::Ready(board));
            }
            _ => return None,
        };
        debug!(%board, from = %entry.liveness, to = %next, "setup step done");
        entry.liveness = next;
        None
    }

    /// Handle a step timeout: retry up to the budget, then park the board.
    pub fn on_timeout(&self, board: BoardId, state: &mut SharedBoardState) -> Option<SetupEvent> {
        self.step_failed(board, state)
    }

    fn step_failed(&self, board: BoardId, state: &mut SharedBoardState) -> Option<SetupEvent> {
        let entry = state.board_mut(board);
        entry.setup_retries += 1;
        if entry.setup_retries >= self.max_retries {
            warn!(%board, step = %entry.liveness, "setup retries exhausted");
            entry.liveness = BoardLiveness::Error;
            entry.setup_retries = 0;
            return Some(SetupEvent::Failed(board));
        }
        debug!(%board, step = %entry.liveness, retry = entry.setup_retries, "setup step retry");
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok_ack(request_signal: u16) -> Frame {
        Frame::ack(request_signal, 0, 0, vec![])
    }

    fn drive_to_ready(engine: &SetupEngine, board: BoardId, state: &mut SharedBoardState) {
        loop {
            let Some(req) = engine.next_request(state) else {
                break;
            };
            assert_eq!(req.board, board);
            if let Some(SetupEvent::Ready(b)) =
                engine.on_ack(board, &ok_ack(req.frame.signal), state)
            {
                assert_eq!(b, board);
                break;
            }
        }
    }

    #[test]
    fn pipeline_walks_every_step_in_order() {
        let mut state = SharedBoardState::new();
        let board = BoardId::from_index(0);
        let engine = SetupEngine::new(3);
        engine.begin(board, &mut state);

        let mut steps = Vec::new();
        loop {
            let req = engine.next_request(&state).unwrap();
            steps.push(req.frame.signal);
            if let Some(SetupEvent::Ready(_)) =
                engine.on_ack(board, &ok_ack(req.frame.signal), &mut state)
            {
                break;
            }
        }

        assert_eq!(
            steps,
            vec![
                signal::CLEAR_FIRMWARE,
                signal::LOAD_IMAGE,
                signal::WATCHDOG_ENABLE,
                signal::ARP_ENABLE,
                signal::FREE,
                signal::PROBE,
            ]
        );
        assert_eq!(state.board(board).liveness, BoardLiveness::Ready);
    }

    #[test]
    fn free_all_step_uses_wildcard_channel() {
        let mut state = SharedBoardState::new();
        let board = BoardId::from_index(0);
        state.board_mut(board).liveness = BoardLiveness::Freeing;
        let engine = SetupEngine::new(3);

        let req = engine.next_request(&state).unwrap();
        assert_eq!(req.frame.signal, signal::FREE);
        assert_eq!(req.frame.channel, WILDCARD_CHANNEL);
    }

    #[test]
    fn preserve_image_skips_image_reconfiguration() {
        let mut state = SharedBoardState::new();
        let board = BoardId::from_index(2);
        let engine = SetupEngine::new(3);
        engine.begin(board, &mut state);
        state.board_mut(board).preserve_image = true;

        engine.on_ack(board, &ok_ack(signal::CLEAR_FIRMWARE), &mut state);
        assert_eq!(
            state.board(board).liveness,
            BoardLiveness::EnablingWatchdog
        );
    }

    #[test]
    fn retries_exhaust_to_error() {
        let mut state = SharedBoardState::new();
        let board = BoardId::from_index(1);
        let engine = SetupEngine::new(3);
        engine.begin(board, &mut state);

        assert_eq!(engine.on_timeout(board, &mut state), None);
        assert_eq!(engine.on_timeout(board, &mut state), None);
        assert_eq!(
            engine.on_timeout(board, &mut state),
            Some(SetupEvent::Failed(board))
        );
        assert_eq!(state.board(board).liveness, BoardLiveness::Error);
        // An errored board leaves the pipeline.
        assert!(engine.next_request(&state).is_none());
    }

    #[test]
    fn error_status_ack_counts_as_failure() {
        let mut state = SharedBoardState::new();
        let board = BoardId::from_index(0);
        let engine = SetupEngine::new(2);
        engine.begin(board, &mut state);

        let bad = Frame::ack(signal::CLEAR_FIRMWARE, 0, Status::COMM_ERROR.bits(), vec![]);
        assert_eq!(engine.on_ack(board, &bad, &mut state), None);
        assert_eq!(
            engine.on_ack(board, &bad, &mut state),
            Some(SetupEvent::Failed(board))
        );
    }

    #[test]
    fn reset_board_polls_with_probe_until_back() {
        let mut state = SharedBoardState::new();
        let board = BoardId::from_index(0);
        state.board_mut(board).liveness = BoardLiveness::Resetting;
        let engine = SetupEngine::new(3);

        let req = engine.next_request(&state).unwrap();
        assert_eq!(req.frame.signal, signal::PROBE);
        engine.on_ack(board, &ok_ack(signal::PROBE), &mut state);
        assert_eq!(
            state.board(board).liveness,
            BoardLiveness::ClearingFirmware
        );
    }

    #[test]
    fn ready_board_channels_start_free() {
        let mut state = SharedBoardState::new();
        let board = BoardId::from_index(0);
        let ch = acqlib_core::ChannelId::from_index(4);
        state.channel_mut(ch).mode = acqlib_core::ChannelMode::Recording;

        let engine = SetupEngine::new(3);
        engine.begin(board, &mut state);
        drive_to_ready(&engine, board, &mut state);

        assert_eq!(state.channel(ch).mode, acqlib_core::ChannelMode::Free);
    }

    #[test]
    fn lowest_slot_runs_first() {
        let mut state = SharedBoardState::new();
        let engine = SetupEngine::new(3);
        engine.begin(BoardId::from_index(5), &mut state);
        engine.begin(BoardId::from_index(2), &mut state);

        assert_eq!(engine.current_board(&state), Some(BoardId::from_index(2)));
    }
}
