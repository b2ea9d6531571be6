//! The shared per-board / per-channel status table.
//!
//! [`SharedBoardState`] is the single source of truth for what the driver
//! believes about the hardware. Under the cooperative dispatch model it is
//! mutated only by the active Operation and the liveness monitor, and read
//! by query verbs, so no locking is needed.

use crate::status::Status;
use crate::types::{
    BoardId, BoardLiveness, BoardMask, ChannelId, ChannelMode, TriggerConfig, NUM_BOARDS,
    NUM_CHANNELS,
};

/// Bookkeeping for one board slot.
#[derive(Debug, Clone)]
pub struct BoardEntry {
    /// Liveness / setup-pipeline state.
    pub liveness: BoardLiveness,
    /// Firmware image slot the board reported as loaded.
    pub image_slot: u8,
    /// Link-layer hardware address of the board.
    pub hw_addr: [u8; 6],
    /// Retry counter for the current setup step.
    pub setup_retries: u32,
    /// Consecutive probe cycles with no reply.
    pub silent_cycles: u32,
    /// Set when an Operation touched this board since the last probe cycle;
    /// the monitor skips recently-used boards for one cycle.
    pub recently_used: bool,
    /// Set when an operator loaded a non-default image that a setup pass
    /// must not overwrite.
    pub preserve_image: bool,
}

impl Default for BoardEntry {
    fn default() -> Self {
        BoardEntry {
            liveness: BoardLiveness::NoBoard,
            image_slot: 0,
            hw_addr: [0; 6],
            setup_retries: 0,
            silent_cycles: 0,
            recently_used: false,
            preserve_image: false,
        }
    }
}

/// Bookkeeping for one logical channel.
#[derive(Debug, Clone, Default)]
pub struct ChannelEntry {
    /// Recording state.
    pub mode: ChannelMode,
    /// Last status reported for this channel.
    pub status: Status,
    /// Selection flag from the most recent allocate.
    pub selected: bool,
    /// Buffer start address the board reported when the channel was
    /// allocated.
    pub start_addr: u32,
    /// Page count the board reported when recording stopped.
    pub page_count: u32,
    /// Trigger configuration.
    pub trigger: TriggerConfig,
}

/// Complete driver-side view of the board bank.
#[derive(Debug, Clone)]
pub struct SharedBoardState {
    boards: Vec<BoardEntry>,
    channels: Vec<ChannelEntry>,
}

impl Default for SharedBoardState {
    fn default() -> Self {
        SharedBoardState {
            boards: vec![BoardEntry::default(); NUM_BOARDS],
            channels: vec![ChannelEntry::default(); NUM_CHANNELS],
        }
    }
}

impl SharedBoardState {
    /// Fresh table with every slot `NoBoard` and every channel `Free`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared borrow of one board entry.
    pub fn board(&self, id: BoardId) -> &BoardEntry {
        &self.boards[id.index() as usize]
    }

    /// Mutable borrow of one board entry.
    pub fn board_mut(&mut self, id: BoardId) -> &mut BoardEntry {
        &mut self.boards[id.index() as usize]
    }

    /// Shared borrow of one channel entry.
    pub fn channel(&self, id: ChannelId) -> &ChannelEntry {
        &self.channels[id.index() as usize]
    }

    /// Mutable borrow of one channel entry.
    pub fn channel_mut(&mut self, id: ChannelId) -> &mut ChannelEntry {
        &mut self.channels[id.index() as usize]
    }

    /// `true` if the board accepts client commands.
    pub fn board_ready(&self, id: BoardId) -> bool {
        self.board(id).liveness.is_ready()
    }

    /// Mask of boards currently in the `Ready` state.
    pub fn ready_mask(&self) -> BoardMask {
        let mut mask = BoardMask::EMPTY;
        for i in 0..NUM_BOARDS as u8 {
            let id = BoardId::from_index(i);
            if self.board_ready(id) {
                mask.insert(id);
            }
        }
        mask
    }

    /// Mask of boards considered present (anything except `NoBoard`).
    pub fn present_mask(&self) -> BoardMask {
        let mut mask = BoardMask::EMPTY;
        for i in 0..NUM_BOARDS as u8 {
            let id = BoardId::from_index(i);
            if self.board(id).liveness != BoardLiveness::NoBoard {
                mask.insert(id);
            }
        }
        mask
    }

    /// `true` if any board is partway through the setup pipeline.
    pub fn any_board_in_setup(&self) -> bool {
        self.boards.iter().any(|b| b.liveness.in_setup())
    }

    /// Reset every channel on `board` to `Free` with success status.
    ///
    /// Used by the setup pipeline's free-all step and after a board drops
    /// out of the bank.
    pub fn free_channels_on(&mut self, board: BoardId) {
        for i in 0..NUM_CHANNELS as u8 {
            let ch = ChannelId::from_index(i);
            if ch.board() == board {
                self.channels[i as usize] = ChannelEntry::default();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_state_is_empty() {
        let state = SharedBoardState::new();
        assert!(state.present_mask().is_empty());
        assert!(state.ready_mask().is_empty());
        assert!(!state.any_board_in_setup());
        let ch = state.channel(ChannelId::from_index(0));
        assert_eq!(ch.mode, ChannelMode::Free);
        assert!(ch.status.is_success());
    }

    #[test]
    fn ready_mask_tracks_liveness() {
        let mut state = SharedBoardState::new();
        state.board_mut(BoardId::from_index(1)).liveness = BoardLiveness::Ready;
        state.board_mut(BoardId::from_index(3)).liveness = BoardLiveness::Alive;

        let ready = state.ready_mask();
        assert!(ready.contains(BoardId::from_index(1)));
        assert!(!ready.contains(BoardId::from_index(3)));

        let present = state.present_mask();
        assert!(present.contains(BoardId::from_index(1)));
        assert!(present.contains(BoardId::from_index(3)));
        assert!(state.any_board_in_setup());
    }

    #[test]
    fn free_channels_on_resets_only_that_board() {
        let mut state = SharedBoardState::new();
        let on_board = ChannelId::from_parts(BoardId::from_index(1), 4);
        let off_board = ChannelId::from_parts(BoardId::from_index(2), 4);
        state.channel_mut(on_board).mode = ChannelMode::Recording;
        state.channel_mut(off_board).mode = ChannelMode::Recording;

        state.free_channels_on(BoardId::from_index(1));

        assert_eq!(state.channel(on_board).mode, ChannelMode::Free);
        assert_eq!(state.channel(off_board).mode, ChannelMode::Recording);
    }
}
