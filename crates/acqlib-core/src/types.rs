//! Core types used throughout acqlib.
//!
//! The board bank has a fixed geometry: [`NUM_BOARDS`] acquisition boards,
//! each exposing [`CHANNELS_PER_BOARD`] inputs. Logical channel indices run
//! 0..[`NUM_CHANNELS`] and map onto (board, on-board input) pairs.

use std::fmt;

/// Number of board slots in the bank. Slots may be empty at runtime.
pub const NUM_BOARDS: usize = 8;

/// Acquisition inputs per board.
pub const CHANNELS_PER_BOARD: usize = 16;

/// Total logical channels across the bank.
pub const NUM_CHANNELS: usize = NUM_BOARDS * CHANNELS_PER_BOARD;

/// Wildcard channel byte on the wire: "all channels on this board".
pub const WILDCARD_CHANNEL: u8 = 0xFF;

/// Index of one physical board slot (0..[`NUM_BOARDS`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BoardId(u8);

impl BoardId {
    /// Create a `BoardId` from a raw slot index.
    ///
    /// Callers are expected to stay within 0..[`NUM_BOARDS`]; masks and the
    /// shared state table are sized for that range.
    pub fn from_index(index: u8) -> Self {
        BoardId(index)
    }

    /// Raw slot index.
    pub fn index(&self) -> u8 {
        self.0
    }
}

impl fmt::Display for BoardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "board-{}", self.0)
    }
}

/// Logical channel index (0..[`NUM_CHANNELS`]).
///
/// Channel `n` lives on board `n / 16`, on-board input `n % 16`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(u8);

impl ChannelId {
    /// Create a `ChannelId` from a raw logical index.
    pub fn from_index(index: u8) -> Self {
        ChannelId(index)
    }

    /// Create a `ChannelId` from a (board, on-board input) pair.
    pub fn from_parts(board: BoardId, input: u8) -> Self {
        ChannelId(board.index() * CHANNELS_PER_BOARD as u8 + input)
    }

    /// Raw logical index.
    pub fn index(&self) -> u8 {
        self.0
    }

    /// The board this channel lives on.
    pub fn board(&self) -> BoardId {
        BoardId(self.0 / CHANNELS_PER_BOARD as u8)
    }

    /// The board-local input index (0..[`CHANNELS_PER_BOARD`]).
    pub fn input(&self) -> u8 {
        self.0 % CHANNELS_PER_BOARD as u8
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ch-{}", self.0)
    }
}

/// Bit mask selecting boards, one bit per slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BoardMask(u8);

impl BoardMask {
    /// No boards selected.
    pub const EMPTY: BoardMask = BoardMask(0);

    /// Every board slot selected.
    pub const ALL: BoardMask = BoardMask(((1u16 << NUM_BOARDS) - 1) as u8);

    /// Build a mask from raw bits.
    pub fn from_bits(bits: u8) -> Self {
        BoardMask(bits)
    }

    /// Mask with a single board selected.
    pub fn single(board: BoardId) -> Self {
        BoardMask(1 << board.index())
    }

    /// Raw bit representation.
    pub fn bits(&self) -> u8 {
        self.0
    }

    /// `true` if `board` is selected.
    pub fn contains(&self, board: BoardId) -> bool {
        self.0 & (1 << board.index()) != 0
    }

    /// Add a board to the mask.
    pub fn insert(&mut self, board: BoardId) {
        self.0 |= 1 << board.index();
    }

    /// Remove a board from the mask.
    pub fn remove(&mut self, board: BoardId) {
        self.0 &= !(1 << board.index());
    }

    /// `true` if no board is selected.
    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Iterate selected boards in ascending slot order.
    pub fn iter(&self) -> impl Iterator<Item = BoardId> + '_ {
        let bits = self.0;
        (0..NUM_BOARDS as u8)
            .filter(move |i| bits & (1 << i) != 0)
            .map(BoardId::from_index)
    }
}

/// Bit mask selecting logical channels, one bit per channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChannelMask(u128);

impl ChannelMask {
    /// No channels selected.
    pub const EMPTY: ChannelMask = ChannelMask(0);

    /// Build a mask from raw bits.
    pub fn from_bits(bits: u128) -> Self {
        ChannelMask(bits)
    }

    /// Mask with a single channel selected.
    pub fn single(channel: ChannelId) -> Self {
        ChannelMask(1 << channel.index())
    }

    /// Raw bit representation.
    pub fn bits(&self) -> u128 {
        self.0
    }

    /// `true` if `channel` is selected.
    pub fn contains(&self, channel: ChannelId) -> bool {
        self.0 & (1 << channel.index()) != 0
    }

    /// Add a channel to the mask.
    pub fn insert(&mut self, channel: ChannelId) {
        self.0 |= 1 << channel.index();
    }

    /// `true` if no channel is selected.
    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Iterate selected channels in ascending logical order.
    pub fn iter(&self) -> impl Iterator<Item = ChannelId> + '_ {
        let bits = self.0;
        (0..NUM_CHANNELS as u8)
            .filter(move |i| bits & (1u128 << i) != 0)
            .map(ChannelId::from_index)
    }

    /// The board-local selection bitmap for one board (bit per input).
    pub fn inputs_on(&self, board: BoardId) -> u16 {
        let shift = board.index() as u32 * CHANNELS_PER_BOARD as u32;
        ((self.0 >> shift) & 0xFFFF) as u16
    }

    /// `true` if every channel on `board` is selected.
    ///
    /// A fully-selected board collapses to one wildcard wire request.
    pub fn is_full_board(&self, board: BoardId) -> bool {
        self.inputs_on(board) == 0xFFFF
    }

    /// The set of boards that have at least one channel selected.
    pub fn board_mask(&self) -> BoardMask {
        let mut mask = BoardMask::EMPTY;
        for i in 0..NUM_BOARDS as u8 {
            let board = BoardId::from_index(i);
            if self.inputs_on(board) != 0 {
                mask.insert(board);
            }
        }
        mask
    }
}

/// Liveness and setup-pipeline state of one board slot.
///
/// The pipeline only advances forward: `Resetting` through `Freeing` are the
/// setup steps, `Alive` means the final liveness probe confirmed the board,
/// `Ready` means it accepts commands. `Error` and `NoBoard` are terminal
/// until a later probe cycle reports the board again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoardLiveness {
    /// Slot is empty or the board has been silent past the probe limit.
    NoBoard,
    /// Reset request sent, waiting for the board to come back.
    Resetting,
    /// Clearing firmware registers.
    ClearingFirmware,
    /// Reconfiguring the active firmware image.
    LoadingImage,
    /// Enabling the on-board watchdog.
    EnablingWatchdog,
    /// Enabling link-level address resolution.
    EnablingArp,
    /// Freeing all channels.
    Freeing,
    /// Setup complete, final liveness probe pending.
    Alive,
    /// Fully operational.
    Ready,
    /// Setup retries exhausted or link failure; excluded until re-probed.
    Error,
}

impl BoardLiveness {
    /// `true` if the board is partway through the setup pipeline.
    pub fn in_setup(&self) -> bool {
        matches!(
            self,
            BoardLiveness::Resetting
                | BoardLiveness::ClearingFirmware
                | BoardLiveness::LoadingImage
                | BoardLiveness::EnablingWatchdog
                | BoardLiveness::EnablingArp
                | BoardLiveness::Freeing
                | BoardLiveness::Alive
        )
    }

    /// `true` if the board accepts client-initiated commands.
    pub fn is_ready(&self) -> bool {
        matches!(self, BoardLiveness::Ready)
    }
}

impl fmt::Display for BoardLiveness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BoardLiveness::NoBoard => "no-board",
            BoardLiveness::Resetting => "resetting",
            BoardLiveness::ClearingFirmware => "clearing-firmware",
            BoardLiveness::LoadingImage => "loading-image",
            BoardLiveness::EnablingWatchdog => "enabling-watchdog",
            BoardLiveness::EnablingArp => "enabling-arp",
            BoardLiveness::Freeing => "freeing",
            BoardLiveness::Alive => "alive",
            BoardLiveness::Ready => "ready",
            BoardLiveness::Error => "error",
        };
        write!(f, "{s}")
    }
}

/// Recording state of one logical channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChannelMode {
    /// Not allocated to any client.
    #[default]
    Free,
    /// Allocated and actively recording into the board buffer.
    Recording,
    /// Recording stopped; buffered data may be read out.
    Stopped,
    /// The channel's board reported an error for this channel.
    Error,
}

impl fmt::Display for ChannelMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChannelMode::Free => "free",
            ChannelMode::Recording => "recording",
            ChannelMode::Stopped => "stopped",
            ChannelMode::Error => "error",
        };
        write!(f, "{s}")
    }
}

/// Trigger start/stop behavior for one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TriggerMode {
    /// Triggering disabled; recording runs until explicitly stopped.
    #[default]
    Off,
    /// A trigger event starts recording.
    StartOnTrigger,
    /// A trigger event stops recording after the configured window.
    StopOnTrigger,
}

/// Per-channel trigger configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TriggerConfig {
    /// Detection threshold in raw ADC counts.
    pub level: i16,
    /// Start/stop behavior.
    pub mode: TriggerMode,
    /// Pre-detection filter coefficients.
    pub filter: [i16; 4],
    /// Post-trigger window in pages.
    pub window_pages: u16,
}

/// Metadata stored alongside a flash image on the board.
///
/// Written by the flash-image write verb, persisted on-board, and read back
/// unchanged by the image-info query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageMeta {
    /// Image version number.
    pub version: u32,
    /// Write timestamp, seconds since the Unix epoch.
    pub timestamp: u64,
    /// Source artifact name, truncated to the on-board field width.
    pub artifact: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_board_input_mapping() {
        let ch = ChannelId::from_index(21);
        assert_eq!(ch.board(), BoardId::from_index(1));
        assert_eq!(ch.input(), 5);
        assert_eq!(ChannelId::from_parts(ch.board(), ch.input()), ch);
    }

    #[test]
    fn board_mask_iter_ascending() {
        let mut mask = BoardMask::EMPTY;
        mask.insert(BoardId::from_index(5));
        mask.insert(BoardId::from_index(1));
        let boards: Vec<u8> = mask.iter().map(|b| b.index()).collect();
        assert_eq!(boards, vec![1, 5]);
    }

    #[test]
    fn board_mask_all_covers_every_slot() {
        assert_eq!(BoardMask::ALL.bits(), 0xFF);
        for i in 0..NUM_BOARDS as u8 {
            assert!(BoardMask::ALL.contains(BoardId::from_index(i)));
        }
    }

    #[test]
    fn channel_mask_full_board_detection() {
        let board = BoardId::from_index(2);
        let mut mask = ChannelMask::EMPTY;
        for input in 0..CHANNELS_PER_BOARD as u8 {
            mask.insert(ChannelId::from_parts(board, input));
        }
        assert!(mask.is_full_board(board));
        assert_eq!(mask.inputs_on(board), 0xFFFF);
        assert!(!mask.is_full_board(BoardId::from_index(0)));
    }

    #[test]
    fn channel_mask_partial_board() {
        let board = BoardId::from_index(0);
        let mut mask = ChannelMask::EMPTY;
        mask.insert(ChannelId::from_parts(board, 5));
        mask.insert(ChannelId::from_parts(board, 9));
        assert!(!mask.is_full_board(board));
        assert_eq!(mask.inputs_on(board), (1 << 5) | (1 << 9));
    }

    #[test]
    fn channel_mask_board_mask_projection() {
        let mut mask = ChannelMask::EMPTY;
        mask.insert(ChannelId::from_index(3)); // board 0
        mask.insert(ChannelId::from_index(40)); // board 2
        let boards = mask.board_mask();
        assert!(boards.contains(BoardId::from_index(0)));
        assert!(boards.contains(BoardId::from_index(2)));
        assert!(!boards.contains(BoardId::from_index(1)));
    }

    #[test]
    fn liveness_in_setup_classification() {
        assert!(BoardLiveness::Resetting.in_setup());
        assert!(BoardLiveness::Freeing.in_setup());
        assert!(BoardLiveness::Alive.in_setup());
        assert!(!BoardLiveness::Ready.in_setup());
        assert!(!BoardLiveness::NoBoard.in_setup());
        assert!(!BoardLiveness::Error.in_setup());
    }

    #[test]
    fn display_forms() {
        assert_eq!(BoardId::from_index(3).to_string(), "board-3");
        assert_eq!(ChannelId::from_index(17).to_string(), "ch-17");
        assert_eq!(BoardLiveness::EnablingArp.to_string(), "enabling-arp");
        assert_eq!(ChannelMode::Recording.to_string(), "recording");
    }
}
