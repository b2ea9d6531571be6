//! The Operation abstraction and the per-verb command state machines.
//!
//! One Operation instance exists per in-flight client request. It is a small
//! state machine: validate the request against [`SharedBoardState`], compute
//! the per-target work, then alternate produce-request / consume-ack until
//! every target is visited, and finally build the aggregated client reply.
//!
//! The set of Operations is closed: [`build_operation`] maps a verb to its
//! concrete variant. Iteration policy is shared: channel verbs process
//! channels ascending, collapsing a fully-selected board into one wildcard
//! wire request; board verbs iterate boards ascending. A given Operation
//! never has more than one outstanding board request at a time.

use std::time::Duration;

use acqlib_core::{
    BoardId, ChannelId, ClientReply, ClientRequest, SharedBoardState, Status, Verb,
    CHANNELS_PER_BOARD, NUM_BOARDS, NUM_CHANNELS, WILDCARD_CHANNEL,
};
use acqlib_wire::Frame;

mod alloc;
mod flash;
mod query;
mod read;
mod record;
mod trigger;

pub use alloc::{AllocateOp, FreeOp};
pub use flash::{FlashWriteOp, ImageInfoOp};
pub use query::{BoardStatusOp, ResetOp, SizeOp, TempLimitOp, VersionOp};
pub use read::{ReadDataOp, StreamSetupOp};
pub use record::{RecordOp, StopOp};
pub use trigger::TriggerSetupOp;

/// One outbound exchange: a frame addressed to a board.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoardRequest {
    /// The board to send to.
    pub board: BoardId,
    /// The wire frame.
    pub frame: Frame,
}

/// What the current target's exchange produced.
#[derive(Debug, Clone)]
pub enum BoardAck {
    /// A decoded acknowledgement frame from the expected board.
    Frame(Frame),
    /// The ack deadline expired with no reply.
    Timeout,
    /// The outbound send itself failed (link down).
    CommError,
}

/// One request's verb-specific state machine.
///
/// Methods are pure with respect to I/O: the driver sends the frames an
/// Operation produces and feeds acknowledgements (or synthetic timeouts)
/// back in. No error escapes these methods; every failure path records a
/// per-target [`Status`] instead.
pub trait Operation: Send {
    /// The verb this Operation executes.
    fn verb(&self) -> Verb;

    /// Membership test for this verb's acknowledgement signal set.
    fn is_applicable(&self, ack_signal: u16) -> bool;

    /// Validate the request against shared state, compute the target set,
    /// initialize per-target results, and select the first target.
    ///
    /// Targets on boards that are not ready get a no-board status here and
    /// are excluded from iteration -- zero wire requests are sent to them.
    fn consume_client_request(&mut self, state: &mut SharedBoardState);

    /// Build the next outbound request for the current target, or `None`
    /// once every target and closing stage is finished.
    fn produce_board_request(&mut self) -> Option<BoardRequest>;

    /// Consume the current target's acknowledgement (real or synthetic),
    /// update shared state, accumulate status bits, and advance to the next
    /// target or internal stage.
    fn consume_board_ack(&mut self, ack: BoardAck, state: &mut SharedBoardState);

    /// Build the aggregated per-target reply.
    fn produce_client_reply(&self) -> ClientReply;

    /// `true` once all targets are visited and any closing stage finished.
    fn is_complete(&self) -> bool;

    /// Delay to observe before sending the next request, if the previous
    /// step needs settle time (e.g. after a flash sector erase).
    fn settle_delay(&self) -> Option<Duration> {
        None
    }
}

/// Build the concrete Operation for a client request.
///
/// `Subscribe`/`Unsubscribe` are handled inside the driver and never reach
/// this factory.
pub fn build_operation(request: &ClientRequest) -> Box<dyn Operation> {
    match request.verb {
        Verb::Allocate => Box::new(AllocateOp::new(request)),
        Verb::Free => Box::new(FreeOp::new(request)),
        Verb::Record => Box::new(RecordOp::new(request)),
        Verb::Stop => Box::new(StopOp::new(request)),
        Verb::ReadData => Box::new(ReadDataOp::new(request)),
        Verb::TriggerSetup => Box::new(TriggerSetupOp::new(request)),
        Verb::StreamSetup => Box::new(StreamSetupOp::new(request)),
        Verb::Version => Box::new(VersionOp::new(request)),
        Verb::BoardStatus => Box::new(BoardStatusOp::new(request)),
        Verb::Size => Box::new(SizeOp::new(request)),
        Verb::TemperatureLimit => Box::new(TempLimitOp::new(request)),
        Verb::Reset => Box::new(ResetOp::new(request)),
        Verb::WriteFlashImage => Box::new(FlashWriteOp::new(request)),
        Verb::ImageInfo => Box::new(ImageInfoOp::new(request)),
        Verb::Subscribe | Verb::Unsubscribe => {
            unreachable!("local verbs are handled by the driver, not an Operation")
        }
    }
}

// ---------------------------------------------------------------------------
// Target iteration
// ---------------------------------------------------------------------------

/// One unit of work for a channel verb.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Target {
    /// All channels on a fully-selected board: one wildcard wire request.
    Wildcard { board: BoardId },
    /// A single selected channel.
    Single { channel: ChannelId },
}

impl Target {
    pub(crate) fn board(&self) -> BoardId {
        match self {
            Target::Wildcard { board } => *board,
            Target::Single { channel } => channel.board(),
        }
    }

    /// The channel byte carried in the wire request.
    pub(crate) fn wire_channel(&self) -> u8 {
        match self {
            Target::Wildcard { .. } => WILDCARD_CHANNEL,
            Target::Single { channel } => channel.input(),
        }
    }
}

/// Shared iteration state for channel verbs: the planned target list, a
/// cursor, and the accumulated per-channel status array.
#[derive(Debug)]
pub(crate) struct ChannelPlan {
    mask: acqlib_core::ChannelMask,
    targets: Vec<Target>,
    pos: usize,
    status: Vec<Status>,
}

impl ChannelPlan {
    pub(crate) fn new(mask: acqlib_core::ChannelMask) -> Self {
        ChannelPlan {
            mask,
            targets: Vec::new(),
            pos: 0,
            status: vec![Status::SUCCESS; NUM_CHANNELS],
        }
    }

    /// Compute the target list from the selection mask.
    ///
    /// Channels on boards that are not ready are marked no-board and
    /// excluded. `validate` returns the skip-status for a channel that is
    /// in the wrong state for this verb, or success to include it. A board
    /// collapses to one wildcard request only when all of its channels are
    /// selected and valid (`collapse` additionally lets verbs that need
    /// per-channel acks opt out entirely).
    pub(crate) fn plan<F>(&mut self, state: &SharedBoardState, collapse: bool, mut validate: F)
    where
        F: FnMut(ChannelId, &SharedBoardState) -> Status,
    {
        for i in 0..NUM_BOARDS as u8 {
            let board = BoardId::from_index(i);
            let inputs = self.mask.inputs_on(board);
            if inputs == 0 {
                continue;
            }
            if !state.board_ready(board) {
                for input in 0..CHANNELS_PER_BOARD as u8 {
                    if inputs & (1 << input) != 0 {
                        let ch = ChannelId::from_parts(board, input);
                        self.status[ch.index() as usize] = Status::NO_BOARD;
                    }
                }
                continue;
            }

            let mut valid = Vec::new();
            let mut all_valid = true;
            for input in 0..CHANNELS_PER_BOARD as u8 {
                if inputs & (1 << input) == 0 {
                    continue;
                }
                let ch = ChannelId::from_parts(board, input);
                let verdict = validate(ch, state);
                if verdict.is_success() {
                    valid.push(ch);
                } else {
                    self.status[ch.index() as usize] = verdict;
                    all_valid = false;
                }
            }

            if collapse && inputs == 0xFFFF && all_valid {
                self.targets.push(Target::Wildcard { board });
            } else {
                for channel in valid {
                    self.targets.push(Target::Single { channel });
                }
            }
        }
    }

    pub(crate) fn current(&self) -> Option<Target> {
        self.targets.get(self.pos).copied()
    }

    pub(crate) fn advance(&mut self) {
        self.pos += 1;
    }

    pub(crate) fn is_done(&self) -> bool {
        self.pos >= self.targets.len()
    }

    /// The channels covered by the current target.
    pub(crate) fn current_channels(&self) -> Vec<ChannelId> {
        match self.current() {
            Some(Target::Wildcard { board }) => (0..CHANNELS_PER_BOARD as u8)
                .map(|input| ChannelId::from_parts(board, input))
                .collect(),
            Some(Target::Single { channel }) => vec![channel],
            None => Vec::new(),
        }
    }

    /// OR a status into every channel of the current target.
    pub(crate) fn merge_current(&mut self, status: Status) {
        for ch in self.current_channels() {
            self.status[ch.index() as usize] |= status;
        }
    }

    pub(crate) fn statuses(&self) -> Vec<Status> {
        self.status.clone()
    }
}

/// Shared iteration state for board verbs.
#[derive(Debug)]
pub(crate) struct BoardPlan {
    mask: acqlib_core::BoardMask,
    targets: Vec<BoardId>,
    pos: usize,
    status: Vec<Status>,
}

impl BoardPlan {
    pub(crate) fn new(mask: acqlib_core::BoardMask) -> Self {
        BoardPlan {
            mask,
            targets: Vec::new(),
            pos: 0,
            status: vec![Status::SUCCESS; NUM_BOARDS],
        }
    }

    /// Compute the board target list: selected boards ascending, with
    /// not-ready boards marked no-board and excluded.
    pub(crate) fn plan(&mut self, state: &SharedBoardState) {
        for board in self.mask.iter() {
            if state.board_ready(board) {
                self.targets.push(board);
            } else {
                self.status[board.index() as usize] = Status::NO_BOARD;
            }
        }
    }

    pub(crate) fn current(&self) -> Option<BoardId> {
        self.targets.get(self.pos).copied()
    }

    pub(crate) fn advance(&mut self) {
        self.pos += 1;
    }

    pub(crate) fn is_done(&self) -> bool {
        self.pos >= self.targets.len()
    }

    pub(crate) fn merge_current(&mut self, status: Status) {
        if let Some(board) = self.current() {
            self.status[board.index() as usize] |= status;
        }
    }

    /// Mark every planned target with `status` and finish iteration without
    /// sending anything. Used for request-level validation failures.
    pub(crate) fn fail_all(&mut self, status: Status) {
        for board in &self.targets {
            self.status[board.index() as usize] |= status;
        }
        self.pos = self.targets.len();
    }

    pub(crate) fn statuses(&self) -> Vec<Status> {
        self.status.clone()
    }
}

/// Status recorded for a synthetic failure ack.
pub(crate) fn failure_status(ack: &BoardAck) -> Option<Status> {
    match ack {
        BoardAck::Frame(_) => None,
        BoardAck::Timeout => Some(Status::TIMEOUT),
        BoardAck::CommError => Some(Status::COMM_ERROR),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use acqlib_core::{BoardLiveness, ChannelMask};

    fn state_with_ready_boards(boards: &[u8]) -> SharedBoardState {
        let mut state = SharedBoardState::new();
        for &b in boards {
            state.board_mut(BoardId::from_index(b)).liveness = BoardLiveness::Ready;
        }
        state
    }

    fn full_board_mask(board: u8) -> ChannelMask {
        let mut mask = ChannelMask::EMPTY;
        for input in 0..CHANNELS_PER_BOARD as u8 {
            mask.insert(ChannelId::from_parts(BoardId::from_index(board), input));
        }
        mask
    }

    #[test]
    fn full_board_collapses_to_wildcard() {
        let state = state_with_ready_boards(&[0]);
        let mut plan = ChannelPlan::new(full_board_mask(0));
        plan.plan(&state, true, |_, _| Status::SUCCESS);

        assert_eq!(plan.targets.len(), 1);
        assert_eq!(
            plan.current(),
            Some(Target::Wildcard {
                board: BoardId::from_index(0)
            })
        );
        assert_eq!(plan.current().unwrap().wire_channel(), WILDCARD_CHANNEL);
    }

    #[test]
    fn partial_selection_yields_one_target_per_channel() {
        let state = state_with_ready_boards(&[0]);
        let mut mask = ChannelMask::EMPTY;
        mask.insert(ChannelId::from_index(2));
        mask.insert(ChannelId::from_index(7));
        mask.insert(ChannelId::from_index(11));

        let mut plan = ChannelPlan::new(mask);
        plan.plan(&state, true, |_, _| Status::SUCCESS);

        assert_eq!(plan.targets.len(), 3);
        // Ascending channel order.
        assert_eq!(
            plan.current(),
            Some(Target::Single {
                channel: ChannelId::from_index(2)
            })
        );
    }

    #[test]
    fn inactive_board_marked_no_board_with_no_targets() {
        let state = state_with_ready_boards(&[]);
        let mut plan = ChannelPlan::new(full_board_mask(1));
        plan.plan(&state, true, |_, _| Status::SUCCESS);

        assert!(plan.is_done());
        let ch = ChannelId::from_parts(BoardId::from_index(1), 0);
        assert_eq!(plan.statuses()[ch.index() as usize], Status::NO_BOARD);
    }

    #[test]
    fn failed_validation_breaks_wildcard_collapse() {
        let state = state_with_ready_boards(&[0]);
        let mut plan = ChannelPlan::new(full_board_mask(0));
        // Reject input 3 on every board.
        plan.plan(&state, true, |ch, _| {
            if ch.input() == 3 {
                Status::SELECT_ERROR_CHANNEL
            } else {
                Status::SUCCESS
            }
        });

        // 15 single targets, no wildcard.
        assert_eq!(plan.targets.len(), 15);
        assert!(plan
            .targets
            .iter()
            .all(|t| matches!(t, Target::Single { .. })));
        let rejected = ChannelId::from_parts(BoardId::from_index(0), 3);
        assert_eq!(
            plan.statuses()[rejected.index() as usize],
            Status::SELECT_ERROR_CHANNEL
        );
    }

    #[test]
    fn collapse_opt_out_forces_per_channel_targets() {
        let state = state_with_ready_boards(&[0]);
        let mut plan = ChannelPlan::new(full_board_mask(0));
        plan.plan(&state, false, |_, _| Status::SUCCESS);
        assert_eq!(plan.targets.len(), CHANNELS_PER_BOARD);
    }

    #[test]
    fn merge_current_on_wildcard_covers_whole_board() {
        let state = state_with_ready_boards(&[1]);
        let mut plan = ChannelPlan::new(full_board_mask(1));
        plan.plan(&state, true, |_, _| Status::SUCCESS);

        plan.merge_current(Status::TIMEOUT);
        let statuses = plan.statuses();
        for input in 0..CHANNELS_PER_BOARD as u8 {
            let ch = ChannelId::from_parts(BoardId::from_index(1), input);
            assert_eq!(statuses[ch.index() as usize], Status::TIMEOUT);
        }
        // Other boards untouched.
        assert!(statuses[0].is_success());
    }

    #[test]
    fn board_plan_skips_missing_boards() {
        let state = state_with_ready_boards(&[2]);
        let mut mask = acqlib_core::BoardMask::EMPTY;
        mask.insert(BoardId::from_index(0));
        mask.insert(BoardId::from_index(2));

        let mut plan = BoardPlan::new(mask);
        plan.plan(&state);

        assert_eq!(plan.targets, vec![BoardId::from_index(2)]);
        assert_eq!(plan.statuses()[0], Status::NO_BOARD);
        assert!(plan.statuses()[2].is_success());
    }
}
