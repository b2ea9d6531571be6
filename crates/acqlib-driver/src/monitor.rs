//! Periodic board-liveness probe cycle.
//!
//! Each cycle broadcasts one probe to every candidate slot, collects the
//! acks that arrive before the shared collect deadline, and counts silent
//! cycles per board. The monitor is pure bookkeeping: the driver sends the
//! probes, feeds acks in, and closes the cycle when the deadline fires.

use acqlib_core::{BoardId, BoardLiveness, BoardMask, SharedBoardState, NUM_BOARDS};
use acqlib_wire::flash::FACTORY_SLOT;
use acqlib_wire::frame::{Frame, FLAG_RESET};
use tracing::{debug, info, warn};

/// Outcome of one probe acknowledgement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ProbeVerdict {
    /// Board confirmed alive, no action needed.
    Alive,
    /// New board, reset flag set, or board recovering from `Error`: it must
    /// run the setup pipeline before accepting commands.
    NeedsSetup,
}

/// Result of closing a probe cycle.
#[derive(Debug)]
pub(crate) struct CycleOutcome {
    /// The new present-board mask, if it changed this cycle.
    pub present_changed: Option<BoardMask>,
}

/// Tracks one probe-and-collect cycle across the bank.
pub(crate) struct LivenessMonitor {
    /// Boards probed this cycle that have not answered yet.
    awaiting: BoardMask,
    /// Present set snapshotted when the cycle began, for change detection.
    baseline: BoardMask,
    max_silent_cycles: u32,
}

impl LivenessMonitor {
    pub fn new(max_silent_cycles: u32) -> Self {
        LivenessMonitor {
            awaiting: BoardMask::EMPTY,
            baseline: BoardMask::EMPTY,
            max_silent_cycles,
        }
    }

    /// `true` while a cycle is open (probes sent, collect deadline armed).
    pub fn cycle_open(&self) -> bool {
        !self.awaiting.is_empty()
    }

    /// Start a cycle: pick the slots to probe.
    ///
    /// Every slot is probed so unplugged slots keep being polled for new
    /// boards, except boards mid-setup (the pipeline owns their traffic)
    /// and boards an Operation touched since the last cycle, which get one
    /// cycle of grace so an in-flight transfer is not disturbed.
    pub fn begin_cycle(&mut self, state: &mut SharedBoardState) -> Vec<BoardId> {
        self.baseline = state.present_mask();
        let mut targets = Vec::new();
        for i in 0..NUM_BOARDS as u8 {
            let id = BoardId::from_index(i);
            let entry = state.board_mut(id);
            if entry.liveness.in_setup() {
                continue;
            }
            if entry.recently_used {
                entry.recently_used = false;
                continue;
            }
            self.awaiting.insert(id);
            targets.push(id);
        }
        debug!(count = targets.len(), "probe cycle started");
        targets
    }

    /// Record one probe acknowledgement.
    ///
    /// The ack carries the reset flag and the loaded image slot in its
    /// first payload byte.
    pub fn on_probe_ack(
        &mut self,
        board: BoardId,
        frame: &Frame,
        state: &mut SharedBoardState,
    ) -> ProbeVerdict {
        self.awaiting.remove(board);
        let entry = state.board_mut(board);
        entry.silent_cycles = 0;
        if let Some(&slot) = frame.payload.first() {
            entry.image_slot = slot;
            // A board answering from a non-factory slot carries an
            // operator-loaded image; setup must not reconfigure over it.
            entry.preserve_image = slot != FACTORY_SLOT;
        }

        let was = entry.liveness;
        let reset = frame.flags & FLAG_RESET != 0;
        if reset || !matches!(was, BoardLiveness::Ready) {
            info!(%board, %was, reset, "board needs setup");
            ProbeVerdict::NeedsSetup
        } else {
            ProbeVerdict::Alive
        }
    }

    /// Close the cycle at the collect deadline.
    ///
    /// Boards still awaited were silent: bump their counters, and past the
    /// limit mark them absent and invalidate their channels.
    pub fn finish_cycle(&mut self, state: &mut SharedBoardState) -> CycleOutcome {
        let before = self.baseline;
        let silent: Vec<BoardId> = self.awaiting.iter().collect();
        self.awaiting = BoardMask::EMPTY;

        for board in silent {
            let entry = state.board_mut(board);
            if entry.liveness == BoardLiveness::NoBoard {
                continue;
            }
            entry.silent_cycles += 1;
            if entry.silent_cycles >= self.max_silent_cycles {
                warn!(%board, cycles = entry.silent_cycles, "board silent past limit, marking absent");
                entry.liveness = BoardLiveness::NoBoard;
                entry.silent_cycles = 0;
                state.free_channels_on(board);
            }
        }

        let after = state.present_mask();
        CycleOutcome {
            present_changed: (after != before).then_some(after),
        }
    }
}
