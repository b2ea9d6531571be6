//! Trigger configuration Operation.

use acqlib_core::{
    ClientReply, ClientRequest, RequestParams, SharedBoardState, Status, TriggerConfig,
    TriggerMode, Verb,
};
use acqlib_wire::frame::{signal, Frame};

use super::{failure_status, BoardAck, BoardRequest, ChannelPlan, Operation};

/// Configure per-channel trigger detection.
///
/// The request payload carries the full trigger block: detection level,
/// mode byte, post-trigger window, then the four filter coefficients. The
/// driver-side config is only updated once the board acks the write.
pub struct TriggerSetupOp {
    plan: ChannelPlan,
    config: TriggerConfig,
}

impl TriggerSetupOp {
    pub fn new(request: &ClientRequest) -> Self {
        let config = match request.params {
            RequestParams::Trigger(config) => config,
            _ => TriggerConfig::default(),
        };
        TriggerSetupOp {
            plan: ChannelPlan::new(request.channel_mask),
            config,
        }
    }

    fn payload(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(13);
        buf.extend_from_slice(&self.config.level.to_be_bytes());
        buf.push(match self.config.mode {
            TriggerMode::Off => 0,
            TriggerMode::StartOnTrigger => 1,
            TriggerMode::StopOnTrigger => 2,
        });
        buf.extend_from_slice(&self.config.window_pages.to_be_bytes());
        for coeff in self.config.filter {
            buf.extend_from_slice(&coeff.to_be_bytes());
        }
        buf
    }
}

impl Operation for TriggerSetupOp {
    fn verb(&self) -> Verb {
        Verb::TriggerSetup
    }

    fn is_applicable(&self, ack_signal: u16) -> bool {
        ack_signal == signal::ack_of(signal::TRIGGER_SETUP)
    }

    fn consume_client_request(&mut self, state: &mut SharedBoardState) {
        // A recording channel cannot take a new trigger block mid-capture.
        self.plan.plan(state, true, |ch, state| {
            match state.channel(ch).mode {
                acqlib_core::ChannelMode::Recording => Status::SELECT_ERROR_CHANNEL,
                _ => Status::SUCCESS,
            }
        });
    }

    fn produce_board_request(&mut self) -> Option<BoardRequest> {
        let payload = self.payload();
        self.plan.current().map(|target| BoardRequest {
            board: target.board(),
            frame: Frame::request(signal::TRIGGER_SETUP, target.wire_channel(), payload),
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
                        for ch in self.plan.current_channels() {
                            state.channel_mut(ch).trigger = self.config;
                        }
                    }
                }
            }
        }
        self.plan.advance();
    }

    fn produce_client_reply(&self) -> ClientReply {
        ClientReply::with_status(Verb::TriggerSetup, self.plan.statuses())
    }

    fn is_complete(&self) -> bool {
        self.plan.is_done()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use acqlib_core::{BoardId, BoardLiveness, BoardMask, ChannelId, ChannelMask, ChannelMode};

    fn ready_state() -> SharedBoardState {
        let mut state = SharedBoardState::new();
        state.board_mut(BoardId::from_index(0)).liveness = BoardLiveness::Ready;
        state
    }

    fn trigger_request(mask: ChannelMask, config: TriggerConfig) -> ClientRequest {
        ClientRequest {
            verb: Verb::TriggerSetup,
            board_mask: BoardMask::EMPTY,
            channel_mask: mask,
            params: RequestParams::Trigger(config),
        }
    }

    fn sample_config() -> TriggerConfig {
        TriggerConfig {
            level: -200,
            mode: TriggerMode::StartOnTrigger,
            filter: [1, -2, 3, -4],
            window_pages: 0x0120,
        }
    }

    #[test]
    fn trigger_payload_layout() {
        let ch = ChannelId::from_index(0);
        let op = TriggerSetupOp::new(&trigger_request(ChannelMask::single(ch), sample_config()));

        let payload = op.payload();
        assert_eq!(payload.len(), 13);
        assert_eq!(&payload[0..2], &(-200i16).to_be_bytes());
        assert_eq!(payload[2], 1);
        assert_eq!(&payload[3..5], &[0x01, 0x20]);
        assert_eq!(&payload[5..7], &1i16.to_be_bytes());
        assert_eq!(&payload[11..13], &(-4i16).to_be_bytes());
    }

    #[test]
    fn success_ack_stores_config() {
        let mut state = ready_state();
        let ch = ChannelId::from_index(6);
        let mut op =
            TriggerSetupOp::new(&trigger_request(ChannelMask::single(ch), sample_config()));

        op.consume_client_request(&mut state);
        let breq = op.produce_board_request().unwrap();
        assert_eq!(breq.frame.signal, signal::TRIGGER_SETUP);
        assert_eq!(breq.frame.channel, 6);

        op.consume_board_ack(
            BoardAck::Frame(Frame::ack(signal::TRIGGER_SETUP, 6, 0, vec![])),
            &mut state,
        );

        assert!(op.is_complete());
        assert_eq!(state.channel(ch).trigger, sample_config());
    }

    #[test]
    fn failed_ack_leaves_config_untouched() {
        let mut state = ready_state();
        let ch = ChannelId::from_index(6);
        let mut op =
            TriggerSetupOp::new(&trigger_request(ChannelMask::single(ch), sample_config()));

        op.consume_client_request(&mut state);
        op.produce_board_request().unwrap();
        op.consume_board_ack(
            BoardAck::Frame(Frame::ack(
                signal::TRIGGER_SETUP,
                6,
                Status::SELECT_ERROR_CHANNEL.bits(),
                vec![],
            )),
            &mut state,
        );

        assert_eq!(state.channel(ch).trigger, TriggerConfig::default());
        assert_eq!(
            op.produce_client_reply().status[6],
            Status::SELECT_ERROR_CHANNEL
        );
    }

    #[test]
    fn recording_channel_rejected_locally() {
        let mut state = ready_state();
        let ch = ChannelId::from_index(2);
        state.channel_mut(ch).mode = ChannelMode::Recording;

        let mut op =
            TriggerSetupOp::new(&trigger_request(ChannelMask::single(ch), sample_config()));
        op.consume_client_request(&mut state);

        assert!(op.produce_board_request().is_none());
        assert_eq!(
            op.produce_client_reply().status[2],
            Status::SELECT_ERROR_CHANNEL
        );
    }
}
