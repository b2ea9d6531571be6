//! End-to-end driver tests against mock board links.
//!
//! The driver runs as a spawned task under paused time; the test plays both
//! the client and the boards, feeding probe/setup/verb acknowledgements
//! through the input channel the way the external frame demultiplexer
//! would.

use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::time::sleep;

use acqlib_core::{
    BoardId, BoardLink, BoardMask, ChannelId, ChannelMask, ClientId, ClientReply, DriverEvent,
    ImageMeta, ReplyData, RequestParams, Status, Verb, CHANNELS_PER_BOARD, NUM_BOARDS,
    WILDCARD_CHANNEL,
};
use acqlib_driver::{ClientMessage, Driver, DriverConfig, Input};
use acqlib_test_harness::MockLinkHandle;
use acqlib_wire::flash::{encode_info, info_addr};
use acqlib_wire::frame::{signal, Frame};

const CLIENT: ClientId = ClientId(1);

struct Bench {
    input: mpsc::UnboundedSender<Input>,
    links: Vec<MockLinkHandle>,
    rx: mpsc::UnboundedReceiver<ClientMessage>,
    events: broadcast::Receiver<DriverEvent>,
}

impl Bench {
    async fn start() -> Bench {
        // Capture driver tracing in test output; later benches reuse the
        // first one's subscriber.
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();

        let mut links: Vec<Box<dyn BoardLink>> = Vec::new();
        let mut handles = Vec::new();
        for i in 0..NUM_BOARDS as u8 {
            let (link, handle) = acqlib_test_harness::MockLink::new(i);
            links.push(Box::new(link));
            handles.push(handle);
        }

        let driver = Driver::new(links, DriverConfig::default());
        let input = driver.input();
        let events = driver.events();
        tokio::spawn(driver.run());

        let (tx, rx) = mpsc::unbounded_channel();
        input
            .send(Input::ClientConnected { client: CLIENT, tx })
            .unwrap();
        tick().await;

        Bench {
            input,
            links: handles,
            rx,
            events,
        }
    }

    fn send_frame(&self, board: u8, frame: Frame) {
        self.input
            .send(Input::BoardFrame {
                board: BoardId::from_index(board),
                frame,
            })
            .unwrap();
    }

    fn send_request(&self, verb: Verb, boards: BoardMask, channels: ChannelMask, params: RequestParams) {
        self.input
            .send(Input::Request {
                client: CLIENT,
                request: acqlib_core::ClientRequest {
                    verb,
                    board_mask: boards,
                    channel_mask: channels,
                    params,
                },
            })
            .unwrap();
    }

    /// Wait until the newest frame sent to `board` carries `expected`.
    async fn wait_for_frame(&self, board: u8, expected: u16) -> Frame {
        for _ in 0..200 {
            if let Some(bytes) = self.links[board as usize].last_frame() {
                let frame = Frame::decode(&bytes).unwrap();
                if frame.signal == expected {
                    return frame;
                }
            }
            tick().await;
        }
        panic!("no frame with signal {expected:#06x} sent to board {board}");
    }

    async fn next_reply(&mut self) -> ClientReply {
        loop {
            match self.rx.recv().await.expect("driver dropped client channel") {
                ClientMessage::Reply(reply) => return reply,
                ClientMessage::Event(_) => continue,
            }
        }
    }

    /// Walk one board through discovery and the full setup pipeline.
    async fn bring_up(&self, board: u8) {
        tick().await;
        // Discovery probe answer: unknown board, image slot 0.
        self.send_frame(
            board,
            Frame::ack(signal::PROBE, 0, 0, vec![0]),
        );
        for step in [
            signal::CLEAR_FIRMWARE,
            signal::LOAD_IMAGE,
            signal::WATCHDOG_ENABLE,
            signal::ARP_ENABLE,
            signal::FREE,
            signal::PROBE,
        ] {
            let frame = self.wait_for_frame(board, step).await;
            self.send_frame(board, Frame::ack(step, frame.channel, 0, vec![]));
        }
        tick().await;
        tick().await;
    }
}

/// One small paused-time step, letting the driver task run.
async fn tick() {
    sleep(Duration::from_millis(1)).await;
}

fn full_board_channels(board: u8) -> ChannelMask {
    let mut mask = ChannelMask::EMPTY;
    for input in 0..CHANNELS_PER_BOARD as u8 {
        mask.insert(ChannelId::from_parts(BoardId::from_index(board), input));
    }
    mask
}

#[tokio::test(start_paused = true)]
async fn version_query_skips_absent_board() {
    let mut bench = Bench::start().await;
    bench.bring_up(0).await;

    let mut mask = BoardMask::single(BoardId::from_index(0));
    mask.insert(BoardId::from_index(3));
    bench.send_request(Verb::Version, mask, ChannelMask::EMPTY, RequestParams::None);

    let frame = bench.wait_for_frame(0, signal::VERSION).await;
    bench.send_frame(
        0,
        Frame::ack(signal::VERSION, frame.channel, 0, vec![0, 1, 0, 4]),
    );

    let reply = bench.next_reply().await;
    assert_eq!(reply.verb, Verb::Version);
    assert!(reply.status[0].is_success());
    assert_eq!(reply.status[3], Status::NO_BOARD);
    match reply.data {
        ReplyData::Versions(v) => {
            assert_eq!(v[0], Some(0x0001_0004));
            assert_eq!(v[3], None);
        }
        other => panic!("unexpected reply data: {other:?}"),
    }

    // The absent board saw probes at most, never the query itself.
    for bytes in bench.links[3].sent_frames() {
        let frame = Frame::decode(&bytes).unwrap();
        assert_ne!(frame.signal, signal::VERSION);
    }
}

#[tokio::test(start_paused = true)]
async fn allocate_stop_stop_scenario() {
    let mut bench = Bench::start().await;
    bench.bring_up(0).await;
    bench.bring_up(1).await;

    let ch = ChannelId::from_index(5);

    // Allocate channel 5: board exchange, then Recording.
    bench.send_request(
        Verb::Allocate,
        BoardMask::EMPTY,
        ChannelMask::single(ch),
        RequestParams::None,
    );
    let frame = bench.wait_for_frame(0, signal::ALLOCATE).await;
    assert_eq!(frame.channel, 5);
    bench.send_frame(0, Frame::ack(signal::ALLOCATE, 5, 0, vec![]));
    let reply = bench.next_reply().await;
    assert_eq!(reply.verb, Verb::Allocate);
    assert!(reply.status[5].is_success());

    // Stop channel 5.
    bench.send_request(
        Verb::Stop,
        BoardMask::EMPTY,
        ChannelMask::single(ch),
        RequestParams::None,
    );
    bench.wait_for_frame(0, signal::STOP).await;
    bench.send_frame(0, Frame::ack(signal::STOP, 5, 0, vec![]));
    let reply = bench.next_reply().await;
    assert!(reply.status[5].is_success());

    // Second stop: non-recording is "nothing to do", still success.
    bench.links[0].clear();
    bench.send_request(
        Verb::Stop,
        BoardMask::EMPTY,
        ChannelMask::single(ch),
        RequestParams::None,
    );
    bench.wait_for_frame(0, signal::STOP).await;
    bench.send_frame(0, Frame::ack(signal::STOP, 5, 0, vec![]));
    let reply = bench.next_reply().await;
    assert!(reply.status[5].is_success());
}

#[tokio::test(start_paused = true)]
async fn full_board_uses_one_wildcard_request() {
    let mut bench = Bench::start().await;
    bench.bring_up(0).await;
    bench.links[0].clear();

    bench.send_request(
        Verb::Allocate,
        BoardMask::EMPTY,
        full_board_channels(0),
        RequestParams::None,
    );
    let frame = bench.wait_for_frame(0, signal::ALLOCATE).await;
    assert_eq!(frame.channel, WILDCARD_CHANNEL);
    bench.send_frame(0, Frame::ack(signal::ALLOCATE, WILDCARD_CHANNEL, 0, vec![]));

    let reply = bench.next_reply().await;
    for input in 0..CHANNELS_PER_BOARD {
        assert!(reply.status[input].is_success());
    }

    // Exactly one allocate frame went out for all sixteen channels.
    let allocates = bench.links[0]
        .sent_frames()
        .iter()
        .filter(|b| Frame::decode(b).unwrap().signal == signal::ALLOCATE)
        .count();
    assert_eq!(allocates, 1);
}

#[tokio::test(start_paused = true)]
async fn stop_jumps_queue_and_queries_get_busy_ack() {
    let mut bench = Bench::start().await;
    bench.bring_up(0).await;
    bench.links[0].clear();

    let ch = ChannelId::from_index(2);

    // Make the driver busy with an unacknowledged allocate.
    bench.send_request(
        Verb::Allocate,
        BoardMask::EMPTY,
        ChannelMask::single(ch),
        RequestParams::None,
    );
    bench.wait_for_frame(0, signal::ALLOCATE).await;

    // While busy: a query is answered immediately with a busy ack.
    bench.send_request(
        Verb::Version,
        BoardMask::single(BoardId::from_index(0)),
        ChannelMask::EMPTY,
        RequestParams::None,
    );
    let reply = bench.next_reply().await;
    assert_eq!(reply.verb, Verb::Version);
    assert_eq!(reply.data, ReplyData::Busy);

    // Queue a record (tail), then a stop (head).
    bench.send_request(
        Verb::Record,
        BoardMask::EMPTY,
        ChannelMask::single(ch),
        RequestParams::None,
    );
    bench.send_request(
        Verb::Stop,
        BoardMask::EMPTY,
        ChannelMask::single(ch),
        RequestParams::None,
    );
    tick().await;

    // Finish the allocate; the stop must run before the record.
    bench.send_frame(0, Frame::ack(signal::ALLOCATE, 2, 0, vec![]));
    assert_eq!(bench.next_reply().await.verb, Verb::Allocate);

    bench.wait_for_frame(0, signal::STOP).await;
    bench.send_frame(0, Frame::ack(signal::STOP, 2, 0, vec![]));
    assert_eq!(bench.next_reply().await.verb, Verb::Stop);

    bench.wait_for_frame(0, signal::RECORD).await;
    bench.send_frame(0, Frame::ack(signal::RECORD, 2, 0, vec![]));
    assert_eq!(bench.next_reply().await.verb, Verb::Record);
}

#[tokio::test(start_paused = true)]
async fn flash_write_then_image_info_round_trip() {
    let mut bench = Bench::start().await;
    bench.bring_up(0).await;
    bench.links[0].clear();

    let meta = ImageMeta {
        version: 0x0003_0001,
        timestamp: 1_756_400_000,
        artifact: "rx-fw-3.1.bin".into(),
    };
    let image = vec![0xC3u8; 8];
    bench.send_request(
        Verb::WriteFlashImage,
        BoardMask::single(BoardId::from_index(0)),
        ChannelMask::EMPTY,
        RequestParams::FlashWrite {
            slot: 1,
            password: 0,
            meta: meta.clone(),
            image: image.clone(),
        },
    );

    // Serve the whole pipeline: answer each outbound frame as a board
    // would, echoing written data back on verify reads.
    let mut served = 0;
    let reply = loop {
        if let Ok(message) = bench.rx.try_recv() {
            match message {
                ClientMessage::Reply(reply) => break reply,
                ClientMessage::Event(_) => continue,
            }
        }
        let frames = bench.links[0].sent_frames();
        if frames.len() > served {
            let frame = Frame::decode(&frames[served]).unwrap();
            served += 1;
            let payload = match frame.signal {
                signal::FLASH_READ => {
                    let addr = u32::from_be_bytes([
                        frame.payload[0],
                        frame.payload[1],
                        frame.payload[2],
                        frame.payload[3],
                    ]);
                    if addr == info_addr(1) {
                        encode_info(&meta).to_vec()
                    } else {
                        image.clone()
                    }
                }
                signal::PROBE => continue,
                _ => vec![],
            };
            bench.send_frame(0, Frame::ack(frame.signal, frame.channel, 0, payload));
        }
        tick().await;
    };
    assert_eq!(reply.verb, Verb::WriteFlashImage);
    assert!(reply.status[0].is_success());

    // Read the metadata back: it must match what was written.
    bench.send_request(
        Verb::ImageInfo,
        BoardMask::single(BoardId::from_index(0)),
        ChannelMask::EMPTY,
        RequestParams::ImageSlot { slot: 1 },
    );
    let frame = bench.wait_for_frame(0, signal::IMAGE_INFO).await;
    assert_eq!(frame.payload, vec![1]);
    bench.send_frame(
        0,
        Frame::ack(signal::IMAGE_INFO, 0, 0, encode_info(&meta).to_vec()),
    );

    let reply = bench.next_reply().await;
    match reply.data {
        ReplyData::ImageInfo(metas) => assert_eq!(metas[0], Some(meta)),
        other => panic!("unexpected reply data: {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn idempotent_free_returns_success() {
    let mut bench = Bench::start().await;
    bench.bring_up(0).await;

    let ch = ChannelId::from_index(9);
    bench.send_request(
        Verb::Free,
        BoardMask::EMPTY,
        ChannelMask::single(ch),
        RequestParams::None,
    );
    bench.wait_for_frame(0, signal::FREE).await;
    bench.send_frame(0, Frame::ack(signal::FREE, 9, 0, vec![]));

    let reply = bench.next_reply().await;
    assert_eq!(reply.verb, Verb::Free);
    assert!(reply.status[9].is_success());
}

#[tokio::test(start_paused = true)]
async fn silent_board_becomes_absent() {
    let mut bench = Bench::start().await;
    bench.bring_up(0).await;

    // Stay silent through several probe cycles.
    sleep(Duration::from_secs(8)).await;

    let mut appeared = false;
    let mut vanished = false;
    while let Ok(event) = bench.events.try_recv() {
        if let DriverEvent::BoardSetChanged { present } = event {
            if present.contains(BoardId::from_index(0)) {
                appeared = true;
            } else if appeared {
                vanished = true;
            }
        }
    }
    assert!(appeared, "board 0 never reported present");
    assert!(vanished, "board 0 never reported absent after going silent");
}

#[tokio::test(start_paused = true)]
async fn trigger_event_reaches_subscribed_client() {
    let mut bench = Bench::start().await;
    bench.bring_up(0).await;

    bench.send_request(
        Verb::Subscribe,
        BoardMask::EMPTY,
        ChannelMask::EMPTY,
        RequestParams::None,
    );
    assert_eq!(bench.next_reply().await.verb, Verb::Subscribe);

    // Unsolicited trigger signal from board 0, input 3.
    bench.send_frame(
        0,
        Frame {
            signal: signal::TRIGGER_EVENT,
            channel: 3,
            flags: 0,
            status: 0,
            payload: vec![],
        },
    );

    loop {
        match bench.rx.recv().await.expect("driver dropped client channel") {
            ClientMessage::Event(DriverEvent::TriggerDetected { channel }) => {
                assert_eq!(channel, ChannelId::from_parts(BoardId::from_index(0), 3));
                break;
            }
            _ => continue,
        }
    }
}
