//! The top-level driver: a single dispatch task over an input channel.
//!
//! One event is processed at a time: a client request, an inbound board
//! frame (pre-typed by the external demultiplexer), or a timer expiration.
//! All waits are deadlines polled with `sleep_until`; nothing blocks. The
//! driver walks `Init -> Idle/Setup/Busy` per its state machine: setup work
//! preempts queued requests, the queue replays once idle, and at most one
//! board exchange is ever in flight.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, trace, warn};

use acqlib_core::{
    BoardId, BoardLink, ChannelId, ClientId, ClientReply, ClientRequest, DriverEvent, Error,
    Result, SharedBoardState, Verb,
};
use acqlib_wire::frame::{signal, Frame};

use crate::handler::{CommandHandler, HandlerStep};
use crate::monitor::{LivenessMonitor, ProbeVerdict};
use crate::ops::{BoardAck, BoardRequest};
use crate::queue::CommandQueue;
use crate::setup::{SetupEngine, SetupEvent};

/// Tunable timing and capacity knobs.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Per-exchange acknowledgement timeout.
    pub ack_timeout: Duration,
    /// Interval between liveness probe cycles.
    pub probe_interval: Duration,
    /// Shared collect window for one probe cycle.
    pub probe_timeout: Duration,
    /// Retry budget per setup-pipeline step.
    pub max_setup_retries: u32,
    /// Silent probe cycles before a board is marked absent.
    pub max_silent_cycles: u32,
    /// Pending-request queue capacity.
    pub queue_capacity: usize,
    /// Capacity of the driver event broadcast channel.
    pub event_capacity: usize,
}

impl Default for DriverConfig {
    fn default() -> Self {
        DriverConfig {
            ack_timeout: Duration::from_millis(250),
            probe_interval: Duration::from_secs(2),
            probe_timeout: Duration::from_millis(500),
            max_setup_retries: 3,
            max_silent_cycles: 3,
            queue_capacity: 32,
            event_capacity: 64,
        }
    }
}

/// Inputs delivered to the dispatch loop.
///
/// Board frames arrive here already attributed to a board slot; the raw
/// frame demultiplexer maps link-layer source addresses to slots before the
/// driver sees them.
#[derive(Debug)]
pub enum Input {
    /// A client connection opened; replies and events flow through `tx`.
    ClientConnected {
        client: ClientId,
        tx: mpsc::UnboundedSender<ClientMessage>,
    },
    /// A client connection closed.
    ClientDisconnected { client: ClientId },
    /// A parsed client request.
    Request {
        client: ClientId,
        request: ClientRequest,
    },
    /// An inbound frame from a board.
    BoardFrame { board: BoardId, frame: Frame },
    /// Stop the dispatch loop.
    Shutdown,
}

/// Messages the driver sends to one client connection.
#[derive(Debug, Clone)]
pub enum ClientMessage {
    /// The final (or busy) acknowledgement for a request.
    Reply(ClientReply),
    /// An asynchronous notification (subscribed clients only).
    Event(DriverEvent),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DriverState {
    Init,
    Setup,
    Idle,
    Busy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PendingOwner {
    Operation,
    Setup,
}

/// The single in-flight board exchange.
#[derive(Debug)]
struct Pending {
    board: BoardId,
    signal: u16,
    deadline: Instant,
    owner: PendingOwner,
}

/// The driver engine. Construct, keep the [`Input`] sender, then `run()`.
pub struct Driver {
    config: DriverConfig,
    links: Vec<Box<dyn BoardLink>>,
    state: SharedBoardState,
    driver_state: DriverState,
    handler: CommandHandler,
    queue: CommandQueue,
    monitor: LivenessMonitor,
    setup: SetupEngine,

    clients: HashMap<ClientId, mpsc::UnboundedSender<ClientMessage>>,
    subscribers: HashSet<ClientId>,
    events: broadcast::Sender<DriverEvent>,

    input_tx: mpsc::UnboundedSender<Input>,
    input_rx: mpsc::UnboundedReceiver<Input>,

    pending: Option<Pending>,
    /// An operation request held back by a settle delay.
    deferred: Option<(BoardRequest, Instant)>,
    next_probe: Instant,
    probe_deadline: Option<Instant>,
}

impl Driver {
    /// Build a driver over one link per board slot.
    ///
    /// `links[i]` carries traffic for board slot `i`; slots without
    /// hardware still get a link object (sends may fail, probes go
    /// unanswered).
    pub fn new(links: Vec<Box<dyn BoardLink>>, config: DriverConfig) -> Driver {
        let (input_tx, input_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(config.event_capacity);
        Driver {
            handler: CommandHandler::new(),
            queue: CommandQueue::new(config.queue_capacity),
            monitor: LivenessMonitor::new(config.max_silent_cycles),
            setup: SetupEngine::new(config.max_setup_retries),
            state: SharedBoardState::new(),
            driver_state: DriverState::Init,
            clients: HashMap::new(),
            subscribers: HashSet::new(),
            events,
            input_tx,
            input_rx,
            pending: None,
            deferred: None,
            next_probe: Instant::now(),
            probe_deadline: None,
            links,
            config,
        }
    }

    /// Sender for feeding inputs to the dispatch loop.
    pub fn input(&self) -> mpsc::UnboundedSender<Input> {
        self.input_tx.clone()
    }

    /// Subscribe to driver events without a client connection.
    pub fn events(&self) -> broadcast::Receiver<DriverEvent> {
        self.events.subscribe()
    }

    /// Run the dispatch loop until [`Input::Shutdown`] or all input senders
    /// drop.
    pub async fn run(mut self) {
        info!(boards = self.links.len(), "driver starting");
        self.driver_state = DriverState::Idle;
        // First probe cycle fires immediately to discover the bank.
        self.next_probe = Instant::now();

        loop {
            let deadline = self.next_deadline();
            tokio::select! {
                maybe = self.input_rx.recv() => {
                    match maybe {
                        None | Some(Input::Shutdown) => break,
                        Some(input) => self.handle_input(input).await,
                    }
                }
                _ = sleep_until(deadline) => {
                    self.handle_deadlines().await;
                }
            }
        }
        info!("driver stopped");
    }

    fn next_deadline(&self) -> Instant {
        let mut deadline = self.next_probe;
        if let Some(p) = &self.pending {
            deadline = deadline.min(p.deadline);
        }
        if let Some((_, at)) = &self.deferred {
            deadline = deadline.min(*at);
        }
        if let Some(d) = self.probe_deadline {
            deadline = deadline.min(d);
        }
        deadline
    }

    async fn handle_input(&mut self, input: Input) {
        match input {
            Input::ClientConnected { client, tx } => {
                debug!(%client, "client connected");
                self.clients.insert(client, tx);
            }
            Input::ClientDisconnected { client } => {
                debug!(%client, "client disconnected");
                self.clients.remove(&client);
                self.subscribers.remove(&client);
                self.queue.drop_client(client);
                self.handler.suppress_reply_for(client);
            }
            Input::Request { client, request } => {
                self.handle_request(client, request).await;
            }
            Input::BoardFrame { board, frame } => {
                self.handle_board_frame(board, frame).await;
            }
            Input::Shutdown => unreachable!("handled by the run loop"),
        }
    }

    async fn handle_request(&mut self, client: ClientId, request: ClientRequest) {
        // Driver-local verbs never touch a board and never queue.
        if request.verb.is_local() {
            match request.verb {
                Verb::Subscribe => {
                    self.subscribers.insert(client);
                }
                Verb::Unsubscribe => {
                    self.subscribers.remove(&client);
                }
                _ => {}
            }
            self.send_to_client(client, ClientMessage::Reply(ClientReply::with_status(request.verb, Vec::new())));
            return;
        }

        match self.driver_state {
            DriverState::Idle => {
                debug_assert!(!self.handler.is_active());
                self.driver_state = DriverState::Busy;
                let step = self.handler.start(client, &request, &mut self.state);
                self.advance(Some(step)).await;
            }
            DriverState::Init | DriverState::Setup | DriverState::Busy => {
                // Read-only queries get an immediate busy ack instead of
                // waiting behind the backlog.
                if request.verb.is_query() {
                    trace!(%client, verb = %request.verb, "busy, answering query with busy ack");
                    self.send_to_client(client, ClientMessage::Reply(ClientReply::busy(request.verb)));
                    return;
                }
                let verb = request.verb;
                if self.queue.push(client, request) {
                    trace!(%client, %verb, queued = self.queue.len(), "request queued");
                } else {
                    warn!(%client, %verb, "queue full, rejecting with busy ack");
                    self.send_to_client(client, ClientMessage::Reply(ClientReply::busy(verb)));
                }
            }
        }
    }

    async fn handle_board_frame(&mut self, board: BoardId, frame: Frame) {
        if signal::is_unsolicited(frame.signal) {
            self.handle_unsolicited(board, frame);
            return;
        }

        // The in-flight exchange has first claim on matching acks.
        if let Some(p) = &self.pending {
            if p.board == board && frame.acknowledges(p.signal) {
                let owner = p.owner;
                self.pending = None;
                match owner {
                    PendingOwner::Operation => {
                        if self.handler.accepts(frame.signal) {
                            let step = self.handler.on_ack(BoardAck::Frame(frame), &mut self.state);
                            self.advance(step).await;
                        } else {
                            warn!(%board, signal = frame.signal, "ack does not match active operation");
                            self.advance(None).await;
                        }
                    }
                    PendingOwner::Setup => {
                        if let Some(event) = self.setup.on_ack(board, &frame, &mut self.state) {
                            self.emit_setup_event(event);
                        }
                        self.advance(None).await;
                    }
                }
                return;
            }
        }

        if frame.acknowledges(signal::PROBE) && self.monitor.cycle_open() {
            let verdict = self.monitor.on_probe_ack(board, &frame, &mut self.state);
            if verdict == ProbeVerdict::NeedsSetup && !self.state.board(board).liveness.in_setup() {
                self.setup.begin(board, &mut self.state);
                self.advance(None).await;
            }
            return;
        }

        // Late ack after a timeout, or traffic for a verb no longer active.
        trace!(%board, signal = frame.signal, "dropping unmatched frame");
    }

    fn handle_unsolicited(&mut self, board: BoardId, frame: Frame) {
        match frame.signal {
            signal::TRIGGER_EVENT => {
                let channel = ChannelId::from_parts(board, frame.channel);
                debug!(%board, %channel, "trigger detected");
                self.emit(DriverEvent::TriggerDetected { channel });
            }
            signal::BOARD_ERROR => {
                warn!(%board, code = frame.status, "board reported an error");
                self.emit(DriverEvent::BoardFault {
                    board,
                    code: frame.status,
                });
            }
            _ => {}
        }
    }

    async fn handle_deadlines(&mut self) {
        let now = Instant::now();

        // Settle delay elapsed: transmit the held-back operation request.
        if let Some((request, at)) = self.deferred.take() {
            if at <= now {
                self.advance(Some(HandlerStep::Send {
                    request,
                    settle: None,
                }))
                .await;
            } else {
                self.deferred = Some((request, at));
            }
        }

        if let Some(p) = self.pending.take() {
            if p.deadline <= now {
                debug!(board = %p.board, signal = p.signal, "ack timeout");
                match p.owner {
                    PendingOwner::Operation => {
                        let step = self.handler.on_ack(BoardAck::Timeout, &mut self.state);
                        self.advance(step).await;
                    }
                    PendingOwner::Setup => {
                        if let Some(event) = self.setup.on_timeout(p.board, &mut self.state) {
                            self.emit_setup_event(event);
                        }
                        self.advance(None).await;
                    }
                }
            } else {
                self.pending = Some(p);
            }
        }

        if let Some(d) = self.probe_deadline {
            if d <= now {
                self.probe_deadline = None;
                let outcome = self.monitor.finish_cycle(&mut self.state);
                if let Some(present) = outcome.present_changed {
                    info!(present = ?present, "present-board set changed");
                    self.emit(DriverEvent::BoardSetChanged { present });
                }
                self.advance(None).await;
            }
        }

        if self.next_probe <= now {
            self.begin_probe_cycle().await;
        }
    }

    async fn begin_probe_cycle(&mut self) {
        self.next_probe = Instant::now() + self.config.probe_interval;
        if self.monitor.cycle_open() {
            return;
        }
        let targets = self.monitor.begin_cycle(&mut self.state);
        if targets.is_empty() {
            return;
        }
        let bytes = Frame::request(signal::PROBE, 0, vec![]).encode();
        for board in targets {
            if let Some(link) = self.links.get_mut(board.index() as usize) {
                if let Err(err) = link.send(&bytes).await {
                    trace!(%board, %err, "probe send failed");
                }
            }
        }
        self.probe_deadline = Some(Instant::now() + self.config.probe_timeout);
    }

    /// Drive the engine forward until it blocks on an exchange, a settle
    /// delay, or goes idle with nothing to do.
    async fn advance(&mut self, mut step: Option<HandlerStep>) {
        loop {
            while let Some(s) = step.take() {
                match s {
                    HandlerStep::Send { request, settle } => {
                        self.state.board_mut(request.board).recently_used = true;
                        if let Some(delay) = settle {
                            self.deferred = Some((request, Instant::now() + delay));
                            return;
                        }
                        match self.transmit(&request).await {
                            Ok(()) => {
                                self.pending = Some(Pending {
                                    board: request.board,
                                    signal: request.frame.signal,
                                    deadline: Instant::now() + self.config.ack_timeout,
                                    owner: PendingOwner::Operation,
                                });
                                return;
                            }
                            Err(err) => {
                                warn!(board = %request.board, %err, "send failed");
                                step = self.handler.on_ack(BoardAck::CommError, &mut self.state);
                            }
                        }
                    }
                    HandlerStep::Complete {
                        client,
                        reply,
                        suppressed,
                    } => {
                        if !suppressed {
                            self.send_to_client(client, ClientMessage::Reply(reply));
                        }
                    }
                }
            }

            if self.pending.is_some() || self.deferred.is_some() {
                return;
            }

            // Boards needing setup preempt the request queue.
            if self.state.any_board_in_setup() {
                self.driver_state = DriverState::Setup;
                if let Some(request) = self.setup.next_request(&self.state) {
                    match self.transmit(&request).await {
                        Ok(()) => {
                            self.pending = Some(Pending {
                                board: request.board,
                                signal: request.frame.signal,
                                deadline: Instant::now() + self.config.ack_timeout,
                                owner: PendingOwner::Setup,
                            });
                            return;
                        }
                        Err(err) => {
                            warn!(board = %request.board, %err, "setup send failed");
                            if let Some(event) =
                                self.setup.on_timeout(request.board, &mut self.state)
                            {
                                self.emit_setup_event(event);
                            }
                        }
                    }
                }
                continue;
            }

            // Replay the queue, dropping requests from vanished clients.
            if self.queue.is_empty() {
                self.driver_state = DriverState::Idle;
                return;
            }
            let mut promoted = None;
            while let Some(queued) = self.queue.pop() {
                if self.clients.contains_key(&queued.client) {
                    promoted = Some(queued);
                    break;
                }
                debug!(client = %queued.client, verb = %queued.request.verb,
                       "dropping queued request from disconnected client");
            }
            match promoted {
                Some(queued) => {
                    self.driver_state = DriverState::Busy;
                    step = Some(self.handler.start(
                        queued.client,
                        &queued.request,
                        &mut self.state,
                    ));
                }
                None => {
                    self.driver_state = DriverState::Idle;
                    return;
                }
            }
        }
    }

    async fn transmit(&mut self, request: &BoardRequest) -> Result<()> {
        let link = self
            .links
            .get_mut(request.board.index() as usize)
            .ok_or(Error::NotConnected)?;
        trace!(board = %request.board, signal = request.frame.signal, "sending frame");
        link.send(&request.frame.encode()).await
    }

    fn emit_setup_event(&mut self, event: SetupEvent) {
        match event {
            SetupEvent::Ready(board) => self.emit(DriverEvent::BoardReady { board }),
            SetupEvent::Failed(board) => {
                // Code zero: driver-detected setup failure, not a
                // board-reported fault code.
                self.emit(DriverEvent::BoardFault { board, code: 0 });
            }
        }
    }

    fn emit(&mut self, event: DriverEvent) {
        let _ = self.events.send(event.clone());
        let subscribers: Vec<ClientId> = self.subscribers.iter().copied().collect();
        for client in subscribers {
            self.send_to_client(client, ClientMessage::Event(event.clone()));
        }
    }

    fn send_to_client(&mut self, client: ClientId, message: ClientMessage) {
        if let Some(tx) = self.clients.get(&client) {
            if tx.send(message).is_err() {
                // Connection task went away without a disconnect input yet.
                self.clients.remove(&client);
                self.subscribers.remove(&client);
            }
        }
    }
}
