//! Client-facing command surface.
//!
//! A client request names a verb, the targeted boards or channels, and
//! verb-specific parameters. Every request yields exactly one final
//! [`ClientReply`] (or an immediate busy acknowledgement) carrying one
//! [`Status`] per targeted board or channel plus verb result fields.
//!
//! The connection-oriented client listener and its byte-level codec are
//! external collaborators; requests arrive here already parsed.

use std::fmt;

use crate::status::Status;
use crate::types::{BoardMask, ChannelId, ChannelMask, ImageMeta, TriggerConfig};

/// Opaque identifier of one connected client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId(pub u64);

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "client-{}", self.0)
    }
}

/// The closed set of client verbs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    /// Allocate channels for recording.
    Allocate,
    /// Release channels back to the free pool.
    Free,
    /// Start recording on allocated channels.
    Record,
    /// Stop recording. While the driver is busy this verb queues at the
    /// head of the pending queue, ahead of everything else.
    Stop,
    /// Read buffered pages from a stopped channel.
    ReadData,
    /// Configure per-channel trigger detection.
    TriggerSetup,
    /// Configure data streaming for channels (checksummed stream header).
    StreamSetup,
    /// Query firmware version per board.
    Version,
    /// Query raw hardware status per board.
    BoardStatus,
    /// Query buffer memory size per board.
    Size,
    /// Set the over-temperature shutdown limit per board.
    TemperatureLimit,
    /// Hard-reset boards, forcing them back through the setup pipeline.
    Reset,
    /// Write a firmware/data image into a flash slot (multi-stage).
    WriteFlashImage,
    /// Read back flash image metadata for a slot, per board.
    ImageInfo,
    /// Register for asynchronous trigger / hardware-change notifications.
    Subscribe,
    /// Deregister from notifications.
    Unsubscribe,
}

impl Verb {
    /// Channel verbs iterate selected channels (ascending, with wildcard
    /// collapse); board verbs iterate selected boards.
    pub fn targets_channels(&self) -> bool {
        matches!(
            self,
            Verb::Allocate
                | Verb::Free
                | Verb::Record
                | Verb::Stop
                | Verb::ReadData
                | Verb::TriggerSetup
                | Verb::StreamSetup
        )
    }

    /// Read-only query verbs: answered with an immediate busy ack while the
    /// driver is busy, never queued.
    pub fn is_query(&self) -> bool {
        matches!(
            self,
            Verb::Version | Verb::BoardStatus | Verb::Size | Verb::ImageInfo
        )
    }

    /// Verbs handled entirely inside the driver, with no board exchange.
    pub fn is_local(&self) -> bool {
        matches!(self, Verb::Subscribe | Verb::Unsubscribe)
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Verb::Allocate => "allocate",
            Verb::Free => "free",
            Verb::Record => "record",
            Verb::Stop => "stop",
            Verb::ReadData => "read-data",
            Verb::TriggerSetup => "trigger-setup",
            Verb::StreamSetup => "stream-setup",
            Verb::Version => "version",
            Verb::BoardStatus => "board-status",
            Verb::Size => "size",
            Verb::TemperatureLimit => "temperature-limit",
            Verb::Reset => "reset",
            Verb::WriteFlashImage => "write-flash-image",
            Verb::ImageInfo => "image-info",
            Verb::Subscribe => "subscribe",
            Verb::Unsubscribe => "unsubscribe",
        };
        write!(f, "{s}")
    }
}

/// Verb-specific request parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestParams {
    /// No parameters beyond the target masks.
    None,
    /// Trigger configuration for `TriggerSetup`.
    Trigger(TriggerConfig),
    /// Page range for `ReadData`.
    Read {
        /// First page to read, relative to the channel buffer start.
        start_page: u32,
        /// Number of pages.
        page_count: u32,
    },
    /// Limit for `TemperatureLimit`, degrees Celsius.
    Temperature {
        /// Shutdown threshold.
        limit_c: i16,
    },
    /// Stream destination for `StreamSetup`.
    Stream {
        /// Link-layer destination the board streams to.
        dest_addr: [u8; 6],
        /// Stream identifier carried in every streamed frame.
        stream_id: u16,
    },
    /// Image payload for `WriteFlashImage`.
    FlashWrite {
        /// Target image slot.
        slot: u8,
        /// Write password. The factory slot requires the factory password.
        password: u32,
        /// Metadata persisted alongside the image.
        meta: ImageMeta,
        /// Complete image bytes, fully in memory before the write starts.
        image: Vec<u8>,
    },
    /// Slot selector for `ImageInfo`.
    ImageSlot {
        /// Image slot to query.
        slot: u8,
    },
}

/// One parsed client request.
#[derive(Debug, Clone)]
pub struct ClientRequest {
    /// The verb to execute.
    pub verb: Verb,
    /// Targeted boards (board verbs).
    pub board_mask: BoardMask,
    /// Targeted channels (channel verbs).
    pub channel_mask: ChannelMask,
    /// Verb-specific parameters.
    pub params: RequestParams,
}

/// Verb result fields carried in a reply alongside the status array.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyData {
    /// No result fields.
    None,
    /// The driver was busy; the request was neither executed nor queued.
    Busy,
    /// Firmware version per board slot (`None` for unvisited slots).
    Versions(Vec<Option<u32>>),
    /// Raw hardware status word per board slot.
    HardwareStatus(Vec<Option<u16>>),
    /// Buffer size in pages per board slot.
    Sizes(Vec<Option<u32>>),
    /// Buffered pages per channel, in the order the channels were read.
    /// Channels whose read failed contribute no entry.
    Pages(Vec<(ChannelId, Vec<u8>)>),
    /// Flash image metadata per board slot.
    ImageInfo(Vec<Option<ImageMeta>>),
}

/// The single final acknowledgement for one client request.
#[derive(Debug, Clone)]
pub struct ClientReply {
    /// The verb this reply answers.
    pub verb: Verb,
    /// Per-channel (channel verbs) or per-board (board verbs) status array.
    /// Empty for busy acknowledgements and local verbs.
    pub status: Vec<Status>,
    /// Verb result fields.
    pub data: ReplyData,
}

impl ClientReply {
    /// Immediate "driver busy" acknowledgement.
    pub fn busy(verb: Verb) -> Self {
        ClientReply {
            verb,
            status: Vec::new(),
            data: ReplyData::Busy,
        }
    }

    /// Reply with a status array and no result fields.
    pub fn with_status(verb: Verb, status: Vec<Status>) -> Self {
        ClientReply {
            verb,
            status,
            data: ReplyData::None,
        }
    }
}
