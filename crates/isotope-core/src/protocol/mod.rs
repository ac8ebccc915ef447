//! Serial Protocol Communication
//!
//! Implements the line-oriented JSON protocol spoken by the Isotope board.
//!
//! Every command carries a 16-bit sequence number that the board echoes in
//! its replies. A background reader files replies by sequence; callers either
//! block for the first reply or poll for later ones (long-running commands
//! answer `ACK` first and `SUC`/`ABT` later under the same sequence).

pub mod commands;
mod connection;
mod dispatcher;
mod error;
pub mod frame;
mod reader;
mod registry;
pub mod serial;
pub mod stream;
mod transport;

pub use commands::{Command, CommandKind, Section};
pub use connection::Connection;
pub use dispatcher::Dispatcher;
pub use error::{IsotopeError, Result};
pub use frame::{ErrorKind, Reply, ReplyStatus};
pub use reader::ReaderTask;
pub use registry::ResponseRegistry;
pub use serial::{list_ports, PortInfo};
pub use stream::CommunicationChannel;
pub use transport::{LineReader, Transport, TCP_PREFIX};

/// Board name reported in the `Who_I_am` payload
pub const BOARD_NAME: &str = "Isotope Board";

/// Bare `Who_I_am` payload of firmware that predates version reporting
pub const LEGACY_BOARD_NAME: &str = "ISOTOPE_BOARD";

/// Default baud rate of the board's USB serial port
pub const DEFAULT_BAUD_RATE: u32 = 115200;

/// Default wait for a reply in milliseconds
pub const DEFAULT_RESPONSE_TIMEOUT_MS: u64 = 5000;

/// Default heartbeat interval in milliseconds
pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 100;

/// Default read timeout of the reader thread in milliseconds
pub const DEFAULT_READER_POLL_INTERVAL_MS: u64 = 10;

/// Default grace period before a motor is asked whether it is still busy
pub const DEFAULT_BUSY_POLL_DELAY_MS: u64 = 100;

/// Longest line accepted from the board
pub const MAX_FRAME_SIZE: usize = 4096;
