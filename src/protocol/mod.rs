//! Wire protocol of the omxremote server.
//!
//! The server speaks a small datagram protocol over UDP multicast. Every
//! datagram is a frame:
//!
//! ```text
//! +--------+-------+---------------------------------------+
//! | header | flags | payload (session id + message text)   |
//! +--------+-------+---------------------------------------+
//!   1 byte  1 byte   up to buffer size - 2 bytes
//! ```
//!
//! Messages longer than one datagram are split into fragments that all
//! carry [`Flags::MORE_FOLLOWS`] except the last one.
//!
//! # Submodules
//!
//! * [`header`] - Message type codes
//! * [`codec`] - Frame encoding, fragmentation and reassembly
//! * [`session`] - Session identity and login reply parsing
//! * [`messages`] - Parsers and formatters for message payloads
//! * [`property`] - Catalog of descriptive player properties
//! * [`files`] - Remote file listings
//! * [`settings`] - Remote server settings
//!
//! Everything in this module is pure: nothing here touches the network,
//! which keeps every payload format unit-testable in isolation.

pub mod codec;
pub mod files;
pub mod header;
pub mod messages;
pub mod property;
pub mod session;
pub mod settings;

pub use codec::{Flags, Frame, Packet, Reassembler};
pub use files::FileListing;
pub use header::Header;
pub use property::PlayerProperty;
pub use session::Session;
pub use settings::{Setting, SettingType};
