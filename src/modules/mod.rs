//! Representative Pipe Modules
//!
//! A handful of concrete pipeline stages exercising the core contracts:
//! transport-stream byte alignment, PID filtering, RTP decapsulation and a
//! counting sink. Real deployments bring their own module libraries; these
//! are the reference clients of the pipe protocol.

pub mod null;
pub mod rtp_decaps;
pub mod ts_pid_filter;
pub mod ts_sync;

pub use null::UpipeNull;
pub use rtp_decaps::UpipeRtpDecaps;
pub use ts_pid_filter::{TsPidFilterCommand, UpipeTsPidFilter};
pub use ts_sync::UpipeTsSync;

/// Size of one transport-stream packet, in octets.
pub const TS_PACKET_SIZE: usize = 188;

/// First octet of every transport-stream packet.
pub const TS_SYNC_BYTE: u8 = 0x47;

/// Size of the transport-stream packet header, in octets.
pub const TS_HEADER_SIZE: usize = 4;

/// Size of the fixed RTP header, in octets.
pub const RTP_HEADER_SIZE: usize = 12;
