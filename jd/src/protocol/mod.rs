//! Wire protocol between clients and the job server
//!
//! Messages are length-prefixed frames ([`frame`]). Inside a frame a command
//! is encoded by the [`codec`]; replies are `list ...` or `message ...` text.

pub mod client;
pub mod codec;
pub mod frame;

pub use client::JobClient;
pub use codec::{CodecError, Command, CommandCodec, DEFAULT_DELIMITER, MISSING_ARGUMENTS, Reply, UNKNOWN_COMMAND, WireFormat};
pub use frame::{DEFAULT_MAX_FRAME_SIZE, FrameError, read_frame, write_frame};
