//! Wire protocol between the bridge and the controller process.
//!
//! The protocol is strictly request/response: the controller writes one
//! command frame, the bridge answers with exactly one response frame, in
//! arrival order.

mod command;
pub mod frame;
mod value;

pub use command::{Command, Operation, Reply, Response, Status};
pub use frame::{DEFAULT_MAX_FRAME_BYTES, FRAME_VERSION};
pub use value::SignalValue;
