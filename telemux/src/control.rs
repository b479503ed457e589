//! Control variant: threshold evaluation and the UDP command channel.
//!
//! - `protocol`: READ/WRITE wire format.
//! - `threshold`: edge-triggered state machine deciding what to send.
//! - `channel`: best-effort transmission to the control endpoint.

pub mod channel;
pub mod protocol;
pub mod threshold;

pub use channel::ControlChannel;
pub use protocol::{ControlMessage, ObjectId, PropertyId, ProtocolError, decode_message, encode_message};
pub use threshold::{OutputSetting, ThresholdController, ThresholdState, Transition, classify};
