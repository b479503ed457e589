//! Network transport primitives.
//!
//! Non-blocking mio sockets: one TCP stream per signal source and a UDP
//! socket for the control channel.

pub mod endpoint;
pub mod socket;
pub mod stream;

pub use endpoint::Endpoint;
pub use socket::UdpSocket;
pub use stream::{ReadStatus, TcpStream};
