//! The RPKI to Router Protocol.
//!
//! See RFC 8210 for all the details.

pub use self::client::Registry;
pub use self::notify::NotifySender;

pub mod client;
pub mod pdu;
pub mod serial;
pub mod server;
mod notify;

