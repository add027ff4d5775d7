//! An async interface to [`bluelink`].
//!
//! [`LinkAsync`] turns connecting, disconnecting and sending into futures, scanning into a
//! stream, and the remaining callbacks into broadcast channels. It is runtime agnostic.

pub mod error;
mod link;
mod util;

pub use error::{Error, ErrorKind, Result};
pub use link::{ConnectionEvent, LinkAsync};
pub use util::BroadcastReceiver;
