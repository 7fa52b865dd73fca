mod error;
mod link;
pub mod protocol;
pub mod sim;
mod transport;
mod types;

pub use error::RotatorError;
pub use link::Rotator;
pub use protocol::Rot2Prog;
pub use transport::{open_serial, Transport};
pub use types::{Command, Limits, RotatorPosition};
