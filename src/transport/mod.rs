pub mod rfcomm;
pub mod traits;

#[cfg(test)]
pub(crate) mod memory;

pub use rfcomm::{RfcommConfig, RfcommListener, RfcommTransport};
pub use traits::{BoxedStream, Transport, TransportListener, TransportStream};
