//! DDC/CI command channel: transport, caching, retry, rate limiting.

mod channel;
mod transport;

pub use channel::{BusyObserver, Capabilities, ChannelConfig, DdcChannel, FeatureCaps};
pub use transport::{DdcTransport, DdcutilTransport, TransportError, TransportResult};
