pub mod config;
pub mod interface;
pub mod scenario;
pub mod wire;

pub use interface::{ProtocolError, StreamPeer, SystemContext};
pub use wire::{Feedback, Header, WireError, HEADER_LEN, NACK_BASE};

pub use config::{ChannelConfig, ClientConfig, ConfigError, LossInjection, StreamerConfig};
pub use scenario::{ChannelConfigOverride, TestAction, TestAssertion, TestScenario};
