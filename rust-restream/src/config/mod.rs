//! Configuration model and file-backed store.

mod model;
mod store;

pub use model::{
    DestinationConfig, EncoderConfig, EngineTuning, LogSettings, OutputConfig, PlaceholderConfig,
    ResolverKind, RestartBackoffConfig, RestreamConfig, SourceConfig, owner_marker,
};
pub use store::ConfigStore;
