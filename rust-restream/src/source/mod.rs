//! Source stream resolution.
//!
//! A resolver turns a channel identifier into a URL ffmpeg can read, or
//! reports the channel OFFLINE. Resolution never fails: every error becomes
//! an OFFLINE [`SourceState`] with a reason.

mod resolver;
mod state;
mod streamlink;

pub use resolver::{DirectResolver, SourceResolver, resolver_for};
pub use state::{SourceState, SourceStatus};
pub use streamlink::StreamlinkResolver;
