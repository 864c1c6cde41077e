use std::sync::Arc;

use crate::config::RestreamConfig;
use crate::encoder::EncodeProfile;
use crate::placeholder::InputDescriptor;
use crate::source::SourceState;

/// Everything one supervisor cycle decided, shared by every worker so no
/// worker observes a half-updated decision.
#[derive(Debug)]
pub struct CycleDecision {
    pub cycle: u64,
    pub source: Arc<SourceState>,
    /// Input every publisher should be fed from this cycle.
    pub input: InputDescriptor,
    pub config: Arc<RestreamConfig>,
    pub profile: Arc<EncodeProfile>,
}
