//! Standard step library
//!
//! Generic, reusable step kinds for building templates: delays, logging,
//! fixed payloads and plain HTTP calls. Concrete service integrations
//! (generation APIs, publishing APIs) live with their owners and plug in
//! through the same `StepWork`/`StepFactory` seams.

mod debug;
mod delay;
mod emit;
mod http;

pub use debug::LogStep;
pub use delay::DelayStep;
pub use emit::EmitStep;
pub use http::HttpRequestStep;

use chainruntime::StepRegistry;
use std::sync::Arc;

/// Register every standard step kind with a registry
pub fn register_all(registry: &mut StepRegistry) {
    registry.register(Arc::new(debug::LogStepFactory));
    registry.register(Arc::new(delay::DelayStepFactory));
    registry.register(Arc::new(emit::EmitStepFactory));
    registry.register(Arc::new(http::HttpRequestStepFactory));
}
