//! Provider routing.
//!
//! Given a routing configuration and a call's prompt/hint, select a primary
//! route and an ordered list of fallback candidates.

pub mod config;
pub mod decide;

pub use config::{FallbackPolicy, HeuristicConfig, ProviderRoutingConfig, RetryPolicy};
pub use decide::{decide_provider_route, RouteDecision, RouteInput};
