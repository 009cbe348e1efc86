//! # Keel Layers
//!
//! Built-in middlewares for Keel.
//!
//! Currently implemented middlewares:
//! - `LoggingMiddleware`: Logs all model calls with timing information
//! - `ResponseCacheMiddleware`: Serves repeated `generate_text` calls from memory
//!
//! ## Usage
//!
//! ```ignore
//! use keel_core::ModelBuilder;
//! use keel_layer::{LoggingMiddleware, ResponseCacheMiddleware};
//!
//! let model = ModelBuilder::new(resilient)
//!     .middleware(LoggingMiddleware::new())
//!     .middleware(ResponseCacheMiddleware::for_template(template, model_info))
//!     .finish();
//! ```

pub mod cache;
pub mod logging;

// Re-exports
pub use cache::{CacheKeyFn, ResponseCacheMiddleware};
pub use logging::LoggingMiddleware;
