pub mod config;
pub mod executor;
pub mod harvest;
pub mod model;
pub mod telemetry;
pub mod traits;

// Re-export common types for convenience
pub use config::*;
pub use executor::*;
pub use model::*;
pub use traits::*;
