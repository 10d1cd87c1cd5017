//! AWS dedicated-host pool manager and capacity planner for the
//! aquarium-fish node allocation engine.
//!
//! See [`driver::AwsDriver`] for the external interface (§6); the other
//! modules are its internal collaborators (§4).

pub mod client;
pub mod config;
pub mod driver;
pub mod lookup;
pub mod placement;
pub mod planner;
pub mod pool;
pub mod quota;

pub use config::Config;
pub use driver::{AwsDriver, Resource, ResourceStatus, Task};
