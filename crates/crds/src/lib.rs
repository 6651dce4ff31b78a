//! VM migration CRD definitions
//!
//! Kubernetes Custom Resource Definitions shared by the migration and
//! volume populator controllers.

pub mod condition;
pub mod references;
pub mod provider;
pub mod network_map;
pub mod storage_map;
pub mod host;
pub mod plan;
pub mod migration;
pub mod populator;

pub use condition::{Condition, ConditionStatus};
pub use references::*;
pub use provider::*;
pub use network_map::*;
pub use storage_map::*;
pub use host::*;
pub use plan::*;
pub use migration::*;
pub use populator::*;
