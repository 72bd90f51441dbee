pub mod logger;
pub mod manifest;
pub mod node;
pub mod plan;

pub use logger::{LogConfig, LogLevel, StdioLogMode};
pub use manifest::{PreServiceConfig, RunsOn, ServiceConfig};
pub use node::{Interface, NodeDescriptor, NodeTable};
pub use plan::{Distribution, ParamKind, ParamValue, Plan, ServiceKind};
