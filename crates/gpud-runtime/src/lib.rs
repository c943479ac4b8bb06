//! Container runtime adapter for gpud
//!
//! The daemon talks to a sibling docker daemon (DOOD): worker containers are
//! created next to the service, with the leased GPU attached and the model
//! directory mounted read-only. Log streams come from a synchronous source
//! and are bridged onto the scheduler through a dedicated blocking task; see
//! [`logs::bridge_log_source`].

mod docker;
mod logs;
mod streamer;
mod traits;

pub use docker::DockerCli;
pub use logs::{bridge_log_source, LogLine, LogOrigin, LogSource};
pub use streamer::{InstanceStreamer, StreamMode};
pub use traits::{ContainerRuntime, ContainerSpec};
