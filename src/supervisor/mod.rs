//! Connection resilience: health record, keep-alive probing, health
//! monitoring and the session reconnect/restart state machine.

pub mod backoff;
pub mod connection;
pub mod health;
pub mod keepalive;
pub mod monitor;
pub mod session_store;

pub use connection::{
    ConnectionSupervisor, ExitProcess, ProcessControl, ReconnectOutcome, RestartOutcome,
    SupervisorSettings,
};
pub use health::{ConnectionState, DeploymentState, HealthSnapshot, SharedHealth};
pub use keepalive::KeepAliveProber;
pub use monitor::HealthMonitor;
pub use session_store::{CredentialStore, SessionDirStore};
