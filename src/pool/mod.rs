//! Viewer pool: slot supervisors and the manager that owns them.

mod manager;
mod supervisor;

pub use manager::{player_url, PoolConfig, PoolError, PoolManager, PoolState};
pub use supervisor::{
    SessionSupervisor, SlotSnapshot, SupervisorConfig, PLAYER_READY_SELECTOR,
};
