//! The watcher: a recurring task that repairs orchestration invariants.
//!
//! Each tick probes collaborator services, fails jobs that stopped making
//! progress, rolls orphaned transient projects back one stage, re-creates
//! recently failed jobs under the retry cap, and closes predecessor ->
//! successor gaps the sequencer missed. The tick never aborts the loop.

mod health;
mod resources;
mod samples;
mod supervisor;

pub use health::{run_probe, DatabaseProbe, ServiceProbe};
pub use resources::ResourceProbe;
pub use samples::SampleMap;
pub use supervisor::{Supervisor, SupervisorSettings};
