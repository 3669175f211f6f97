//! Execution core of the orchestrator.
//!
//! Workers claim jobs from the durable store, resolve handlers through the
//! frozen registry, and stream progress over the bus. The sequencer encodes
//! the static pipeline edges handlers evaluate on success.

pub mod bus;
pub mod cancel;
pub mod context;
pub mod dispatcher;
pub mod registry;
pub mod sequencer;

pub use bus::ProgressBus;
pub use cancel::CancelToken;
pub use context::{JobContext, ProgressReporter};
pub use dispatcher::Dispatcher;
pub use registry::{HandlerRegistry, JobHandler, RegistryBuilder};
pub use sequencer::NextJob;
