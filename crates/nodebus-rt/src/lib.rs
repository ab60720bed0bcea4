//! ---
//! nb_section: "01-core-functionality"
//! nb_subsection: "module"
//! nb_type: "source"
//! nb_scope: "code"
//! nb_description: "Runtime helpers for firmware tasks."
//! nb_version: "v0.0.0-prealpha"
//! nb_owner: "tbd"
//! ---
//! Runtime helpers for nodebus tasks: bounded queues and thread supervision.

pub mod queue;
pub mod task;

pub use queue::{MessageQueue, QueueHandle};
pub use task::{ShutdownSignal, TaskSet};
