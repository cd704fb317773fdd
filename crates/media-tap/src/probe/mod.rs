//! Buffer probes: the production-thread bridge and the consumer-thread controller.

mod bridge;
mod controller;

pub use bridge::ProbeBridge;
pub use controller::{ProbeController, ProbeEvent};
