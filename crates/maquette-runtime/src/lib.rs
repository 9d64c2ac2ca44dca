//! # maquette-runtime: Run supervision for `Maquette`
//!
//! The runtime layer turns the engine into a service: it keeps an
//! in-memory store of run records, builds a full simulation per run
//! from its scenario, supervises the worker task that drives the event
//! loop, and exposes live reconfiguration of workload patterns while a
//! run executes.
//!
//! Surrounding orchestration (HTTP/gRPC surfaces, webhook delivery,
//! optimization tooling) sits on top of [`RunExecutor`]; nothing here
//! owns a wire protocol, and runs do not outlive the process.

mod error;
mod executor;
mod report;
mod store;

pub use error::{Result, RuntimeError};
pub use executor::RunExecutor;
pub use report::render_report;
pub use store::RunStore;
