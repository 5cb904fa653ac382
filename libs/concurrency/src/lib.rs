//! Concurrency primitives.
//! Every blocking call of the probe is awaited through a `ctx::Ctx`,
//! so that shutdown and per-operation deadlines are handled uniformly.

pub mod ctx;
pub mod net;
pub mod testonly;
pub mod time;
