//! The structured query engine: DSL validation, compilation to backend
//! search requests, per-user concurrency slots, and the query service that
//! strings them together.

mod compiler;
mod limiter;
mod metrics;
mod service;
mod validator;

pub use crate::{
    compiler::compile_query,
    limiter::ConcurrentQueryLimiter,
    service::{
        predefined_fields,
        QueryService,
    },
    validator::validate_query,
};

#[cfg(test)]
mod tests;
