//! Implementations of the `common::runtime::Runtime` trait: the tokio-backed
//! production runtime and a deterministic test runtime.

pub mod prod;
pub mod testing;
