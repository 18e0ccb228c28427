#![doc = "Process setup helpers shared by binaries and tests."]

pub mod env;
