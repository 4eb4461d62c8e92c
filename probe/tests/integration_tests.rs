//! Integration tests entrypoint for probe listeners

#[path = "support/mod.rs"]
mod support;

#[path = "integration/probe_endpoints_test.rs"]
mod probe_endpoints_test;

#[path = "integration/probe_lifecycle_test.rs"]
mod probe_lifecycle_test;
