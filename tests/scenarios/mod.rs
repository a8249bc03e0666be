//! Scenario-based tests for the provisioning pipeline

mod failure_handling;
mod idempotency;
mod ordering;
