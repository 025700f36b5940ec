//! Integration tests entry point
//!
//! This file serves as the entry point for all integration tests.
//! It includes the integration_tests module which contains:
//! - Batch allocation properties
//! - Demand-driven batch production against a stubbed broker
//! - Worker crawls against a stubbed Steam Web API
//! - Coordinator API authentication
//! - Persistent storage

mod common;
mod integration_tests;
