//! Integration tests module
//!
//! End-to-end tests for the seqharvest system, including:
//! - Allocation of contiguous, non-overlapping batches
//! - Broker stats → batch production
//! - Steam API → worker → matches topic → record store
//! - Worker authentication against the coordinator API

pub mod allocation_test;
pub mod auth_test;
pub mod demand_test;
pub mod storage_test;
pub mod worker_test;
