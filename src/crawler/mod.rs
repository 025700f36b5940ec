//! Harvesting worker
//!
//! A worker consumes batch descriptors from the `batches` topic, walks each
//! batch's sequence range through the Steam Web API and forwards every record
//! to the `matches` topic.
//!
//! - [`api`] - Steam Web API methods, arguments and request URLs
//! - [`fetcher`] - single-page fetches behind the [`PageSource`] trait
//! - [`worker`] - the per-batch crawl loop
//! - [`runner`] - queue message handling and coordinator progress reports

pub mod api;
pub mod fetcher;
pub mod runner;
pub mod worker;

pub use api::{ApiArgument, SteamApi, SteamMethod};
pub use fetcher::{MatchFetcher, PageSource};
pub use runner::{ProgressReporter, WorkerRunner};
pub use worker::{BatchReport, BatchWorker, WorkerSettings};
