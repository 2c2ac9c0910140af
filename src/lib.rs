//! Resilience engine
//!
//! Classifies failures of calls to unreliable dependencies, retries them per
//! named policies with configurable backoff, guards each dependency with a
//! circuit breaker and keeps a time-windowed ledger of every failure.
//!
//! # Quick Start
//!
//! ```no_run
//! use resilience_engine::prelude::*;
//!
//! # async fn fetch() -> std::result::Result<String, OperationError> { Ok(String::new()) }
//! # async fn example() -> resilience_engine::error::Result<()> {
//! let coordinator = ResilienceCoordinator::from_config(&EngineConfig::from_env()?)?;
//! let context = ErrorContext::builder().organization_id("org-42").build();
//! let body = coordinator
//!     .execute_with_retry(fetch, "fetch_report", "cloud_api", context)
//!     .await?;
//! println!("{body}");
//! # Ok(())
//! # }
//! ```

pub mod breaker;
pub mod classify;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod ledger;
pub mod policy;
pub mod prelude;
