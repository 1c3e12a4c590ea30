//! deskpilot: a computer-use agent that drives browsers, desktops and
//! background windows through a resolution-independent 0-1000 grid.
//!
//! A session loops over observe, ask the oracle, validate, dispatch and
//! record until the task completes, fails, or is aborted. The HTTP API in
//! [`api`] starts and steers sessions and streams their events.

pub mod api;
pub mod backend;
pub mod config;
pub mod geometry;
pub mod llm;
pub mod oracle;
pub mod safety;
pub mod session;
pub mod tools;

pub use config::Config;
