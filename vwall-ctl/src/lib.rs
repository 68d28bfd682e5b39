//! # vwall-ctl: video-wall fleet control
//!
//! Operator CLI and long-running daemon on top of `vwall-core`.
//!
//! ## Modes
//!
//! - **One-shot**: `power`, `volume`, `input`, `status`, `deploy` act on
//!   the configured fleet and exit.
//! - **Serve**: health polling, job restore and status logging until Ctrl-C.

pub mod config;
pub mod service;
