//! Monitor hardware control: DDC/CI command channel, screen-content
//! analysis and per-monitor profiles driven by window focus.

#![forbid(unsafe_code)]

pub mod analyzer;
pub mod coalesce;
pub mod config;
pub mod constants;
pub mod controller;
pub mod coordinator;
pub mod ddc;
pub mod error;
pub mod monitor;
pub mod profile;
pub mod types;
pub mod vcp;
pub mod window;
