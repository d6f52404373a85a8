#![doc = "folder-courier-core: core logic library for folder-courier."]

//! This crate contains the upload orchestration engine: folder scanning into a
//! classified work plan, batch construction, the retry/backoff state machine and
//! the run statistics that tie them together.
//! Transport to a concrete messaging service is not included here; it plugs in
//! through the [`contract::Messenger`] trait.
//!
//! # Usage
//! Build a [`config::RunConfig`], pick a [`contract::Messenger`] and a
//! [`contract::ProgressReporter`], then drive a run with
//! [`orchestrate::Orchestrator`].

pub mod batch;
pub mod cancel;
pub mod classify;
pub mod config;
pub mod contract;
pub mod orchestrate;
pub mod progress;
pub mod retry;
pub mod stats;
