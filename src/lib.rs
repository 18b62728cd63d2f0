//! Assessor - batch rubric assessment engine.
//!
//! Each submission in a list is run through a graph of analysis tasks. Their
//! structured outputs are mapped onto a weighted rubric, totalled and written
//! as a per-submission report; written reports can then be tabulated across
//! submissions.

pub mod cli;
pub mod config;
pub mod error;
pub mod extract;
pub mod models;
pub mod orchestrator;
pub mod registry;
pub mod report;
pub mod rubric;
pub mod scoring;
pub mod task;
