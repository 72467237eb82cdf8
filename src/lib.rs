//! deckbabel - Batched Slide-Deck Translation
//!
//! Extracts every translatable text unit from a slide deck's shape
//! tree, translates the units in parallel batches through an external
//! backend, writes the results back in place, and accounts for token
//! usage and cost per job.

pub mod cli;
pub mod collector;
pub mod config;
pub mod document;
pub mod error;
pub mod job;
pub mod metrics;
pub mod pipeline;
pub mod scheduler;
pub mod translate;
pub mod usage;
pub mod validate;
