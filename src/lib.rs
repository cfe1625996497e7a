//! Batch translation of game scripts and text files through LLM backends.

pub mod cli;
pub mod config;
pub mod format;
pub mod logging;
pub mod translate;
pub mod utils;
