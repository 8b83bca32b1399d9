//! Core types: identifiers, parameter contexts, tasks, and workflow graphs.

pub mod context;
pub mod dag;
pub mod task;
pub mod types;
