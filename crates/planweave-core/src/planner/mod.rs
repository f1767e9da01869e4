//! Plan steps → ordered coding tasks.
//!
//! `intent` reads a step's wording, `paths` maps it onto files, `tasks`
//! turns the touched symbols into tasks and `ordering` sequences them.

pub mod complexity;
pub mod intent;
pub mod ordering;
pub mod paths;
pub mod tasks;
