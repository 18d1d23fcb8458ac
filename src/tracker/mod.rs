//! Working-tree tracking through git.

pub mod git;

pub use git::GitTracker;
