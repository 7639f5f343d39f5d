//! Centralized constants for the rbactl project.
//!
//! All project-wide constant values live here.
//! Change a value in one place and it applies everywhere.

pub mod audit;
pub mod paths;
pub mod rbac;
