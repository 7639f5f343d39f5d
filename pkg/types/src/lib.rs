pub mod attributes;
pub mod audit;
pub mod config;
pub mod document;
pub mod rbac;
pub mod validate;
