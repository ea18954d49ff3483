//! Migration engine: descriptor model, the five migration components and the
//! shared primitives (database access, errors, console output, audit journal).

pub mod config;
pub mod db;
pub mod descriptor;
pub mod engine;
pub mod error;
pub mod journal;
pub mod mover;
pub mod output;
pub mod pivot;
pub mod rollback;
pub mod schema;
pub mod sets;
pub mod time;
pub mod validate;
