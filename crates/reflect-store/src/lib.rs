//! SQLite persistence for reflect
//!
//! Implements every storage port from `reflect-core` against one local
//! database file.

pub mod sqlite;

pub use sqlite::ReflectDb;
