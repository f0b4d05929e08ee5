//! Core app-sweep logic

pub mod cleanup;
pub mod clock;
pub mod config;
pub mod process;
pub mod protection;
pub mod registry;
pub mod scheduler;
pub mod scorer;
pub mod watcher;

#[cfg(test)]
pub mod testing;
