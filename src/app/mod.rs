//! CLI application: config file, output sink, progress UI and the run loop.

pub(crate) mod config_file;
pub(crate) mod progress;
pub(crate) mod runner;
pub(crate) mod sink;
