//! Driving hosts of a virtualization pool under test.
//!
//! Commands run over ssh through [`exec::Executor`], state transitions are
//! awaited with [`wait`], and [`monitor::ConsoleMonitor`] keeps a log of the
//! serial console of every guest it's given, across reboots and migrations.

pub mod config;
pub mod exec;
pub mod monitor;
pub mod remote;
pub mod wait;
