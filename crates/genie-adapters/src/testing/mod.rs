//! Testing utilities for deterministic session tests.

mod scripted_channel;

pub use scripted_channel::{ScriptedChannel, ScriptedSpawner};
