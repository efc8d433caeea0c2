//! Tests for the sandbox executor.

mod behaviour;
