//! Behavioural tests for the edit engine.
