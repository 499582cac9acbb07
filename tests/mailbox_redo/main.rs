//! Integration tests for the mailbox redo log.
//!
//! These run the full stack through the `zredo` facade: operations from the
//! catalog, a real [`zredo::LogManager`] writing segment files, and replay
//! into the reference store. Unit tests in each crate cover the codec,
//! lifecycle and reader edge cases in isolation.

mod archive_replay;
mod calendar_table;
