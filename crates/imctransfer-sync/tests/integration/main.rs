//! Integration tests for imctransfer-sync
//!
//! Drives the executor and the poller against an in-memory remote
//! directory and real temporary directories.


mod test_poller;
