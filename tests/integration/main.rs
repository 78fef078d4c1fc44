//! Integration tests: the full sync → allocate workflow against a fake
//! JSON-RPC node, with real ledger and sheet files on disk.

mod fake_node;
mod workflow;
