//! Graph memory HTTP server.
//! Run with: cargo run --bin graph-memory-server

use std::process::ExitCode;

use graph_memory::start_graph_memory;

fn main() -> ExitCode {
    start_graph_memory::run()
}
