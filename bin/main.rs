//! ChatDB CLI Entry Point
//!
//! This binary provides the command-line interface for ChatDB.

use std::process;

#[tokio::main]
async fn main() {
    if let Err(e) = chatdb_interface::run_cli().await {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}
