//! The kvdrill binary: run the reference key-value workload from the
//! command line.
//!
//! Exits 0 on a completed run, including one that recorded request failures;
//! exits non-zero when the configuration fails validation before any request
//! is sent.

use kvdrill::KvDrill;

fn main() {
    let drill = match KvDrill::initialize() {
        Ok(drill) => drill,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    // Request failures never surface here: sustained unreachability of the
    // target shows up as a 100% failure rate in the metrics instead.
    if let Err(e) = drill.execute() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
