//! Re-verify a previously written event log:
//! `replay events.ndjson [more.ndjson ...]`
//! Exits non-zero if any invariant fails, so it slots into CI.

use std::fs::File;
use std::io::{BufRead, BufReader};

use bitcover::analysis;
use bitcover::events::EngineRecord;

fn main() {
    env_logger::init();

    let paths: Vec<String> = std::env::args().skip(1).collect();
    if paths.is_empty() {
        eprintln!("usage: replay <events.ndjson> [more.ndjson ...]");
        std::process::exit(2);
    }

    let mut total_violations = 0usize;
    for path in &paths {
        let file = File::open(path).unwrap_or_else(|e| {
            eprintln!("cannot open {path}: {e}");
            std::process::exit(2);
        });

        let mut log: Vec<EngineRecord> = Vec::new();
        for (lineno, line) in BufReader::new(file).lines().enumerate() {
            let line = line.unwrap_or_else(|e| {
                eprintln!("{path}:{}: read error: {e}", lineno + 1);
                std::process::exit(2);
            });
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<EngineRecord>(&line) {
                Ok(record) => log.push(record),
                Err(e) => {
                    eprintln!("{path}:{}: malformed record: {e}", lineno + 1);
                    std::process::exit(2);
                }
            }
        }

        let mech = analysis::verify_mechanics(&log);
        let cons = analysis::verify_conservation(&log);
        let n = mech.len() + cons.len();
        total_violations += n;

        println!("{path}: {} events, {} violation(s)", log.len(), n);
        for v in &mech {
            println!("  {v}");
        }
        for v in &cons {
            println!("  {v}");
        }
    }

    if total_violations > 0 {
        std::process::exit(1);
    }
}
