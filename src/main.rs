use std::fs::File;
use std::io::{BufWriter, Write};

use bitcover::analysis::{self, ConservationViolation, MechanicsViolation};
use bitcover::sim::{StressConfig, StressOutcome, StressScenario};

fn main() {
    env_logger::init();

    let args: Vec<String> = std::env::args().collect();

    let mut seed_override: Option<u64> = None;
    let mut ticks_override: Option<u32> = None;
    let mut output_path = "events.ndjson".to_string();
    let mut quiet = false;
    let mut runs: Option<u64> = None;
    let mut output_dir_opt: Option<String> = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--seed" => {
                i += 1;
                seed_override = Some(args[i].parse().expect("--seed requires a u64"));
            }
            "--ticks" => {
                i += 1;
                ticks_override = Some(args[i].parse().expect("--ticks requires a u32"));
            }
            "--output" => {
                i += 1;
                output_path = args[i].clone();
            }
            "--quiet" => quiet = true,
            "--runs" => {
                i += 1;
                runs = Some(args[i].parse().expect("--runs requires a positive integer"));
            }
            "--output-dir" => {
                i += 1;
                output_dir_opt = Some(args[i].clone());
            }
            _ => {}
        }
        i += 1;
    }

    let mut base_config = StressConfig::canonical();
    let start_seed = seed_override.unwrap_or(base_config.seed);
    if let Some(t) = ticks_override {
        base_config.ticks = t;
    }

    if let Some(n) = runs {
        use rayon::prelude::*;

        if let Some(ref dir) = output_dir_opt {
            std::fs::create_dir_all(dir).expect("failed to create output directory");
        }

        let results: Vec<(u64, StressOutcome, usize, usize)> = (0u64..n)
            .into_par_iter()
            .map(|i| {
                let seed = start_seed + i;
                let mut config = base_config.clone();
                config.seed = seed;
                let mut sim = StressScenario::from_config(config);
                sim.start();
                let outcome = sim.run();

                if let Some(ref dir) = output_dir_opt {
                    let path = format!("{dir}/events_seed_{seed}.ndjson");
                    write_ndjson(&sim.engine.log, &path);
                }

                let mech = analysis::verify_mechanics(&sim.engine.log).len();
                let cons = analysis::verify_conservation(&sim.engine.log).len()
                    + sim.engine.audit().len();
                (seed, outcome, mech, cons)
            })
            .collect();

        if !quiet {
            print_runs_table(&results);
        }
        let bad: usize = results.iter().map(|(_, _, m, c)| m + c).sum();
        if bad > 0 {
            eprintln!("{bad} violation(s) across {n} runs");
            std::process::exit(1);
        }
    } else {
        let mut config = base_config;
        config.seed = start_seed;

        let mut sim = StressScenario::from_config(config);
        sim.start();
        let outcome = sim.run();

        write_ndjson(&sim.engine.log, &output_path);

        if !quiet {
            println!("Events fired: {}", sim.engine.log.len());
            print_outcome(&outcome);
            print_verification(&sim);
        }
    }
}

fn write_ndjson(log: &[bitcover::events::EngineRecord], path: &str) {
    let file = File::create(path).unwrap_or_else(|e| panic!("failed to create {path}: {e}"));
    let mut writer = BufWriter::new(file);
    for record in log {
        serde_json::to_writer(&mut writer, record).expect("failed to serialize event");
        writeln!(writer).expect("failed to write newline");
    }
}

fn print_outcome(o: &StressOutcome) {
    println!("\n=== Run summary ===");
    println!("  Reservations:           {}", o.reservations);
    println!("  Capacity rejections:    {}", o.capacity_rejections);
    println!("  Dependency rejections:  {}", o.dependency_rejections);
    println!("  Premium rounds:         {}", o.premium_rounds);
    println!("  Margin calls issued:    {}", o.calls_issued);
    println!("  Liquidations:           {}", o.liquidations);
    println!("  Obligations expired:    {}", o.expirations);
    println!(
        "  Price path:             ${:.2} .. ${:.2} (final ${:.2})",
        o.min_price as f64 / 100.0,
        o.max_price as f64 / 100.0,
        o.final_price as f64 / 100.0
    );
}

fn print_verification(sim: &StressScenario) {
    // ── Mechanics invariants ──────────────────────────────────────────────────
    let violations = analysis::verify_mechanics(&sim.engine.log);

    let inv = |variant: fn(&MechanicsViolation) -> bool| {
        if violations.iter().any(variant) { "FAIL" } else { "PASS" }
    };

    println!("\n=== Mechanics invariants ===");
    println!("  [1] Log timestamp-ordered:           {}", inv(|v| matches!(v, MechanicsViolation::OutOfOrder { .. })));
    println!("  [2] Deadline never lengthens:        {}", inv(|v| matches!(v, MechanicsViolation::DeadlineLengthened { .. })));
    println!("  [3] Liquidation requires open call:  {}", inv(|v| matches!(v, MechanicsViolation::LiquidationWithoutCall { .. })));
    println!("  [4] No withdrawal during call:       {}", inv(|v| matches!(v, MechanicsViolation::WithdrawalDuringCall { .. })));
    println!("  [5] Safe mode entries paired:        {}", inv(|v| matches!(v, MechanicsViolation::SafeModeExitUnpaired)));

    if !violations.is_empty() {
        println!("\n  {} violation(s):", violations.len());
        for v in &violations {
            println!("    {v}");
        }
    }

    // ── Conservation invariants ───────────────────────────────────────────────
    let cons = analysis::verify_conservation(&sim.engine.log);
    let cinv = |variant: fn(&ConservationViolation) -> bool| {
        if cons.iter().any(variant) { "FAIL" } else { "PASS" }
    };
    println!("\n=== Conservation invariants ===");
    println!("  [6] Premiums conserve value:         {}", cinv(|v| matches!(v, ConservationViolation::PremiumLeak { .. })));
    println!("  [7] Transfers sum to liquidations:   {}", cinv(|v| matches!(v, ConservationViolation::TransferSumMismatch { .. })));
    println!("  [8] Reservations carry collateral:   {}", cinv(|v| matches!(v, ConservationViolation::EmptyReservation { .. })));
    if !cons.is_empty() {
        println!("\n  {} violation(s):", cons.len());
        for v in &cons {
            println!("    {v}");
        }
    }

    // ── Live-state audit ──────────────────────────────────────────────────────
    let findings = sim.engine.audit();
    println!("\n=== State audit ===");
    println!(
        "  [9] locked ≤ deposited, tiers sum:   {}",
        if findings.is_empty() { "PASS" } else { "FAIL" }
    );
    for f in &findings {
        println!("    {f}");
    }
}

fn print_runs_table(results: &[(u64, StressOutcome, usize, usize)]) {
    println!("\n=== Per-Run Data ===");
    println!(
        "{:>6} | {:>8} | {:>8} | {:>7} | {:>7} | {:>7} | {:>10} | {:>10}",
        "Seed", "Reserved", "Rejected", "Calls", "Liquid", "Expired", "MechViol", "ConsViol"
    );
    println!("{}", "-".repeat(86));
    for (seed, o, mech, cons) in results {
        println!(
            "{:>6} | {:>8} | {:>8} | {:>7} | {:>7} | {:>7} | {:>10} | {:>10}",
            seed,
            o.reservations,
            o.capacity_rejections + o.dependency_rejections,
            o.calls_issued,
            o.liquidations,
            o.expirations,
            mech,
            cons,
        );
    }
}
