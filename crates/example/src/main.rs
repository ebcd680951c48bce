//! Runs the demo suite and prints a summary.
//!
//! # Usage
//!
//! ```bash
//! canopy-demo [config.env]
//! ```
//!
//! Keys from the optional `key=value` file are overridden by `CANOPY_*`
//! environment variables, which may also come from a `.env` file in the
//! working directory.
//!
//! # Example
//!
//! ```bash
//! CANOPY_EXECUTION_PARALLEL_ENABLED=true \
//! CANOPY_EXECUTION_PARALLEL_MODE_DEFAULT=concurrent \
//! CANOPY_LOG_LEVEL=debug \
//!     canopy-demo
//! ```

use canopy_core::TracingSetup;
use canopy_engine::prelude::*;
use example::{DemoContext, OutcomeCounter, demo_tree};
use std::process::ExitCode;
use std::sync::Arc;

fn main() -> ExitCode {
    let _ = dotenvy::dotenv();

    let args: Vec<String> = std::env::args().collect();
    if args.len() > 2 {
        eprintln!("Usage: canopy-demo [config.env]");
        return ExitCode::from(2);
    }

    let params = match args.get(1) {
        Some(path) => match ConfigurationParameters::from_path(path) {
            Ok(params) => params,
            Err(e) => {
                eprintln!("Error: {e}");
                return ExitCode::from(2);
            }
        },
        None => ConfigurationParameters::new(),
    };
    let params = params.with_env_overrides();

    match TracingSetup::from_parameters(&params) {
        Ok(setup) => setup.init(),
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::from(2);
        }
    }

    let counter = Arc::new(OutcomeCounter::new());
    let registry = ListenerRegistry::new();
    let registered = registry
        .register("logging", Arc::new(LoggingListener::new()))
        .and_then(|registry| registry.register("outcomes", counter.clone()));
    if let Err(e) = registered {
        eprintln!("Error: {e}");
        return ExitCode::from(2);
    }

    let request = ExecutionRequest::new(demo_tree(), Arc::new(registry), DemoContext::default())
        .with_configuration(params);

    let summary = match HierarchicalTestExecutor::new(request).execute() {
        Ok(summary) => summary,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::FAILURE;
        }
    };

    let outcomes = counter.outcomes();
    println!(
        "{} nodes in {:?} on {} thread(s): {} successful, {} failed, {} aborted, {} skipped ({} dynamic)",
        summary.nodes_executed,
        summary.duration,
        summary.worker_threads,
        outcomes.successful,
        outcomes.failed,
        outcomes.aborted,
        outcomes.skipped,
        outcomes.dynamic,
    );

    if outcomes.failed > 0 {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
