//! `kest` — document-as-code API test runner.
//!
//! Parses a `.flow.md` (or legacy `.kest`) scenario into a [`document::FlowDoc`],
//! seeds a [`variables::VariableStore`] from the active environment, runs it
//! through the [`scheduler`], and reports pass/fail with a CLI exit code that
//! CI can branch on. See `errors::RunnerError::exit_code` for the mapping.

mod assertions;
mod captures;
mod config;
mod document;
mod errors;
mod jsonpath;
mod loader;
mod logger;
mod markdown;
mod requestparser;
mod scheduler;
mod telemetry;
mod transport;
mod variables;

use clap::{Parser, Subcommand};
use config::KestConfig;
use errors::RunnerError;
use scheduler::{SchedulerConfig, StepOutcome, StepStatus};
use std::path::PathBuf;
use std::process::ExitCode;
use telemetry::{init_telemetry, shutdown_telemetry, TelemetryConfig};
use tracing::{error, info, Level};
use variables::VariableStore;

#[derive(Parser)]
#[command(name = "kest")]
#[command(about = "Document-as-code API test runner", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Writes a fresh `.kest/config.yaml` with a single `local` environment.
    Init,

    /// Runs a `.flow.md` or `.kest` scenario.
    Run {
        /// Path to the scenario file.
        file: PathBuf,

        /// Runs every step concurrently (no dependency order, no captures).
        #[arg(short, long, default_value = "false")]
        parallel: bool,

        /// Max concurrent steps when --parallel is set.
        #[arg(short, long, default_value = "4")]
        jobs: usize,

        /// Logs each step's interpolated request/response.
        #[arg(short, long, default_value = "false")]
        verbose: bool,

        /// Prints the resolved variable store before running.
        #[arg(long, default_value = "false")]
        debug_vars: bool,

        /// Environment to run against. Overrides the scenario's `@env`
        /// directive and the config file's active environment, in that order.
        #[arg(long)]
        env: Option<String>,

        /// Exports traces to an OTLP collector.
        #[arg(long, default_value = "false")]
        otel: bool,

        #[arg(long)]
        otel_endpoint: Option<String>,
    },

    /// Environment management.
    Env {
        #[command(subcommand)]
        command: EnvCommands,
    },

    /// Prints the `.flow.md` authoring guide.
    Guide {
        /// Reserved for future topics (`doc`, the only one today, is the default).
        topic: Option<String>,
    },
}

#[derive(Subcommand)]
enum EnvCommands {
    /// Lists configured environments, marking the active one.
    List,
    /// Switches the persisted active environment.
    Use { name: String },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Init => run_init(),
        Commands::Run {
            file,
            parallel,
            jobs,
            verbose,
            debug_vars,
            env,
            otel,
            otel_endpoint,
        } => {
            let mut telemetry_config = TelemetryConfig::from_env();
            telemetry_config.log_level = if *verbose { Level::DEBUG } else { Level::INFO };
            if *otel {
                if let Some(endpoint) = otel_endpoint {
                    telemetry_config.otlp_endpoint = Some(endpoint.clone());
                } else if telemetry_config.otlp_endpoint.is_none() {
                    telemetry_config.otlp_endpoint = Some("http://localhost:4317".to_string());
                }
            }
            if let Err(e) = init_telemetry(telemetry_config) {
                eprintln!("warning: failed to initialize telemetry: {}", e);
                let _ = tracing_subscriber::fmt()
                    .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
                    .try_init();
            }

            let code = run_scenario(file, *parallel, *jobs, *debug_vars, env.as_deref()).await;
            shutdown_telemetry();
            code
        }
        Commands::Env { command } => run_env_command(command),
        Commands::Guide { topic } => {
            print_guide(topic.as_deref());
            ExitCode::SUCCESS
        }
    }
}

fn run_init() -> ExitCode {
    match KestConfig::init_default() {
        Ok(path) => {
            println!("wrote {}", path.display());
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("{}", e);
            exit_code_for(&e)
        }
    }
}

fn run_env_command(command: &EnvCommands) -> ExitCode {
    let mut config = match KestConfig::load_default() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("{}", e);
            return exit_code_for(&e);
        }
    };

    match command {
        EnvCommands::List => {
            for (name, active) in config.list_environments() {
                println!("{}{}", if active { "* " } else { "  " }, name);
            }
            ExitCode::SUCCESS
        }
        EnvCommands::Use { name } => match config.use_environment(name) {
            Ok(()) => match config.save(".kest/config.yaml") {
                Ok(()) => {
                    println!("active environment is now '{}'", name);
                    ExitCode::SUCCESS
                }
                Err(e) => {
                    eprintln!("{}", e);
                    exit_code_for(&e)
                }
            },
            Err(e) => {
                eprintln!("{}", e);
                exit_code_for(&e)
            }
        },
    }
}

/// `kest run`: load config, resolve the environment, parse the scenario,
/// run it, log it, and print a summary. Every early return funnels through
/// a single `ExitCode`, matching `RunnerError::exit_code`'s 0/1/2/3 scheme.
async fn run_scenario(
    file: &PathBuf,
    parallel: bool,
    jobs: usize,
    debug_vars: bool,
    cli_env: Option<&str>,
) -> ExitCode {
    let doc = match loader::load_scenario(file) {
        Ok(doc) => doc,
        Err(e) => {
            error!(error = %e, "failed to parse scenario");
            return exit_code_for(&e);
        }
    };

    // Fail fast on a cyclic or otherwise malformed edge graph before
    // anything is sent over the wire.
    if let Err(e) = doc.topological_order() {
        error!(error = %e, "invalid flow graph");
        return exit_code_for(&e);
    }

    let config = match KestConfig::load_default() {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "failed to load config");
            return exit_code_for(&e);
        }
    };

    // §4.J: CLI `--env` beats the scenario's `@env` directive, which
    // beats the config file's persisted active environment.
    let env_name = cli_env
        .map(str::to_string)
        .or_else(|| doc.meta.env.clone())
        .unwrap_or_else(|| config.active_env.clone());

    let environment = match config.environment(&env_name) {
        Ok(e) => e,
        Err(e) => {
            error!(error = %e, "unknown environment");
            return exit_code_for(&e);
        }
    };

    let mut vars = VariableStore::new();
    vars.set("base_url", environment.base_url.clone());
    vars.extend(&environment.variables);
    if let Some(id) = &doc.meta.id {
        vars.set("flow_id", id.clone());
    }

    if debug_vars {
        println!("-- variables ({}) --", env_name);
        for (k, v) in vars.iter() {
            println!("{} = {}", k, v);
        }
    }

    let session_name = format!(
        "{}-{}",
        chrono::Utc::now().format("%Y%m%dT%H%M%S"),
        uuid::Uuid::new_v4()
    );
    let mut logger = match logger::SessionLogger::start(&session_name) {
        Ok(l) => l,
        Err(e) => {
            error!(error = %e, "failed to open session log");
            return exit_code_for(&e);
        }
    };

    let scheduler_config = SchedulerConfig { parallel, jobs };
    let outcomes = match scheduler::run(&doc, &mut vars, &scheduler_config).await {
        Ok(outcomes) => outcomes,
        Err(e) => {
            error!(error = %e, "scheduler refused to run this flow");
            return exit_code_for(&e);
        }
    };

    for outcome in &outcomes {
        // §4.I: a step's request/response is recorded unless it set
        // `no_record`, or there's nothing to record (exec/skipped steps,
        // or a network error that never produced a response).
        match (&outcome.response, outcome.no_record) {
            (Some(response), false) => {
                let _ = logger.record_request(&outcome.step_id, &outcome.method, &outcome.url, response);
            }
            _ => {
                let _ = logger.record_outcome(outcome);
            }
        }
    }
    let log_path = logger.close().to_path_buf();

    print_summary(&outcomes, &log_path);

    if outcomes.iter().any(|o| o.status == StepStatus::Failed) {
        ExitCode::from(1)
    } else {
        ExitCode::SUCCESS
    }
}

fn print_summary(outcomes: &[StepOutcome], log_path: &std::path::Path) {
    let mut passed = 0u32;
    let mut failed = 0u32;
    let mut skipped = 0u32;

    for outcome in outcomes {
        let mark = match outcome.status {
            StepStatus::Passed => {
                passed += 1;
                "✓"
            }
            StepStatus::Failed => {
                failed += 1;
                "✗"
            }
            StepStatus::Skipped => {
                skipped += 1;
                "-"
            }
        };
        let status = outcome
            .http_status
            .map(|s| s.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{} {:<10} {:<6} {:<40} {:>4} {:>6}ms",
            mark, outcome.step_id, outcome.method, outcome.url, status, outcome.duration_ms
        );
        if let Some(err) = &outcome.error {
            println!("    {}", err);
        }
        for assertion in &outcome.failed_assertions {
            println!("    assert failed: {}", assertion);
        }
        info!(step_id = %outcome.step_id, status = ?outcome.status, duration_ms = outcome.duration_ms, "step finished");
    }

    println!(
        "\n{} passed, {} failed, {} skipped — log: {}",
        passed,
        failed,
        skipped,
        log_path.display()
    );
}

fn exit_code_for(e: &RunnerError) -> ExitCode {
    ExitCode::from(e.exit_code() as u8)
}

const GUIDE_DOC: &str = r#"kest scenario guide
====================

A scenario is a `.flow.md` file: prose for humans, fenced code blocks for
kest. Three block kinds:

  ```flow
  @id checkout
  @env staging
  ```

  ```step
  @id create_order
  @on_fail continue

  POST /orders
  Content-Type: application/json

  {"sku": "{{sku}}"}

  [Captures]
  order_id = body.id

  [Asserts]
  status == 201
  ```

  ```edge
  @from create_order
  @to cancel_order
  @on failure
  ```

  `http`/`json` are accepted synonyms for the `step` fence kind.

Legacy one-test-per-line `.kest` files are still read: `GET /health`,
`--header "X: Y"`, `--capture name=body.path`, `--assert "status == 200"`.

Run it: `kest run scenario.flow.md --env staging`.
"#;

fn print_guide(topic: Option<&str>) {
    match topic {
        None | Some("doc") => println!("{}", GUIDE_DOC),
        Some(other) => println!("no guide topic '{}' — try `kest guide doc`", other),
    }
}
