//! DP-013: CLI subcommands — init, validate, run, report, providers, schema.

use crate::core::config::{self, EngineConfig, DEFAULT_CONFIG_FILE};
use crate::core::dispatcher::Capability;
use crate::core::executor::{Engine, EngineOptions, RunReport};
use crate::core::parser::{self, ValidationResult};
use crate::core::resolver::{self, Builtins, Scope};
use crate::core::types::{Recipe, RunState, StepPhase, StepResult};
use crate::journal::eventlog::{self, ExecutionLogger, JsonlSink};
use crate::journal::replay;
use crate::providers;
use clap::{CommandFactory, Parser, Subcommand};
use indexmap::IndexMap;
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(
    name = "deskpilot",
    version,
    about = "Declarative desktop automation — YAML recipes, retries, verified steps, JSONL audit log"
)]
pub struct Cli {
    /// Debug-level diagnostics on stderr
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Scaffold a recipe and config file
    Init {
        /// Directory to initialize (default: current)
        #[arg(default_value = ".")]
        path: PathBuf,
    },

    /// Validate a recipe without executing it
    Validate {
        /// Path to the recipe
        #[arg(short, long, default_value = "recipe.yaml")]
        file: PathBuf,
    },

    /// Execute a recipe
    Run {
        /// Path to the recipe
        #[arg(short, long, default_value = "recipe.yaml")]
        file: PathBuf,

        /// Validate and show the resolved steps without executing
        #[arg(long)]
        dry_run: bool,

        /// Runtime variable (KEY=VALUE), shadows recipe variables
        #[arg(long = "var", value_name = "KEY=VALUE")]
        vars: Vec<String>,

        /// Engine config (default: deskpilot.toml if present)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Event log directory (overrides config)
        #[arg(long)]
        log_dir: Option<PathBuf>,
    },

    /// Summarize a run from its event log
    Report {
        /// Path to events.jsonl
        log: PathBuf,
    },

    /// Show capabilities and the actions they serve
    Providers,

    /// Print the JSON Schema of the recipe document
    Schema,

    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

/// Install the stderr diagnostics subscriber.
///
/// `DESKPILOT_LOG` takes an `EnvFilter` directive and wins over `--verbose`.
pub fn init_tracing(verbose: bool) {
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::{fmt, EnvFilter};

    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_env("DESKPILOT_LOG").unwrap_or_else(|_| default.into());
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .try_init();
}

/// Dispatch a CLI command.
pub fn dispatch(cmd: Commands) -> Result<(), String> {
    match cmd {
        Commands::Init { path } => cmd_init(&path),
        Commands::Validate { file } => cmd_validate(&file),
        Commands::Run {
            file,
            dry_run,
            vars,
            config,
            log_dir,
        } => {
            let vars = parse_vars(&vars)?;
            cmd_run(&file, config.as_deref(), log_dir.as_deref(), vars, dry_run)
        }
        Commands::Report { log } => cmd_report(&log),
        Commands::Providers => cmd_providers(),
        Commands::Schema => cmd_schema(),
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "deskpilot", &mut std::io::stdout());
            Ok(())
        }
    }
}

const RECIPE_TEMPLATE: &str = r#"name: hello-files
description: "Write, read back and copy a greeting"
version: "1.0"

variables:
  out_dir: out

steps:
  - name: write_greeting
    action: file_write
    target:
      file: "${out_dir}/greeting.txt"
    text: "Hello from ${recipe_name} (${run_id})"
    verify_after: true

  - name: read_greeting
    action: file_read
    target:
      file: "${out_dir}/greeting.txt"
    retry_attempts: 2
    save_as: greeting

  - name: archive_greeting
    action: file_copy
    target:
      files: ["${out_dir}/greeting.txt", "${out_dir}/greeting_${date}.txt"]
    verify_after: true
"#;

const CONFIG_TEMPLATE: &str = r#"[log]
dir = "artifacts/logs"
artifacts_dir = "artifacts/screens"

[defaults]
timeout_secs = 30.0

[retry]
base_secs = 1.0
factor = 2.0
cap_secs = 30.0

[fs]
allowed_paths = []

[ocr]
command = "tesseract"
"#;

fn cmd_init(path: &Path) -> Result<(), String> {
    let recipe_path = path.join("recipe.yaml");
    if recipe_path.exists() {
        return Err(format!("{} already exists", recipe_path.display()));
    }
    std::fs::create_dir_all(path)
        .map_err(|e| format!("cannot create {}: {}", path.display(), e))?;

    std::fs::write(&recipe_path, RECIPE_TEMPLATE)
        .map_err(|e| format!("cannot write {}: {}", recipe_path.display(), e))?;
    println!("Initialized deskpilot project at {}", path.display());
    println!("  Created: {}", recipe_path.display());

    let config_path = path.join(DEFAULT_CONFIG_FILE);
    if config_path.exists() {
        println!("  Kept:    {}", config_path.display());
    } else {
        std::fs::write(&config_path, CONFIG_TEMPLATE)
            .map_err(|e| format!("cannot write {}: {}", config_path.display(), e))?;
        println!("  Created: {}", config_path.display());
    }
    Ok(())
}

fn cmd_validate(file: &Path) -> Result<(), String> {
    let recipe = parser::parse_recipe_file(file).map_err(|e| e.to_string())?;
    match parser::validate_recipe(&recipe) {
        ValidationResult::Valid => {
            for warning in parser::lint_recipe(&recipe) {
                eprintln!("  WARN: {}", warning);
            }
            println!(
                "OK: {} ({} steps, {} variables)",
                recipe.name,
                recipe.steps.len(),
                recipe.variables.len()
            );
            Ok(())
        }
        ValidationResult::Invalid(errors) => {
            for e in &errors {
                eprintln!("  ERROR: {}", e);
            }
            Err(format!("{} validation error(s)", errors.len()))
        }
    }
}

/// `KEY=VALUE` pairs in command-line order; later keys win.
fn parse_vars(raw: &[String]) -> Result<IndexMap<String, String>, String> {
    let mut vars = IndexMap::new();
    for pair in raw {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| format!("--var '{}' is not KEY=VALUE", pair))?;
        if !parser::is_identifier(key) {
            return Err(format!("--var '{}': '{}' is not a valid name", pair, key));
        }
        vars.shift_remove(key);
        vars.insert(key.to_string(), value.to_string());
    }
    Ok(vars)
}

fn load_engine_config(
    config_path: Option<&Path>,
    log_dir: Option<&Path>,
) -> Result<EngineConfig, String> {
    let mut config = config::load_or_default(config_path).map_err(|e| e.to_string())?;
    if let Some(dir) = log_dir {
        config.log.dir = dir.to_path_buf();
    }
    Ok(config)
}

fn cmd_run(
    file: &Path,
    config_path: Option<&Path>,
    log_dir: Option<&Path>,
    vars: IndexMap<String, String>,
    dry_run: bool,
) -> Result<(), String> {
    let config = load_engine_config(config_path, log_dir)?;
    let recipe = parser::parse_recipe_file(file).map_err(|e| e.to_string())?;

    if dry_run {
        return dry_run_plan(&recipe, &vars);
    }

    let run_id = eventlog::generate_run_id();
    let sink = JsonlSink::create(&config.log.dir, &run_id).map_err(|e| e.to_string())?;
    let logger = ExecutionLogger::new(&run_id, Box::new(sink), &config.log.artifacts_dir);

    println!("Running: {} ({} steps, run {})", recipe.name, recipe.steps.len(), run_id);
    let mut engine = Engine::new(providers::standard_dispatcher(&config))
        .with_options(EngineOptions::from(&config))
        .with_bindings(vars);
    let report = engine.run(&recipe, logger).map_err(|e| e.to_string())?;

    print_run_summary(&report);
    run_outcome(&report)
}

fn dry_run_plan(recipe: &Recipe, vars: &IndexMap<String, String>) -> Result<(), String> {
    if let ValidationResult::Invalid(errors) = parser::validate_recipe(recipe) {
        for e in &errors {
            eprintln!("  ERROR: {}", e);
        }
        return Err(format!("{} validation error(s)", errors.len()));
    }

    let mut bindings = recipe.variables.clone();
    for (k, v) in vars {
        bindings.shift_remove(k);
        bindings.insert(k.clone(), v.clone());
    }

    println!("Dry run: {} ({} steps)", recipe.name, recipe.steps.len());
    for (i, step) in recipe.steps.iter().enumerate() {
        let builtins = Builtins::new("dry-run", &recipe.name, i + 1);
        let scope = Scope {
            locals: &step.variables,
            bindings: &bindings,
            builtins: &builtins,
        };
        // values produced by earlier steps only exist at run time
        let target = match resolver::resolve_target(&step.target, &scope) {
            Ok(t) => t.to_string(),
            Err(e) => format!("{} (unresolved: {})", step.target, e.message),
        };
        println!("  {:>3}. {} [{}] {}", i + 1, step.name, step.action, target);
        if let Some(ref save_as) = step.save_as {
            bindings.insert(save_as.clone(), String::new());
        }
    }
    println!();
    println!("Dry run — nothing executed.");
    Ok(())
}

fn phase_symbol(phase: StepPhase) -> &'static str {
    match phase {
        StepPhase::Success => "ok",
        StepPhase::Failure => "FAILED",
        StepPhase::Skipped => "skipped",
        _ => "?",
    }
}

fn print_step_line(r: &StepResult) {
    print!(
        "  {:>3}. {:<24} {:<8} {} attempt(s) {:>7.2}s",
        r.index + 1,
        r.name,
        phase_symbol(r.phase),
        r.attempt_count,
        r.duration_ms as f64 / 1000.0
    );
    match r.error {
        Some(ref e) => println!("  {}", e),
        None => println!(),
    }
}

fn print_run_summary(report: &RunReport) {
    for r in &report.results {
        print_step_line(r);
    }
    println!();
    println!(
        "Run {} {}: {} succeeded, {} failed, {} skipped ({:.2}s)",
        report.run_id,
        report.state,
        report.succeeded(),
        report.failed(),
        report.skipped(),
        report.duration.as_secs_f64()
    );
    if let Some(ref path) = report.log_location {
        println!("  Log:       {}", path.display());
    }
}

fn run_outcome(report: &RunReport) -> Result<(), String> {
    if report.exit_code() == 0 {
        return Ok(());
    }
    let log = report
        .log_location
        .as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "<none>".to_string());
    if !report.validation_errors.is_empty() {
        for e in &report.validation_errors {
            eprintln!("  ERROR: {}", e);
        }
        return Err(format!(
            "recipe invalid: {} validation error(s) (log: {})",
            report.validation_errors.len(),
            log
        ));
    }
    if report.cancelled {
        return Err(format!("run {} cancelled (log: {})", report.run_id, log));
    }
    match report.first_failure() {
        Some(failure) => Err(format!(
            "step {} '{}' failed: {} (log: {}, artifacts: {})",
            failure.index + 1,
            failure.name,
            failure
                .error
                .as_ref()
                .map(|e| e.to_string())
                .unwrap_or_else(|| "unknown error".to_string()),
            log,
            report.artifacts_dir.display()
        )),
        None => Err(format!("run {} ended {} (log: {})", report.run_id, report.state, log)),
    }
}

fn cmd_report(log: &Path) -> Result<(), String> {
    let events = replay::read_events(log).map_err(|e| e.to_string())?;
    let run = replay::replay(&events);
    if run.run_id.is_empty() {
        return Err(format!("{} contains no run events", log.display()));
    }

    println!("Run: {} ({})", run.run_id, run.recipe);
    let states: Vec<String> = run.states.iter().map(|s| s.to_string()).collect();
    println!("  States:   {}", states.join(" -> "));
    println!("  Attempts: {}", run.attempt_events);
    println!();
    for r in &run.results {
        print_step_line(r);
    }
    for e in &run.validation_errors {
        println!("  ERROR: {}", e);
    }
    println!();

    match (run.final_state(), run.exit_code) {
        (Some(RunState::Completed), Some(0)) => {
            println!("Completed in {:.2}s", run.duration_ms as f64 / 1000.0);
            Ok(())
        }
        _ if !run.is_complete() => Err(format!(
            "run {} has no final event (interrupted or still running)",
            run.run_id
        )),
        (state, code) => Err(format!(
            "run {} ended {} (exit {}){}",
            run.run_id,
            state.map(|s| s.to_string()).unwrap_or_else(|| "?".to_string()),
            code.unwrap_or(1),
            run.first_failure
                .as_deref()
                .map(|f| format!(", first failure: {}", f))
                .unwrap_or_default()
        )),
    }
}

fn cmd_providers() -> Result<(), String> {
    let dispatcher = providers::standard_dispatcher(&EngineConfig::default());
    println!("{:<12} {:<12} ACTIONS", "CAPABILITY", "PROVIDER");
    for cap in Capability::ALL {
        let actions: Vec<String> = cap.actions().iter().map(|a| a.to_string()).collect();
        println!(
            "{:<12} {:<12} {}",
            cap.to_string(),
            dispatcher.provider_name(cap).unwrap_or("-"),
            actions.join(", ")
        );
    }
    Ok(())
}

fn cmd_schema() -> Result<(), String> {
    let schema = schemars::schema_for!(Recipe);
    let json = serde_json::to_string_pretty(&schema).map_err(|e| format!("schema: {}", e))?;
    println!("{}", json);
    Ok(())
}
