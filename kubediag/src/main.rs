//! Autonomous Kubernetes diagnosis loop.
//!
//! Asks a reasoning backend for one read-only `kubectl` command at a time,
//! runs it, feeds the result back, and prints the findings table the backend
//! eventually produces.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use kubediag::cancel::CancelToken;
use kubediag::core::types::{Outcome, SessionOutcome};
use kubediag::diagnose::{LoopConfig, LoopEvent, run_diagnosis};
use kubediag::exit_codes;
use kubediag::io::backend::{OpenAiBackend, OpenAiSettings};
use kubediag::io::config::{DiagnoserConfig, load_config, write_config};
use kubediag::io::executor::ProcessExecutor;
use kubediag::io::prompt::{PromptInputs, render_prompts};
use kubediag::logging;
use tracing::info;

#[derive(Parser)]
#[command(
    name = "kubediag",
    version,
    about = "Autonomous Kubernetes diagnosis loop"
)]
struct Cli {
    /// Path to the TOML config file. Missing file means defaults.
    #[arg(short, long, global = true, default_value = "kubediag.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a diagnosis session and print the findings report.
    Run {
        #[command(flatten)]
        overrides: Overrides,
        /// Print the full session outcome as JSON instead of the report.
        #[arg(long)]
        json: bool,
    },
    /// Print the rendered system and initial prompts.
    Prompt {
        #[command(flatten)]
        overrides: Overrides,
    },
    /// Write a default config file to the `--config` path.
    InitConfig {
        /// Overwrite an existing file.
        #[arg(short, long)]
        force: bool,
    },
}

/// Command-line overrides applied on top of the config file.
#[derive(Args, Debug, Default)]
struct Overrides {
    /// Kubeconfig every command must reference.
    #[arg(long)]
    kubeconfig: Option<PathBuf>,
    /// Kubeconfig context every command must reference.
    #[arg(long)]
    context: Option<String>,
    /// Backend model name.
    #[arg(long)]
    model: Option<String>,
    /// Maximum number of backend calls.
    #[arg(long)]
    max_cycles: Option<u32>,
}

impl Overrides {
    fn apply(self, cfg: &mut DiagnoserConfig) {
        if let Some(path) = self.kubeconfig {
            cfg.cluster.kubeconfig = Some(path);
        }
        if let Some(context) = self.context {
            cfg.cluster.context = Some(context);
        }
        if let Some(model) = self.model {
            cfg.backend.model = model;
        }
        if let Some(max_cycles) = self.max_cycles {
            cfg.max_cycles = max_cycles;
        }
    }
}

fn main() {
    logging::init("warn");
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Run { overrides, json } => cmd_run(&cli.config, overrides, json),
        Command::Prompt { overrides } => cmd_prompt(&cli.config, overrides),
        Command::InitConfig { force } => cmd_init_config(&cli.config, force),
    }
}

fn resolve_config(path: &Path, overrides: Overrides) -> Result<DiagnoserConfig> {
    let mut cfg = load_config(path)?;
    overrides.apply(&mut cfg);
    cfg.validate()?;
    Ok(cfg)
}

fn cmd_run(config_path: &Path, overrides: Overrides, json: bool) -> Result<i32> {
    let cfg = resolve_config(config_path, overrides)?;
    let api_key = std::env::var(&cfg.backend.api_key_env)
        .with_context(|| format!("read api key from ${}", cfg.backend.api_key_env))?;

    let prompts = render_prompts(&PromptInputs::from_config(&cfg))?;
    let backend = OpenAiBackend::new(OpenAiSettings {
        base_url: cfg.backend.base_url.clone(),
        model: cfg.backend.model.clone(),
        temperature: cfg.backend.temperature,
        api_key,
        request_timeout: cfg.request_timeout(),
    })?;
    let executor = ProcessExecutor::new(cfg.command_output_limit_bytes);

    let cancel = CancelToken::new();
    let handler_token = cancel.clone();
    ctrlc::set_handler(move || handler_token.cancel()).context("install interrupt handler")?;

    eprintln!("--- Starting Kubernetes diagnosis ---");
    info!(model = %cfg.backend.model, "session configured");
    let outcome = run_diagnosis(
        &backend,
        &executor,
        &prompts,
        &LoopConfig::from_config(&cfg),
        &cancel,
        print_event,
    );

    if json {
        let payload = serde_json::to_string_pretty(&outcome).context("serialize outcome")?;
        println!("{payload}");
    } else {
        print_summary(&outcome);
    }
    Ok(exit_codes::for_outcome(&outcome.outcome))
}

fn print_event(event: &LoopEvent<'_>) {
    match event {
        LoopEvent::Executed { cycle, command } => {
            let status = if command.succeeded { "ok" } else { "failed" };
            eprintln!("[{cycle}] {} ({status})", command.text);
        }
        LoopEvent::Duplicate { cycle, command } => {
            eprintln!("[{cycle}] {command} (already executed, skipped)");
        }
        LoopEvent::BackendFailed {
            cycle,
            consecutive,
            error,
        } => {
            eprintln!("[{cycle}] backend error #{consecutive}: {error}");
        }
        LoopEvent::Reported { cycle } => {
            eprintln!("[{cycle}] findings report received");
        }
    }
}

fn print_summary(outcome: &SessionOutcome) {
    if let Some(report) = &outcome.report {
        println!("{report}");
    }

    eprintln!("\n--- Executed Commands ---");
    for command in &outcome.issued_commands {
        let status = if command.succeeded {
            "Success"
        } else {
            "Failed"
        };
        eprintln!("{}: {status}", command.text);
    }

    match &outcome.outcome {
        Outcome::Done => eprintln!("\n--- Diagnosis completed in {} cycles ---", outcome.cycles),
        Outcome::Aborted(reason) => {
            eprintln!("\n--- Diagnosis {reason} after {} cycles ---", outcome.cycles);
        }
    }
}

fn cmd_prompt(config_path: &Path, overrides: Overrides) -> Result<i32> {
    let cfg = resolve_config(config_path, overrides)?;
    let prompts = render_prompts(&PromptInputs::from_config(&cfg))?;
    println!("{}\n\n{}", prompts.system, prompts.initial);
    Ok(exit_codes::OK)
}

fn cmd_init_config(config_path: &Path, force: bool) -> Result<i32> {
    if config_path.exists() && !force {
        bail!(
            "{} already exists (use --force to overwrite)",
            config_path.display()
        );
    }
    write_config(config_path, &DiagnoserConfig::default())?;
    eprintln!("wrote {}", config_path.display());
    Ok(exit_codes::OK)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_run_defaults() {
        let cli = Cli::parse_from(["kubediag", "run"]);
        assert_eq!(cli.config, PathBuf::from("kubediag.toml"));
        assert!(matches!(cli.command, Command::Run { json: false, .. }));
    }

    #[test]
    fn parse_run_with_overrides() {
        let cli = Cli::parse_from([
            "kubediag",
            "run",
            "--kubeconfig",
            "/tmp/kc",
            "--context",
            "prod",
            "--max-cycles",
            "5",
            "--json",
            "--config",
            "custom.toml",
        ]);
        assert_eq!(cli.config, PathBuf::from("custom.toml"));
        let Command::Run { overrides, json } = cli.command else {
            panic!("expected run");
        };
        assert!(json);
        assert_eq!(overrides.kubeconfig, Some(PathBuf::from("/tmp/kc")));
        assert_eq!(overrides.context.as_deref(), Some("prod"));
        assert_eq!(overrides.max_cycles, Some(5));
    }

    #[test]
    fn parse_init_config_force() {
        let cli = Cli::parse_from(["kubediag", "init-config", "--force"]);
        assert!(matches!(cli.command, Command::InitConfig { force: true }));
    }

    #[test]
    fn overrides_replace_config_values() {
        let mut cfg = DiagnoserConfig::default();
        Overrides {
            kubeconfig: Some(PathBuf::from("/etc/kc")),
            context: None,
            model: Some("gpt-4o".to_string()),
            max_cycles: Some(7),
        }
        .apply(&mut cfg);
        assert_eq!(cfg.cluster.kubeconfig, Some(PathBuf::from("/etc/kc")));
        assert_eq!(cfg.cluster.context, None);
        assert_eq!(cfg.backend.model, "gpt-4o");
        assert_eq!(cfg.max_cycles, 7);
    }

    #[test]
    fn resolve_rejects_zero_cycles_override() {
        let temp = tempfile::tempdir().expect("tempdir");
        let err = resolve_config(
            &temp.path().join("missing.toml"),
            Overrides {
                max_cycles: Some(0),
                ..Overrides::default()
            },
        )
        .unwrap_err();
        assert!(err.to_string().contains("max_cycles"));
    }
}
