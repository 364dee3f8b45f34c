use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use lumi_orchestrator::driver::{self, AdbChannel, CommandChannel};
use lumi_orchestrator::graph::{self, Severity};
use lumi_orchestrator::parser::yaml;
use lumi_orchestrator::recorder::{step_generator, EventRecorder, StepGenerator};
use lumi_orchestrator::runner::{self, RunRequest, SuiteStatus};
use lumi_orchestrator::utils::config::Config;

/// Config file picked up from the working directory when `--config` is absent
const DEFAULT_CONFIG: &str = "lumi.yaml";

#[derive(Parser)]
#[command(name = "lumi-orchestrator")]
#[command(version)]
#[command(about = "Dependency-aware mobile test orchestration CLI", long_about = None)]
struct Cli {
    /// Configuration file (YAML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a suite bundle, or a single test from it
    Run {
        /// Path to the suite bundle (YAML or JSON)
        bundle: PathBuf,

        /// Device serial. The first connected device is used if not provided.
        #[arg(short, long)]
        device: Option<String>,

        /// Run only this test; its dependencies must already have passed
        #[arg(short, long)]
        test: Option<String>,

        /// Keep running the suite after a failed test
        #[arg(long, default_value = "false")]
        no_stop_on_failure: bool,

        /// Companion protocol address (host:port)
        #[arg(long)]
        companion: Option<String>,

        /// Output directory for reports and artifacts
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Validate the dependency structure of a suite bundle
    Validate {
        bundle: PathBuf,
    },

    /// Print the execution order and dependency depth of each test
    Order {
        bundle: PathBuf,
    },

    /// Record touch gestures and generate a YAML test case
    Record {
        /// Output file path for the generated YAML
        #[arg(short, long)]
        output: PathBuf,

        /// Device serial (Android)
        #[arg(short, long)]
        device: Option<String>,

        /// Test name for the generated file
        #[arg(short, long)]
        name: Option<String>,

        /// Suite the recorded test belongs to
        #[arg(long, default_value = "recordings")]
        suite: String,

        /// Do not turn pauses between gestures into wait steps
        #[arg(long, default_value = "false")]
        no_waits: bool,
    },

    /// List connected devices
    Devices {
        /// Target platform
        #[arg(short, long, default_value = "android")]
        platform: String,
    },
}

fn load_config(path: Option<&Path>) -> anyhow::Result<Config> {
    let mut config = match path {
        Some(path) => Config::load(path)?,
        None if Path::new(DEFAULT_CONFIG).exists() => Config::load(Path::new(DEFAULT_CONFIG))?,
        None => Config::default(),
    };
    config.apply_env()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let mut config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Run {
            bundle,
            device,
            test,
            no_stop_on_failure,
            companion,
            output,
        } => {
            if no_stop_on_failure {
                config.stop_on_first_failure = false;
            }
            if let Some(output) = output {
                config.output_dir = output;
            }

            println!(
                "{} Running suite from: {}",
                "▶".green().bold(),
                bundle.display()
            );
            if let Some(ref test) = test {
                println!("  Test: {}", test.cyan());
            }
            if let Some(ref addr) = companion {
                println!("  Companion: {}", addr.cyan());
            }
            println!("  Output: {}", config.output_dir.display().to_string().cyan());

            let request = RunRequest {
                bundle,
                device,
                test,
                companion,
            };
            let result = runner::run_bundle(&request, &config, |stop| {
                if let Err(e) = ctrlc::set_handler(move || {
                    println!("\n{} Stopping after the current step...", "⏹️ ".yellow());
                    stop.request_stop();
                }) {
                    log::warn!("Failed to install Ctrl+C handler: {}", e);
                }
            })
            .await?;

            if result.status != SuiteStatus::Passed {
                std::process::exit(1);
            }
        }

        Commands::Validate { bundle } => {
            let bundle = yaml::load_bundle(&bundle)?;
            let result = graph::validate(&bundle.suite, &bundle.tests);

            println!(
                "{} Suite {} ({} tests)",
                "🔍".blue(),
                bundle.suite.display_name().cyan(),
                bundle.suite.tests.len()
            );
            for issue in &result.issues {
                let label = match issue.severity {
                    Severity::Error => "error".red().bold(),
                    Severity::Warning => "warning".yellow().bold(),
                };
                println!("  {}: {}", label, issue.message);
                if let Some(fix) = &issue.fix {
                    let hint = if fix.auto_applicable { " (auto)" } else { "" };
                    println!("     {} {}{}", "fix:".dimmed(), fix.description, hint.dimmed());
                }
            }
            match &result.execution_order {
                Some(order) => println!("  {} {}", "Order:".green(), order.join(" → ")),
                None => println!("  {}", "No execution order (dependency cycle)".red()),
            }

            if !result.valid {
                std::process::exit(1);
            }
            println!("{} Suite is valid", "✓".green().bold());
        }

        Commands::Order { bundle } => {
            let bundle = yaml::load_bundle(&bundle)?;
            let order = graph::generate_execution_order(&bundle.suite, &bundle.tests)?;
            let depths = graph::DependencyGraph::build(&bundle.suite, &bundle.tests).depths();
            for (position, id) in order.iter().enumerate() {
                println!(
                    "  {:>3}. {} {}",
                    position + 1,
                    id.cyan(),
                    format!("(depth {})", depths.get(id).copied().unwrap_or(0)).dimmed()
                );
            }
        }

        Commands::Record {
            output,
            device,
            name,
            suite,
            no_waits,
        } => {
            let device_id = runner::resolve_device(device.as_deref()).await?;
            println!(
                "{} Recording on {}...",
                "🔴".to_string().red().bold(),
                device_id.cyan()
            );

            let channel: Arc<dyn CommandChannel> =
                Arc::new(AdbChannel::new(Duration::from_millis(config.command_timeout_ms)));
            let recorder = EventRecorder::new(
                channel,
                &device_id,
                config.touch_thresholds(),
                config.gesture_queue_capacity,
            );
            let mut gestures = recorder.start().await?;

            let stop = Arc::new(tokio::sync::Notify::new());
            let stop_handler = stop.clone();
            ctrlc::set_handler(move || {
                println!("\n\n{} Stopping recording...", "⏹️ ".yellow());
                stop_handler.notify_one();
            })?;

            println!("\n📲 Monitoring device interactions...");
            println!("   Tap and swipe on your device.");
            println!("   Press Ctrl+C when done.\n");

            let mut generator =
                StepGenerator::new(if no_waits { None } else { config.record_min_wait_ms });
            loop {
                tokio::select! {
                    gesture = gestures.recv() => match gesture {
                        Some(gesture) => {
                            println!("   {} {:?}", "●".green(), gesture);
                            generator.push(&gesture);
                        }
                        None => break,
                    },
                    _ = stop.notified() => break,
                }
            }
            recorder.stop().await;

            let test_id = output
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("recorded")
                .to_string();
            let step_count = generator.len();
            let test = step_generator::to_test_case(
                &test_id,
                name.as_deref(),
                &suite,
                generator.finish(),
            );

            if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&output, serde_yaml::to_string(&test)?)?;
            println!(
                "{} Wrote {} steps to {}",
                "✓".green().bold(),
                step_count,
                output.display()
            );
        }

        Commands::Devices { platform } => {
            println!(
                "{} Listing {} devices...",
                "🔍".to_string().blue(),
                platform.cyan()
            );
            driver::list_devices(&platform).await?;
        }
    }

    Ok(())
}
