use super::prerequisites::{CleanupOutcome, PrerequisiteOutcome};
use super::state::{SuiteCounts, SuiteStatus, TestPhase, TestStatus};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::time::Duration as StdDuration;
use tokio::sync::broadcast;

/// Execution events for real-time updates
#[derive(Debug, Clone)]
pub enum TestEvent {
    // Suite events
    SuiteStarted {
        run_id: String,
        suite_id: String,
        execution_order: Vec<String>,
    },
    SuiteFinished {
        suite_id: String,
        status: SuiteStatus,
        counts: SuiteCounts,
        duration_ms: u64,
    },

    // Test events
    TestStarted {
        test_id: String,
        test_name: String,
        step_count: usize,
    },
    TestFinished {
        test_id: String,
        status: TestStatus,
        duration_ms: u64,
        error: Option<String>,
    },
    PhaseChanged {
        test_id: String,
        phase: TestPhase,
    },
    PrerequisiteChecked {
        test_id: String,
        outcome: PrerequisiteOutcome,
    },
    CleanupFinished {
        test_id: String,
        outcomes: Vec<CleanupOutcome>,
    },

    // Step events
    StepStarted {
        test_id: String,
        index: usize,
        action: String,
    },
    StepPassed {
        test_id: String,
        index: usize,
        duration_ms: u64,
        inverted: bool,
    },
    StepFailed {
        test_id: String,
        index: usize,
        error: String,
        duration_ms: u64,
        continued: bool,
    },
    StepSkipped {
        test_id: String,
        index: usize,
        reason: String,
    },

    // Log event for coordinated output
    Log {
        message: String,
    },
}

/// Event emitter for broadcasting execution events
pub struct EventEmitter {
    sender: broadcast::Sender<TestEvent>,
}

impl EventEmitter {
    pub fn new() -> (Self, broadcast::Receiver<TestEvent>) {
        let (sender, receiver) = broadcast::channel(256);
        (Self { sender }, receiver)
    }

    pub fn emit(&self, event: TestEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TestEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        let (sender, _) = broadcast::channel(256);
        Self { sender }
    }
}

/// Console event listener for printing real-time updates
pub struct ConsoleEventListener;

impl ConsoleEventListener {
    pub async fn listen(mut receiver: broadcast::Receiver<TestEvent>) {
        use colored::Colorize;
        use std::io::IsTerminal;

        let tty = std::io::stdout().is_terminal();
        let mut spinner: Option<ProgressBar> = None;
        let mut step_text = String::new();

        loop {
            let event = match receiver.recv().await {
                Ok(event) => event,
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    log::debug!("Console listener skipped {} events", missed);
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            };

            match event {
                TestEvent::SuiteStarted {
                    run_id,
                    suite_id,
                    execution_order,
                } => {
                    println!(
                        "\n{} Suite {} started ({})",
                        "▶".green().bold(),
                        suite_id.white().bold(),
                        run_id.cyan()
                    );
                    println!("  Order: {}", execution_order.join(" → ").dimmed());
                }

                TestEvent::SuiteFinished {
                    suite_id,
                    status,
                    counts,
                    duration_ms,
                } => {
                    if let Some(pb) = spinner.take() {
                        pb.finish_and_clear();
                    }
                    let status_str = match status {
                        SuiteStatus::Passed => "PASSED".green().bold(),
                        SuiteStatus::Failed => "FAILED".red().bold(),
                        SuiteStatus::Error => "ERROR".red().bold(),
                        SuiteStatus::Stopped => "STOPPED".yellow().bold(),
                    };
                    println!("\n{} Suite {} [{}]", "■".blue().bold(), suite_id, status_str);
                    println!("  Total tests: {}", counts.total);
                    println!(
                        "  {} passed, {} failed, {} errors, {} skipped",
                        counts.passed.to_string().green(),
                        counts.failed.to_string().red(),
                        counts.error.to_string().red(),
                        counts.skipped.to_string().yellow()
                    );
                    println!("  Duration: {}ms", duration_ms);
                }

                TestEvent::TestStarted {
                    test_name,
                    step_count,
                    ..
                } => {
                    println!(
                        "\n  {} Test: {} ({} steps)",
                        "→".blue(),
                        test_name.white().bold(),
                        step_count
                    );
                }

                TestEvent::TestFinished {
                    test_id,
                    status,
                    duration_ms,
                    error,
                } => {
                    if let Some(pb) = spinner.take() {
                        pb.finish_and_clear();
                    }
                    let status_str = match status {
                        TestStatus::Passed => "PASSED".green().bold(),
                        TestStatus::Failed => "FAILED".red().bold(),
                        TestStatus::Error => "ERROR".red().bold(),
                    };
                    println!(
                        "  {} Test {} [{}] {}ms",
                        "←".blue(),
                        test_id,
                        status_str,
                        duration_ms
                    );
                    if let Some(error) = error {
                        println!("      {}", error.red());
                    }
                }

                TestEvent::PhaseChanged { test_id, phase } => {
                    log::debug!("[{}] phase {:?}", test_id, phase);
                }

                TestEvent::PrerequisiteChecked { outcome, .. } => {
                    let mark = if outcome.skipped {
                        "○".yellow()
                    } else if outcome.success {
                        "✓".green()
                    } else {
                        "✗".red()
                    };
                    let note = match (&outcome.message, outcome.from_cache) {
                        (Some(m), _) => format!(" ({})", m),
                        (None, true) => " (cached)".to_string(),
                        (None, false) => String::new(),
                    };
                    println!(
                        "      {} prerequisite {} [{}]{}",
                        mark,
                        outcome.id,
                        outcome.kind.dimmed(),
                        note.dimmed()
                    );
                }

                TestEvent::CleanupFinished { outcomes, .. } => {
                    for outcome in outcomes.iter().filter(|o| !o.skipped) {
                        let mark = if outcome.success { "✓".green() } else { "✗".red() };
                        println!("      {} cleanup {}", mark, outcome.description.dimmed());
                    }
                }

                TestEvent::StepStarted { index, action, .. } => {
                    if let Some(pb) = spinner.take() {
                        pb.finish_and_clear();
                    }
                    let pb = if tty {
                        ProgressBar::new_spinner()
                    } else {
                        ProgressBar::with_draw_target(None, ProgressDrawTarget::hidden())
                    };
                    if let Ok(style) = ProgressStyle::default_spinner()
                        .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏ ")
                        .template("      {spinner} {msg}")
                    {
                        pb.set_style(style);
                    }
                    step_text = format!("[{}] {}... ", index, action.dimmed());
                    pb.set_message(step_text.clone());
                    pb.enable_steady_tick(StdDuration::from_millis(100));
                    spinner = Some(pb);
                }

                TestEvent::StepPassed {
                    duration_ms,
                    inverted,
                    ..
                } => {
                    if let Some(pb) = spinner.take() {
                        pb.finish_and_clear();
                    }
                    let note = if inverted { " expected failure" } else { "" };
                    println!(
                        "      {} {}({}ms){}",
                        "✓".green(),
                        step_text,
                        duration_ms,
                        note.dimmed()
                    );
                }

                TestEvent::StepFailed {
                    error,
                    duration_ms,
                    continued,
                    ..
                } => {
                    if let Some(pb) = spinner.take() {
                        pb.finish_and_clear();
                    }
                    println!("      {} {}({}ms)", "✗".red(), step_text, duration_ms);
                    println!("          {}", error.red());
                    if continued {
                        println!("          {}", "continuing (continueOnFailure)".yellow());
                    }
                }

                TestEvent::StepSkipped { index, reason, .. } => {
                    println!("      {} [{}] {}", "○".yellow(), index, reason.dimmed());
                }

                TestEvent::Log { message } => match &spinner {
                    Some(pb) => pb.println(format!("        {}", message)),
                    None => println!("        {}", message),
                },
            }
        }
    }
}
