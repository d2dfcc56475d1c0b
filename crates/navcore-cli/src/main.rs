//! `navcore` – operator shell for the navigation orchestration core.
//!
//! 1. Checks for `~/.navcore/config.toml`; runs a **First-Run Wizard** when
//!    the file is absent.
//! 2. Connects the configured backend (the in-process simulator or Nav2
//!    through rosbridge) and opens the SQLite goal journal.
//! 3. Drops the user into an **interactive REPL** with slash-commands
//!    (`/goto`, `/waypoints`, `/patrol`, `/status`, `/help`, …).
//! 4. Intercepts **Ctrl-C** to cancel the active mission and exit safely.

mod config;
mod repl;

use colored::Colorize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::warn;

use navcore_memory::GoalJournal;
use navcore_middleware::{
    NavigationStack, RosbridgeNavStack, SimNavStack, SimResponse, SimTelemetry, TelemetrySource,
};
use navcore_runtime::{GoalRecorder, Navigator, init_tracing};

use crate::config::{Backend, Config};

/// Simulated drive time per goal.
const SIM_GOAL_DURATION: Duration = Duration::from_secs(2);

fn main() {
    // RUST_LOG selects the level; NAVCORE_LOG_FORMAT=json switches to JSON
    // lines. User-facing output still uses println!.
    let _tracing = init_tracing("navcore-cli");

    print_banner();

    // ── First-Run Wizard ──────────────────────────────────────────────────
    let cfg = match config::load() {
        Ok(Some(cfg)) => {
            println!(
                "  Config loaded from {}",
                config::config_path().display().to_string().bold()
            );
            cfg
        }
        Ok(None) => run_first_run_wizard(),
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            println!("  Using default configuration.");
            let mut cfg = Config::default();
            config::apply_env_overrides(&mut cfg);
            cfg
        }
    };

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("{}: {}", "Failed to start async runtime".red(), e);
            std::process::exit(1);
        }
    };

    // ── Backend ───────────────────────────────────────────────────────────
    let (stack, telemetry) = runtime.block_on(connect_backend(&cfg));

    // ── Goal journal ──────────────────────────────────────────────────────
    let journal_path = cfg.journal_path();
    if let Some(parent) = journal_path.parent()
        && let Err(e) = std::fs::create_dir_all(parent)
    {
        warn!(error = %e, path = %parent.display(), "could not create journal directory");
    }
    let journal = match GoalJournal::open(&journal_path) {
        Ok(j) => {
            println!("  Goal journal at {}", journal_path.display().to_string().bold());
            Some(Arc::new(j))
        }
        Err(e) => {
            println!("  {} goal journal unavailable: {}", "•".yellow(), e);
            None
        }
    };

    let nav_config = cfg.navigation.to_navigator_config();
    let navigator = Arc::new(runtime.block_on(async {
        match &journal {
            Some(j) => {
                let recorder: Arc<dyn GoalRecorder> = Arc::clone(j) as Arc<dyn GoalRecorder>;
                Navigator::with_recorder(nav_config, stack, telemetry, recorder).await
            }
            None => Navigator::new(nav_config, stack, telemetry).await,
        }
    }));

    // ── Ctrl-C handler ────────────────────────────────────────────────────
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = Arc::clone(&shutdown);
    let nav_ctrlc = Arc::clone(&navigator);
    let handle = runtime.handle().clone();

    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – initiating graceful shutdown …".yellow().bold());
        match handle.block_on(nav_ctrlc.cancel_mission()) {
            Ok(()) => println!("{}", "  ✓ Active mission cancelled.".green()),
            Err(e) => println!("  {} cancel failed: {}", "✗".red(), e),
        }
        println!("{}", "  ✓ Exiting navcore.".green());
        shutdown_clone.store(true, Ordering::SeqCst);
        std::process::exit(0);
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; graceful shutdown on Ctrl-C will not be available");
    }

    println!();
    println!("  Type {} for a list of commands.\n", "/help".bold().cyan());

    // ── Interactive REPL ──────────────────────────────────────────────────
    repl::run(runtime.handle().clone(), navigator, journal, shutdown);
}

/// Build the configured backend. A failed rosbridge connection falls back
/// to the simulator so the shell stays usable.
async fn connect_backend(cfg: &Config) -> (Arc<dyn NavigationStack>, Arc<dyn TelemetrySource>) {
    if cfg.backend == Backend::Rosbridge {
        print!("\n  Connecting to rosbridge at {} … ", cfg.rosbridge_url.dimmed());
        match RosbridgeNavStack::connect(&cfg.rosbridge_url).await {
            Ok(stack) => {
                println!("{}", "online".green());
                let stack = Arc::new(stack);
                let nav: Arc<dyn NavigationStack> = stack.clone();
                let telemetry: Arc<dyn TelemetrySource> = stack;
                return (nav, telemetry);
            }
            Err(e) => {
                println!("{}", "offline".yellow());
                warn!(error = %e, "rosbridge unavailable; using simulator");
                println!("  {}", "Falling back to the simulated stack.".dimmed());
            }
        }
    } else {
        println!("\n  Backend: {}", "simulator".bold());
    }
    let stack = SimNavStack::new().with_default_response(SimResponse::succeed_after(SIM_GOAL_DURATION));
    (Arc::new(stack), Arc::new(SimTelemetry::new()))
}

// ─────────────────────────────────────────────────────────────────────────────
// First-Run Wizard
// ─────────────────────────────────────────────────────────────────────────────

fn run_first_run_wizard() -> Config {
    println!();
    println!("{}", "  ╔══════════════════════════════════════╗".bold().cyan());
    println!("{}", "  ║       navcore First-Run Wizard       ║".bold().cyan());
    println!("{}", "  ╚══════════════════════════════════════╝".bold().cyan());
    println!();
    println!("  No configuration found.  Let's set up navcore.\n");

    let mut cfg = Config::default();

    println!("  Which navigation backend would you like to use?");
    println!("    1) Simulator  (default, no robot required)");
    println!("    2) Nav2 via rosbridge");
    let choice = prompt_line("  Enter choice [1]: ", "1");
    if choice.trim() == "2" {
        cfg.backend = Backend::Rosbridge;
        cfg.rosbridge_url = prompt_line(
            &format!("  rosbridge URL [{}]: ", cfg.rosbridge_url),
            &cfg.rosbridge_url,
        );
    }

    let retries = prompt_line(
        &format!("  Attempts per goal [{}]: ", cfg.navigation.retry_limit),
        &cfg.navigation.retry_limit.to_string(),
    );
    if let Ok(n) = retries.trim().parse::<u32>() {
        cfg.navigation.retry_limit = n;
    }

    match config::save(&cfg) {
        Ok(()) => println!(
            "\n  {} Config saved to {}\n",
            "✓".green().bold(),
            config::config_path().display().to_string().bold()
        ),
        Err(e) => println!("{}: {}", "Error saving config".red(), e),
    }

    config::apply_env_overrides(&mut cfg);
    cfg
}

// ─────────────────────────────────────────────────────────────────────────────
// Banner
// ─────────────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("{}", r#"   _  __           ______              "#.bold().cyan());
    println!("{}", r#"  / |/ /__ __  __ / ____/___  ________ "#.bold().cyan());
    println!("{}", r#" /    / _ `/ |/ // /   / __ \/ __/ -_)"#.bold().cyan());
    println!("{}", r#"/_/|_/\_,_/|___/ \____/\____/_/  \__/ "#.bold().cyan());
    println!();
    println!(
        "  {} {}",
        "navcore".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Navigation Orchestration Core");
    println!();
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn prompt_line(msg: &str, default: &str) -> String {
    use std::io::{BufRead, Write};
    print!("{}", msg);
    std::io::stdout().flush().ok();
    let mut line = String::new();
    match std::io::stdin().lock().read_line(&mut line) {
        Ok(_) => {
            let t = line.trim().to_string();
            if t.is_empty() { default.to_string() } else { t }
        }
        Err(_) => default.to_string(),
    }
}
