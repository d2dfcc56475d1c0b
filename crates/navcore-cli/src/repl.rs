//! REPL – Read-Eval-Print Loop for the navcore operator shell.
//!
//! Supported slash-commands:
//!   /goto x y [yaw]                 – drive to one pose
//!   /waypoints x,y[,yaw] ... [--loop] [--laps N] – visit poses in order
//!   /patrol [x,y[,yaw] ...] [--laps N] – patrol the given (or default) route
//!   /home                           – return to the home pose
//!   /sethome [x y [yaw]]            – set home (no args: current pose)
//!   /pause                          – hold the mission before its next goal
//!   /resume                         – release a held mission
//!   /cancel                         – stop the active mission
//!   /status                         – show mode, goal and telemetry
//!   /reset                          – clear state back to idle
//!   /map start|save NAME|load NAME|finish
//!   /json {intent}                  – start a mission from a JSON intent
//!   /schema                         – print the JSON schema of an intent
//!   /summary                        – mission report
//!   /export PATH                    – write goal history as JSON
//!   /journal [N]                    – recent journaled outcomes
//!   /help                           – show this list
//!   /quit | /exit                   – cancel any mission and exit

use colored::Colorize;
use std::io::{self, BufRead, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use navcore_memory::GoalJournal;
use navcore_runtime::Navigator;
use navcore_types::{MissionIntent, NavError, Pose};
use tokio::runtime::Handle;

/// One parsed operator command.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Start(MissionIntent),
    SetHome(Option<Pose>),
    Pause,
    Resume,
    Cancel,
    Status,
    Reset,
    Map(MapCommand),
    Schema,
    Summary,
    Export(String),
    Journal(usize),
    Help,
    Quit,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MapCommand {
    Start,
    Save(String),
    Load(String),
    Finish,
}

const DEFAULT_JOURNAL_ROWS: usize = 10;

/// Parse one input line. Errors are user-facing messages.
pub fn parse_command(line: &str) -> Result<Command, String> {
    let line = line.trim();
    let (head, rest) = match line.split_once(char::is_whitespace) {
        Some((h, r)) => (h, r.trim()),
        None => (line, ""),
    };
    let args: Vec<&str> = rest.split_whitespace().collect();

    match head {
        "/goto" => {
            let pose = parse_pose_args(&args)?;
            Ok(Command::Start(MissionIntent::single_goal(pose).map_err(|e| e.to_string())?))
        }
        "/waypoints" => {
            let route = parse_route(&args)?;
            let intent = MissionIntent::waypoints(route.poses, route.looping)
                .map_err(|e| e.to_string())?;
            with_laps(intent, route.laps).map(Command::Start)
        }
        "/patrol" => {
            let route = parse_route(&args)?;
            if route.looping {
                return Err("/patrol always loops; use --laps N to bound it".into());
            }
            let intent = if route.poses.is_empty() {
                MissionIntent::default_patrol()
            } else {
                MissionIntent::patrol(route.poses).map_err(|e| e.to_string())?
            };
            with_laps(intent, route.laps).map(Command::Start)
        }
        "/home" => Ok(Command::Start(MissionIntent::ReturnHome)),
        "/sethome" if args.is_empty() => Ok(Command::SetHome(None)),
        "/sethome" => Ok(Command::SetHome(Some(parse_pose_args(&args)?))),
        "/pause" => Ok(Command::Pause),
        "/resume" => Ok(Command::Resume),
        "/cancel" => Ok(Command::Cancel),
        "/status" => Ok(Command::Status),
        "/reset" => Ok(Command::Reset),
        "/map" => parse_map(&args).map(Command::Map),
        "/json" => {
            if rest.is_empty() {
                return Err("usage: /json {\"kind\": \"SingleGoal\", \"payload\": {...}}".into());
            }
            let intent: MissionIntent =
                serde_json::from_str(rest).map_err(|e| format!("invalid intent JSON: {e}"))?;
            intent.validate().map_err(|e| e.to_string())?;
            Ok(Command::Start(intent))
        }
        "/schema" => Ok(Command::Schema),
        "/summary" => Ok(Command::Summary),
        "/export" => match args.as_slice() {
            [path] => Ok(Command::Export((*path).to_string())),
            _ => Err("usage: /export PATH".into()),
        },
        "/journal" => match args.as_slice() {
            [] => Ok(Command::Journal(DEFAULT_JOURNAL_ROWS)),
            [n] => n
                .parse()
                .map(Command::Journal)
                .map_err(|_| format!("'{n}' is not a row count")),
            _ => Err("usage: /journal [N]".into()),
        },
        "/help" => Ok(Command::Help),
        "/quit" | "/exit" => Ok(Command::Quit),
        other => Err(format!("unknown command '{other}'")),
    }
}

fn parse_map(args: &[&str]) -> Result<MapCommand, String> {
    match args {
        ["start"] => Ok(MapCommand::Start),
        ["finish"] => Ok(MapCommand::Finish),
        ["save", name] => Ok(MapCommand::Save((*name).to_string())),
        ["load", name] => Ok(MapCommand::Load((*name).to_string())),
        _ => Err("usage: /map start | save NAME | load NAME | finish".into()),
    }
}

/// Pose tokens plus the `--loop` / `--laps N` flags.
struct RouteArgs {
    poses: Vec<Pose>,
    looping: bool,
    laps: Option<u32>,
}

fn parse_route(args: &[&str]) -> Result<RouteArgs, String> {
    let mut route = RouteArgs {
        poses: Vec::new(),
        looping: false,
        laps: None,
    };
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match *arg {
            "--loop" => route.looping = true,
            "--laps" => {
                let n = iter.next().ok_or("--laps needs a count")?;
                let laps = n.parse().map_err(|_| format!("'{n}' is not a lap count"))?;
                route.laps = Some(laps);
            }
            token => route.poses.push(parse_pose_token(token)?),
        }
    }
    Ok(route)
}

fn with_laps(intent: MissionIntent, laps: Option<u32>) -> Result<MissionIntent, String> {
    match laps {
        Some(n) => intent.with_laps(n).map_err(|e| e.to_string()),
        None => Ok(intent),
    }
}

/// `x y [yaw]` as separate arguments.
fn parse_pose_args(args: &[&str]) -> Result<Pose, String> {
    match args {
        [x, y] => Ok(Pose::new(parse_f64(x)?, parse_f64(y)?, 0.0)),
        [x, y, yaw] => Ok(Pose::new(parse_f64(x)?, parse_f64(y)?, parse_f64(yaw)?)),
        _ => Err("expected: x y [yaw]".into()),
    }
}

/// `x,y` or `x,y,yaw` as one token.
fn parse_pose_token(token: &str) -> Result<Pose, String> {
    let parts: Vec<&str> = token.split(',').collect();
    parse_pose_args(&parts).map_err(|_| format!("'{token}' is not a pose (expected x,y[,yaw])"))
}

fn parse_f64(s: &str) -> Result<f64, String> {
    let v: f64 = s.trim().parse().map_err(|_| format!("'{s}' is not a number"))?;
    if v.is_finite() {
        Ok(v)
    } else {
        Err(format!("'{s}' is not finite"))
    }
}

/// Entry point for the interactive REPL.
///
/// Mission tasks keep running on `runtime` workers while this loop blocks
/// on stdin. `shutdown` is polled each iteration; when set the REPL exits.
pub fn run(
    runtime: Handle,
    navigator: Arc<Navigator>,
    journal: Option<Arc<GoalJournal>>,
    shutdown: Arc<AtomicBool>,
) {
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }

        print!("{} ", "navcore>".bold().cyan());
        stdout.flush().ok();

        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) => break, // EOF
            Ok(_) => {}
            Err(e) => {
                eprintln!("{}: {}", "Read error".red(), e);
                break;
            }
        }

        if line.trim().is_empty() {
            continue;
        }

        let command = match parse_command(&line) {
            Ok(c) => c,
            Err(msg) => {
                println!("{} {}. Type {} for available commands.", "✗".red(), msg, "/help".bold());
                continue;
            }
        };

        match command {
            Command::Start(intent) => cmd_start(&runtime, &navigator, intent),
            Command::SetHome(pose) => cmd_sethome(&navigator, pose),
            Command::Pause => report(
                navigator.pause_mission(),
                "mission will hold before its next goal",
            ),
            Command::Resume => report(navigator.resume_mission(), "mission resumed"),
            Command::Cancel => report(runtime.block_on(navigator.cancel_mission()), "mission cancelled"),
            Command::Status => cmd_status(&navigator),
            Command::Reset => report(navigator.reset(), "state reset to idle"),
            Command::Map(map) => cmd_map(&runtime, &navigator, map),
            Command::Schema => cmd_schema(),
            Command::Summary => println!("{}", navigator.summary()),
            Command::Export(path) => {
                report(navigator.export_history(&path), &format!("history written to {path}"))
            }
            Command::Journal(limit) => cmd_journal(journal.as_deref(), limit),
            Command::Help => cmd_help(),
            Command::Quit => {
                if let Err(e) = runtime.block_on(navigator.cancel_mission()) {
                    println!("{}: {}", "Cancel failed".red(), e);
                }
                println!("{}", "Goodbye.".green());
                shutdown.store(true, Ordering::SeqCst);
                break;
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Command handlers
// ─────────────────────────────────────────────────────────────────────────────

fn report(result: Result<(), NavError>, ok: &str) {
    match result {
        Ok(()) => println!("  {} {}", "✓".green().bold(), ok),
        Err(e) => println!("  {} {}", "✗".red().bold(), e),
    }
}

fn cmd_start(runtime: &Handle, navigator: &Navigator, intent: MissionIntent) {
    let kind = intent.kind();
    match runtime.block_on(navigator.start_mission(intent)) {
        Ok(id) => println!(
            "  {} {} mission started ({})",
            "✓".green().bold(),
            kind.bold(),
            id.to_string().dimmed()
        ),
        Err(e) => println!("  {} {}", "✗".red().bold(), e),
    }
}

fn cmd_sethome(navigator: &Navigator, pose: Option<Pose>) {
    let pose = match pose.or(navigator.telemetry().robot_pose) {
        Some(p) => p,
        None => {
            println!("  {} robot pose unknown; use /sethome x y [yaw]", "✗".red().bold());
            return;
        }
    };
    report(navigator.set_home(pose), &format!("home set to {pose}"));
}

fn cmd_status(navigator: &Navigator) {
    let state = navigator.status();
    let telemetry = navigator.telemetry();
    println!();
    println!("  {:<12} {}", "Mode:".bold(), state.mode.to_string().yellow());
    if state.operator_hold {
        println!("  {:<12} {}", "Hold:".bold(), "requested by operator".yellow());
    }
    match &state.current_goal {
        Some(goal) => println!("  {:<12} {}", "Goal:".bold(), goal.target),
        None => println!("  {:<12} {}", "Goal:".bold(), "none".dimmed()),
    }
    println!("  {:<12} {}", "Queued:".bold(), state.goal_queue.len());
    println!("  {:<12} {}", "Failures:".bold(), state.consecutive_failures);
    if let Some(map) = &state.active_map {
        println!("  {:<12} {}", "Map:".bold(), map);
    }
    println!("  {:<12} {:.1}%", "Battery:".bold(), telemetry.battery_percent);
    println!("  {:<12} {:.2} m", "Obstacle:".bold(), telemetry.min_obstacle_range_m);
    match telemetry.robot_pose {
        Some(p) => println!("  {:<12} {}", "Pose:".bold(), p),
        None => println!("  {:<12} {}", "Pose:".bold(), "unknown".dimmed()),
    }
    println!("  {:<12} {}", "Home:".bold(), navigator.home());
    println!();
}

fn cmd_map(runtime: &Handle, navigator: &Navigator, map: MapCommand) {
    match map {
        MapCommand::Start => report(runtime.block_on(navigator.start_mapping()), "mapping started"),
        MapCommand::Save(name) => report(
            runtime.block_on(navigator.save_map(&name)),
            &format!("map '{name}' saved"),
        ),
        MapCommand::Load(name) => report(
            runtime.block_on(navigator.load_map(&name)),
            &format!("map '{name}' loaded"),
        ),
        MapCommand::Finish => {
            if navigator.finish_mapping() {
                println!("  {} mapping finished", "✓".green().bold());
            } else {
                println!("  {} not mapping", "•".yellow());
            }
        }
    }
}

fn cmd_schema() {
    let schema = schemars::schema_for!(MissionIntent);
    match serde_json::to_string_pretty(&schema) {
        Ok(s) => println!("{s}"),
        Err(e) => println!("{}: {}", "Schema error".red(), e),
    }
}

fn cmd_journal(journal: Option<&GoalJournal>, limit: usize) {
    let Some(journal) = journal else {
        println!("  {} goal journal is not open", "•".yellow());
        return;
    };
    let (records, tally) = match journal.recent(limit).and_then(|r| Ok((r, journal.tally()?))) {
        Ok(v) => v,
        Err(e) => {
            println!("{}: {}", "Journal error".red(), e);
            return;
        }
    };
    println!();
    for record in &records {
        let outcome = match record.outcome.reason() {
            Some(reason) => format!("{} ({reason})", record.outcome.label()),
            None => record.outcome.label().to_string(),
        };
        println!(
            "  {}  {}  {}",
            record.recorded_at.format("%Y-%m-%d %H:%M:%S").to_string().dimmed(),
            record.goal.target,
            outcome
        );
    }
    println!(
        "  {} total: {} succeeded, {} failed, {} cancelled, {} timed out",
        tally.total().to_string().bold(),
        tally.succeeded,
        tally.failed,
        tally.cancelled,
        tally.timed_out
    );
    println!();
}

fn cmd_help() {
    println!();
    println!("{}", "navcore Commands".bold().underline());
    println!("  {}           – drive to one pose", "/goto x y [yaw]".bold().cyan());
    println!(
        "  {} – visit poses in order",
        "/waypoints x,y[,yaw] ... [--loop] [--laps N]".bold().cyan()
    );
    println!(
        "  {} – patrol a route (default: square)",
        "/patrol [x,y[,yaw] ...] [--laps N]".bold().cyan()
    );
    println!("  {}                     – return to the home pose", "/home".bold().cyan());
    println!("  {}      – set home (no args: current pose)", "/sethome [x y [yaw]]".bold().cyan());
    println!("  {}                    – hold before the next goal", "/pause".bold().cyan());
    println!("  {}                   – release a held mission", "/resume".bold().cyan());
    println!("  {}                   – stop the active mission", "/cancel".bold().cyan());
    println!("  {}                   – mode, goal and telemetry", "/status".bold().cyan());
    println!("  {}                    – clear state back to idle", "/reset".bold().cyan());
    println!("  {} – SLAM control", "/map start|save NAME|load NAME|finish".bold().cyan());
    println!("  {}            – start a mission from JSON", "/json {intent}".bold().cyan());
    println!("  {}                   – JSON schema of an intent", "/schema".bold().cyan());
    println!("  {}                  – mission report", "/summary".bold().cyan());
    println!("  {}             – write goal history as JSON", "/export PATH".bold().cyan());
    println!("  {}             – recent journaled outcomes", "/journal [N]".bold().cyan());
    println!("  {}              – exit the CLI", "/quit  /exit".bold().cyan());
    println!();
}
