//! Olimpiada command-line administration tool.
//!
//! Provides subcommands for inspecting the current cycle, initializing and
//! importing cycles, scheduling phases, editing the permission matrices,
//! driving sub-phases, probing the access gate, viewing the audit log, and
//! generating / validating configuration files.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use olimpiada_core::config::AppConfig;
use olimpiada_core::db::Database;
use olimpiada_core::gate::GateDecision;
use olimpiada_core::models::{
    GlobalPhase, NewSubPhase, PhasePermission, RolePermission, ScheduleInput, SubPhaseStatus,
};
use olimpiada_core::{Clock, FixedClock, Orchestrator, SystemClock};

const ACTOR: &str = "cli";

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// Olimpiada command-line administration tool.
#[derive(Parser, Debug)]
#[command(
    name = "olimpiada",
    version,
    about = "Manage and inspect an olympiad competition cycle"
)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(
        short,
        long,
        global = true,
        default_value = "/etc/olimpiada/config.toml"
    )]
    config: PathBuf,

    /// Evaluate as if today were this date (YYYY-MM-DD).
    #[arg(long, global = true, value_parser = parse_day)]
    today: Option<NaiveDate>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show the current cycle, session state and phase calendar.
    Status,

    /// Create or import cycles.
    Cycle {
        #[command(subcommand)]
        action: CycleAction,
    },

    /// Inspect and schedule global phases.
    Phases {
        #[command(subcommand)]
        action: PhasesAction,
    },

    /// Inspect and edit the permission matrices.
    Permissions {
        #[command(subcommand)]
        action: PermissionsAction,
    },

    /// Manage areas and levels.
    Catalog {
        #[command(subcommand)]
        action: CatalogAction,
    },

    /// Manage sub-phase tracks.
    Subphases {
        #[command(subcommand)]
        action: SubphasesAction,
    },

    /// Check whether a set of roles may perform an action today.
    Access {
        /// Action code, e.g. LOAD_GRADES.
        action: String,

        /// Role name; repeat for several roles.
        #[arg(short, long = "role", required = true)]
        roles: Vec<String>,
    },

    /// Generate a default configuration file.
    Init {
        /// Output path for the generated config file.
        #[arg(short, long, default_value = "./olimpiada.toml")]
        output: PathBuf,
    },

    /// Validate a configuration file.
    Validate,

    /// Show recent audit log entries.
    Audit {
        /// Maximum number of entries to show.
        #[arg(short, long, default_value = "20")]
        limit: u32,

        /// Only entries with this action name.
        #[arg(short, long)]
        action: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
enum CycleAction {
    /// List every cycle.
    List,
    /// Create the cycle for a year and make it current.
    Init {
        year: i32,
        /// First day of the first phase.
        #[arg(long, value_parser = parse_day, requires = "end")]
        start: Option<NaiveDate>,
        /// Last day of the first phase.
        #[arg(long, value_parser = parse_day, requires = "start")]
        end: Option<NaiveDate>,
    },
    /// Copy enrolments and the phase matrix of an earlier year.
    CarryOver { from_year: i32 },
}

#[derive(Subcommand, Debug)]
enum PhasesAction {
    /// List phases with schedules and status.
    List,
    /// Show the allowed date window for a phase.
    Constraints { code: String },
    /// Set the schedule of a phase.
    Schedule {
        code: String,
        #[arg(long, value_parser = parse_day)]
        start: NaiveDate,
        #[arg(long, value_parser = parse_day)]
        end: NaiveDate,
    },
    /// Append a phase to the current cycle.
    Add { code: String, name: String },
}

#[derive(Subcommand, Debug)]
enum PermissionsAction {
    /// Print the phase x action matrix.
    Phases,
    /// Print the role x action matrix.
    Roles,
    /// Enable or disable an action during a phase.
    SetPhase {
        phase: String,
        action: String,
        #[arg(action = clap::ArgAction::Set)]
        enabled: bool,
    },
    /// Grant or revoke an action for a role.
    SetRole {
        role: String,
        action: String,
        #[arg(action = clap::ArgAction::Set)]
        active: bool,
    },
}

#[derive(Subcommand, Debug)]
enum CatalogAction {
    /// List areas and levels.
    List,
    AddArea { name: String },
    AddLevel { name: String },
}

#[derive(Subcommand, Debug)]
enum SubphasesAction {
    /// List sub-phases, optionally for one (area, level) track.
    List {
        #[arg(long, requires = "level")]
        area: Option<i64>,
        #[arg(long, requires = "area")]
        level: Option<i64>,
    },
    /// Append a sub-phase to a track.
    Add {
        #[arg(long)]
        area: i64,
        #[arg(long)]
        level: i64,
        name: String,
        #[arg(long, default_value = "0")]
        students: u32,
        #[arg(long, default_value = "0")]
        evaluators: u32,
    },
    /// Move a sub-phase to EN_EVALUACION.
    Start { id: i64 },
    /// Move a sub-phase to FINALIZADA.
    Finalize { id: i64 },
    /// Record evaluation progress (0-100).
    Progress { id: i64, percent: u8 },
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new("warn"))
        .with_target(false)
        .without_time()
        .init();

    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Init { output } => cmd_init(&output),
        Commands::Validate => cmd_validate(&cli.config),
        command => {
            let config = load_config(&cli.config)?;
            let orch = open_orchestrator(&config, cli.today)?;

            match command {
                Commands::Status => cmd_status(&orch),
                Commands::Cycle { action } => cmd_cycle(&orch, action),
                Commands::Phases { action } => cmd_phases(&orch, action),
                Commands::Permissions { action } => cmd_permissions(&orch, action),
                Commands::Catalog { action } => cmd_catalog(&orch, action),
                Commands::Subphases { action } => cmd_subphases(&orch, action),
                Commands::Access { action, roles } => cmd_access(&orch, &action, &roles),
                Commands::Audit { limit, action } => cmd_audit(&orch, limit, action.as_deref()),
                Commands::Init { .. } | Commands::Validate => unreachable!(),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Config helpers
// ---------------------------------------------------------------------------

fn load_config(path: &Path) -> Result<AppConfig> {
    let mut config =
        AppConfig::load_from_file(path).context("failed to load configuration file")?;
    config
        .resolve_env_vars()
        .context("failed to resolve environment variables")?;
    Ok(config)
}

fn open_orchestrator(config: &AppConfig, today: Option<NaiveDate>) -> Result<Orchestrator> {
    let db_path = config.server.database_path();
    let db = Database::new(&db_path).context("failed to open database")?;
    db.initialize().context("failed to initialize database")?;

    let clock: Arc<dyn Clock> = match today {
        Some(day) => Arc::new(FixedClock(day)),
        None => Arc::new(SystemClock::new(config.calendar.utc_offset_minutes)),
    };
    Ok(Orchestrator::new(Arc::new(db), clock, config.policy.clone()))
}

fn phase_by_code(orch: &Orchestrator, code: &str) -> Result<GlobalPhase> {
    orch.phase_overview()?
        .into_iter()
        .map(|v| v.phase)
        .find(|p| p.code.eq_ignore_ascii_case(code))
        .ok_or_else(|| anyhow::anyhow!("phase '{}' not found in the current cycle", code))
}

// ---------------------------------------------------------------------------
// Subcommand implementations
// ---------------------------------------------------------------------------

fn cmd_init(output: &Path) -> Result<()> {
    if output.exists() {
        anyhow::bail!(
            "file already exists: {}. Use a different path or remove the existing file.",
            output.display()
        );
    }

    std::fs::write(output, AppConfig::default_toml()).context("failed to write config file")?;

    println!("Default configuration written to {}", output.display());
    println!();
    println!("Next steps:");
    println!("  1. Edit the data directory, UTC offset and users");
    println!("  2. Set each user's password variable (OLIMPIADA_ADMIN_PASSWORD, ...)");
    println!(
        "  3. Validate with: olimpiada validate --config {}",
        output.display()
    );
    println!(
        "  4. Start the server: olimpiada-server --config {}",
        output.display()
    );

    Ok(())
}

fn cmd_validate(config_path: &Path) -> Result<()> {
    println!("Validating configuration: {}", config_path.display());
    println!();

    let mut config =
        AppConfig::load_from_file(config_path).context("failed to parse configuration")?;
    println!("  [OK] TOML structure is valid");

    let _ = config.resolve_env_vars();
    println!("  [OK] Environment variable references processed");

    match config.validate() {
        Ok(()) => println!("  [OK] All required fields are valid"),
        Err(e) => {
            println!("  [FAIL] Validation error: {}", e);
            anyhow::bail!("configuration validation failed");
        }
    }

    println!();
    println!("Configuration summary:");
    println!("  Web listen     : {}", config.web.listen);
    println!("  Data directory : {}", config.server.data_dir.display());
    println!("  UTC offset     : {} min", config.calendar.utc_offset_minutes);
    println!("  Baseline phases: {}", config.policy.baseline_phases.join(", "));
    if config.web.auth_enabled() {
        for user in &config.web.users {
            println!(
                "  User {:<10}: roles [{}], password {}",
                user.username,
                user.roles.join(", "),
                if user.password.is_some() { "set" } else { "NOT SET" }
            );
        }
    } else {
        println!(
            "  Auth           : disabled (anonymous roles: [{}])",
            config.web.anonymous_roles.join(", ")
        );
    }
    println!();
    println!("Configuration is valid.");

    Ok(())
}

fn cmd_status(orch: &Orchestrator) -> Result<()> {
    let snapshot = orch.snapshot().context("failed to read cycle")?;
    let gate = orch.gate(&snapshot, &[]);

    println!("Olimpiada Status");
    println!("================");
    println!();
    println!("  Today         : {}", orch.today());
    println!(
        "  Cycle         : {}",
        snapshot
            .gestion
            .as_ref()
            .map(|g| g.year.to_string())
            .unwrap_or_else(|| "none".into())
    );
    println!("  Session state : {}", gate.session_state());
    println!(
        "  Active phase  : {}",
        gate.active_phase().map(|p| p.name.as_str()).unwrap_or("none")
    );

    if snapshot.gestion.is_some() {
        println!();
        print_phases(orch)?;
    }
    Ok(())
}

fn cmd_cycle(orch: &Orchestrator, action: CycleAction) -> Result<()> {
    match action {
        CycleAction::List => {
            let cycles = orch.list_gestiones()?;
            if cycles.is_empty() {
                println!("No cycles found.");
                return Ok(());
            }
            println!("{:<6} {:<8} {:<10} CREATED", "ID", "YEAR", "CURRENT");
            println!("{}", "-".repeat(60));
            for g in &cycles {
                println!(
                    "{:<6} {:<8} {:<10} {}",
                    g.id,
                    g.year,
                    if g.is_current { "yes" } else { "" },
                    g.created_at
                );
            }
            Ok(())
        }
        CycleAction::Init { year, start, end } => {
            let first = match (start, end) {
                (Some(start_date), Some(end_date)) => Some(ScheduleInput {
                    start_date,
                    end_date,
                }),
                _ => None,
            };
            let g = orch.initialize_cycle(year, first, Some(ACTOR))?;
            println!("Cycle {} initialized (id {}) and marked current.", g.year, g.id);
            Ok(())
        }
        CycleAction::CarryOver { from_year } => {
            let report = orch.carry_over(from_year, Some(ACTOR))?;
            println!("Imported {} into {}:", report.from_year, report.to_year);
            println!("  Enrolments copied  : {}", report.enrolments_copied);
            println!("  Permissions copied : {}", report.permissions_copied);
            if !report.unmatched_phases.is_empty() {
                println!("  Unmatched phases   : {}", report.unmatched_phases.join(", "));
            }
            if !report.unmatched_actions.is_empty() {
                println!("  Unmatched actions  : {}", report.unmatched_actions.join(", "));
            }
            Ok(())
        }
    }
}

fn print_phases(orch: &Orchestrator) -> Result<()> {
    let phases = orch.phase_overview()?;
    println!(
        "{:<4} {:<16} {:<20} {:<12} {:<12} STATUS",
        "#", "CODE", "NAME", "START", "END"
    );
    println!("{}", "-".repeat(80));
    for v in &phases {
        let (start, end) = match &v.schedule {
            Some(s) => (s.start_date.to_string(), s.end_date.to_string()),
            None => ("-".into(), "-".into()),
        };
        println!(
            "{:<4} {:<16} {:<20} {:<12} {:<12} {}",
            v.phase.order,
            v.phase.code,
            truncate(&v.phase.name, 20),
            start,
            end,
            v.status
        );
    }
    Ok(())
}

fn cmd_phases(orch: &Orchestrator, action: PhasesAction) -> Result<()> {
    match action {
        PhasesAction::List => print_phases(orch),
        PhasesAction::Constraints { code } => {
            let phase = phase_by_code(orch, &code)?;
            let c = orch.schedule_constraints(phase.id)?;
            println!("Phase {} ({})", phase.name, phase.code);
            println!("  Earliest start : {}", c.min_start);
            println!(
                "  Latest end     : {}",
                c.max_end
                    .map(|d| d.to_string())
                    .unwrap_or_else(|| "unbounded".into())
            );
            Ok(())
        }
        PhasesAction::Schedule { code, start, end } => {
            let phase = phase_by_code(orch, &code)?;
            let s = orch.schedule_phase(
                phase.id,
                ScheduleInput {
                    start_date: start,
                    end_date: end,
                },
                Some(ACTOR),
            )?;
            println!(
                "Phase {} scheduled from {} to {}.",
                phase.code, s.start_date, s.end_date
            );
            Ok(())
        }
        PhasesAction::Add { code, name } => {
            let p = orch.add_global_phase(&code, &name, Some(ACTOR))?;
            println!("Phase {} added at position {}.", p.code, p.order);
            Ok(())
        }
    }
}

fn cmd_permissions(orch: &Orchestrator, action: PermissionsAction) -> Result<()> {
    match action {
        PermissionsAction::Phases => {
            let m = orch.phase_matrix()?;
            let rows: Vec<(i64, &str)> = m.phases.iter().map(|p| (p.id, p.code.as_str())).collect();
            let cells: Vec<(i64, i64, bool)> = m
                .cells
                .iter()
                .map(|c| (c.global_phase_id, c.action_id, c.enabled))
                .collect();
            print_matrix("PHASE", &rows, &m.actions, &cells);
            Ok(())
        }
        PermissionsAction::Roles => {
            let m = orch.role_matrix()?;
            let rows: Vec<(i64, &str)> = m.roles.iter().map(|r| (r.id, r.name.as_str())).collect();
            let cells: Vec<(i64, i64, bool)> = m
                .cells
                .iter()
                .map(|c| (c.role_id, c.action_id, c.active))
                .collect();
            print_matrix("ROLE", &rows, &m.actions, &cells);
            Ok(())
        }
        PermissionsAction::SetPhase {
            phase,
            action,
            enabled,
        } => {
            let m = orch.phase_matrix()?;
            let phase_id = m
                .phases
                .iter()
                .find(|p| p.code.eq_ignore_ascii_case(&phase))
                .map(|p| p.id)
                .ok_or_else(|| anyhow::anyhow!("phase '{}' not found", phase))?;
            let action_id = action_id(&m.actions, &action)?;
            let mut cells: Vec<PhasePermission> = m
                .cells
                .into_iter()
                .filter(|c| !(c.global_phase_id == phase_id && c.action_id == action_id))
                .collect();
            cells.push(PhasePermission {
                global_phase_id: phase_id,
                action_id,
                enabled,
            });
            orch.replace_phase_matrix(&cells, Some(ACTOR))?;
            println!("{} during {}: {}", action, phase, on_off(enabled));
            Ok(())
        }
        PermissionsAction::SetRole {
            role,
            action,
            active,
        } => {
            let m = orch.role_matrix()?;
            let role_id = m
                .roles
                .iter()
                .find(|r| r.name == role)
                .map(|r| r.id)
                .ok_or_else(|| anyhow::anyhow!("role '{}' not found", role))?;
            let action_id = action_id(&m.actions, &action)?;
            let mut cells: Vec<RolePermission> = m
                .cells
                .into_iter()
                .filter(|c| !(c.role_id == role_id && c.action_id == action_id))
                .collect();
            cells.push(RolePermission {
                role_id,
                action_id,
                active,
            });
            orch.replace_role_matrix(&cells, Some(ACTOR))?;
            println!("{} for {}: {}", action, role, on_off(active));
            Ok(())
        }
    }
}

fn action_id(actions: &[olimpiada_core::models::Action], code: &str) -> Result<i64> {
    actions
        .iter()
        .find(|a| a.code.eq_ignore_ascii_case(code))
        .map(|a| a.id)
        .ok_or_else(|| anyhow::anyhow!("action '{}' not found", code))
}

fn print_matrix(
    label: &str,
    rows: &[(i64, &str)],
    actions: &[olimpiada_core::models::Action],
    cells: &[(i64, i64, bool)],
) {
    print!("{:<16}", label);
    for a in actions {
        print!(" {:<4}", truncate(&a.code, 4));
    }
    println!();
    println!("{}", "-".repeat(16 + actions.len() * 5));
    for (row_id, row_name) in rows {
        print!("{:<16}", truncate(row_name, 16));
        for a in actions {
            let on = cells
                .iter()
                .any(|(r, c, v)| r == row_id && *c == a.id && *v);
            print!(" {:<4}", if on { "x" } else { "." });
        }
        println!();
    }
    println!();
    for a in actions {
        println!("  {:<20} {}", a.code, a.name);
    }
}

fn cmd_catalog(orch: &Orchestrator, action: CatalogAction) -> Result<()> {
    match action {
        CatalogAction::List => {
            println!("Areas:");
            for a in orch.areas()? {
                println!("  {:<6} {}", a.id, a.name);
            }
            println!();
            println!("Levels:");
            for l in orch.levels()? {
                println!("  {:<6} {}", l.id, l.name);
            }
            Ok(())
        }
        CatalogAction::AddArea { name } => {
            let a = orch.add_area(&name)?;
            println!("Area '{}' has id {}.", a.name, a.id);
            Ok(())
        }
        CatalogAction::AddLevel { name } => {
            let l = orch.add_level(&name)?;
            println!("Level '{}' has id {}.", l.name, l.id);
            Ok(())
        }
    }
}

fn cmd_subphases(orch: &Orchestrator, action: SubphasesAction) -> Result<()> {
    match action {
        SubphasesAction::List { area, level } => {
            let views = match (area, level) {
                (Some(area), Some(level)) => orch.sub_phases(area, level)?,
                _ => orch.all_sub_phases()?,
            };
            if views.is_empty() {
                println!("No sub-phases found.");
                return Ok(());
            }
            println!(
                "{:<6} {:<6} {:<6} {:<4} {:<24} {:<14} {:<6} NEXT",
                "ID", "AREA", "LEVEL", "#", "NAME", "STATUS", "PROG"
            );
            println!("{}", "-".repeat(90));
            for v in &views {
                let sp = &v.sub_phase;
                println!(
                    "{:<6} {:<6} {:<6} {:<4} {:<24} {:<14} {:<6} {}",
                    sp.id,
                    sp.area_id,
                    sp.level_id,
                    sp.order,
                    truncate(&sp.name, 24),
                    sp.status,
                    format!("{}%", sp.progress_percent),
                    v.available_transition
                        .map(|s| s.to_string())
                        .unwrap_or_else(|| "-".into())
                );
            }
            Ok(())
        }
        SubphasesAction::Add {
            area,
            level,
            name,
            students,
            evaluators,
        } => {
            let sp = orch.create_sub_phase(
                &NewSubPhase {
                    area_id: area,
                    level_id: level,
                    name,
                    student_count: students,
                    evaluator_count: evaluators,
                },
                Some(ACTOR),
            )?;
            println!("Sub-phase '{}' added as #{} (id {}).", sp.name, sp.order, sp.id);
            Ok(())
        }
        SubphasesAction::Start { id } => {
            let sp = orch.change_sub_phase_status(id, SubPhaseStatus::EnEvaluacion, Some(ACTOR))?;
            println!("Sub-phase '{}' is now {}.", sp.name, sp.status);
            Ok(())
        }
        SubphasesAction::Finalize { id } => {
            let sp = orch.change_sub_phase_status(id, SubPhaseStatus::Finalizada, Some(ACTOR))?;
            println!("Sub-phase '{}' is now {}.", sp.name, sp.status);
            Ok(())
        }
        SubphasesAction::Progress { id, percent } => {
            let sp = orch.update_progress(id, percent, Some(ACTOR))?;
            println!("Sub-phase '{}' progress: {}%.", sp.name, sp.progress_percent);
            Ok(())
        }
    }
}

fn cmd_access(orch: &Orchestrator, action: &str, roles: &[String]) -> Result<()> {
    let snapshot = orch.snapshot()?;
    let gate = orch.gate(&snapshot, roles);
    match gate.check_action(action) {
        GateDecision::Allowed => {
            println!("ALLOWED: [{}] may {} today.", roles.join(", "), action);
        }
        GateDecision::Denied(denied) => {
            println!("DENIED: [{}] may not {} today.", roles.join(", "), action);
            println!("  Reason        : {:?}", denied.reason);
            println!("  Session state : {}", denied.session_state);
            println!(
                "  Active phase  : {}",
                denied.active_phase.as_deref().unwrap_or("none")
            );
        }
    }
    Ok(())
}

fn cmd_audit(orch: &Orchestrator, limit: u32, action: Option<&str>) -> Result<()> {
    let entries = orch
        .audit_log(limit, action)
        .context("failed to list audit entries")?;

    if entries.is_empty() {
        println!("No audit log entries found.");
        return Ok(());
    }

    println!(
        "{:<26} {:<22} {:<10} {:<4} DETAILS",
        "TIMESTAMP", "ACTION", "ACTOR", "OK"
    );
    println!("{}", "-".repeat(100));

    for entry in &entries {
        println!(
            "{:<26} {:<22} {:<10} {:<4} {}",
            truncate(&entry.created_at, 26),
            entry.action,
            entry.actor.as_deref().unwrap_or("-"),
            if entry.success { "yes" } else { "no" },
            truncate(entry.details.as_deref().unwrap_or(""), 50),
        );
    }

    println!();
    println!("{} entries shown", entries.len());

    Ok(())
}

// ---------------------------------------------------------------------------
// Utilities
// ---------------------------------------------------------------------------

fn parse_day(s: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|e| format!("expected YYYY-MM-DD: {}", e))
}

fn on_off(v: bool) -> &'static str {
    if v {
        "enabled"
    } else {
        "disabled"
    }
}

/// Shorten to at most `max_len` characters, respecting char boundaries.
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_multibyte() {
        assert_eq!(truncate("Configuración", 20), "Configuración");
        assert_eq!(truncate("Evaluación Clasificatoria", 10), "Evaluac...");
    }

    #[test]
    fn test_parse_day() {
        assert_eq!(
            parse_day("2025-03-01").unwrap(),
            NaiveDate::from_ymd_opt(2025, 3, 1).unwrap()
        );
        assert!(parse_day("01/03/2025").is_err());
    }

    #[test]
    fn test_cli_parses_schedule() {
        let cli = Cli::try_parse_from([
            "olimpiada",
            "--today",
            "2025-01-10",
            "phases",
            "schedule",
            "EVALUACION",
            "--start",
            "2025-02-01",
            "--end",
            "2025-02-28",
        ])
        .unwrap();
        assert_eq!(cli.today, NaiveDate::from_ymd_opt(2025, 1, 10));
        assert!(matches!(
            cli.command,
            Commands::Phases {
                action: PhasesAction::Schedule { .. }
            }
        ));
    }
}
