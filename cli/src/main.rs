//! The `ratchet` binary: the top-level driver that owns the phase
//! machine's loop and performs the real I/O between `advance()` calls —
//! scouting, planning, executing, and publishing tickets — that the
//! `ratchet-phases` crate deliberately never does itself.

mod config;
mod layout;
mod plan;
mod preflight;
mod scout;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use ratchet_agent::{AgentBackend, CommandTemplate, ExecuteBackend, ScoutBackend};
use ratchet_memory::{DedupStore, LearningsStore, SectorsStore};
use ratchet_persistence::{ProjectRepository, RunDir, RunRepository, SqliteAdapter, TicketRepository};
use ratchet_phases::{Directive, PhaseMachine, QaOutcome as PhaseQaOutcome};
use ratchet_proposals::pipeline::{CategoryFilter, PipelineConfig, PipelineContext, RunMode};
use ratchet_tickets::{run_ticket, PromptContext, TicketRunConfig, TicketRunResult, TicketTerminal};
use ratchet_types::{Project, Run, RunType, Ticket, TicketCategory, TicketStatus};
use ratchet_worktree::WorktreeManager;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::layout::StateDir;

#[derive(Parser, Debug)]
#[command(name = "ratchet", about = "Autonomous code-improvement engine")]
struct Cli {
    /// Root of the repository to operate on.
    #[arg(long, default_value = ".")]
    root: PathBuf,

    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand, Debug)]
enum Mode {
    /// Run the SCOUT -> ... -> PR loop until budgets are exhausted or there
    /// is no more work.
    Default,
    /// Read a CI failure log, create one ticket scoped to the affected
    /// files, and run it through the ticket pipeline.
    Ci {
        /// Path to a captured CI failure log.
        log_path: PathBuf,
    },
    /// Process existing `ready` tickets without scouting for new ones.
    Work,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(err) => {
            eprintln!("failed to start async runtime: {err}");
            return ExitCode::from(1);
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(SessionOutcome::Success) => ExitCode::from(0),
        Ok(SessionOutcome::Failure) => ExitCode::from(1),
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::from(2)
        }
    }
}

enum SessionOutcome {
    Success,
    Failure,
}

async fn run(cli: Cli) -> anyhow::Result<SessionOutcome> {
    if let Err(err) = preflight::check() {
        anyhow::bail!("preflight failed: {err}");
    }

    let root = std::fs::canonicalize(&cli.root)?;
    let state_dir = StateDir::open(&root)?;
    let config = EngineConfig::load(state_dir.root())?;

    let adapter = SqliteAdapter::open(&state_dir.db_path(), 4)?;
    let project = open_project(&adapter, &root)?;

    let mut dedup = DedupStore::load(state_dir.dedup_path())?;
    dedup.apply_decay();
    let mut learnings = LearningsStore::load(state_dir.learnings_path())?;
    learnings.apply_decay();
    learnings.consolidate(50);
    let mut sectors = SectorsStore::load(state_dir.sectors_path());
    if sectors.sectors().is_empty() {
        sectors.refresh(&root);
    }

    let worktrees = WorktreeManager::new(&root);
    let run_id = Uuid::new_v4();
    let run_dir = RunDir::new(state_dir.root(), run_id)?;
    let mut machine = PhaseMachine::start(run_id, run_dir, config.session_budgets())?;

    let run_repo = RunRepository::new(&adapter);
    let session_run_type = match cli.mode {
        Mode::Ci { .. } => RunType::Ci,
        _ => RunType::Worker,
    };
    let session_run = Run::new(session_run_type, project.id, None);
    run_repo.insert(&session_run)?;

    let artifact_root = machine.state().run_id.to_string();
    let artifacts_dir = state_dir.runs_dir().join(&artifact_root).join("artifacts");
    std::fs::create_dir_all(&artifacts_dir)?;

    let scout_backend: Arc<dyn AgentBackend> = Arc::new(ScoutBackend::new(
        CommandTemplate::new(config.backend.scout_binary(), vec!["-p".to_string(), "{prompt_file}".to_string()]),
        artifacts_dir.clone(),
    ));
    let execute_backend: Arc<dyn AgentBackend> = Arc::new(ExecuteBackend::new(
        CommandTemplate::new(config.backend.execute_binary(), vec!["-p".to_string(), "{prompt_file}".to_string()]),
        artifacts_dir.clone(),
    ));

    let started = Instant::now();
    let cancel = CancellationToken::new();
    let ticket_repo = TicketRepository::new(&adapter);

    if let Mode::Ci { log_path } = &cli.mode {
        let log = std::fs::read_to_string(log_path)?;
        let ticket = ci_ticket_from_log(&project, &log);
        ticket_repo.insert(&ticket)?;
        ticket_repo.transition(ticket.id, TicketStatus::Ready)?;
    }

    let run_config = TicketRunConfig {
        draft_prs: config.draft_prs,
        gh_binary: config.gh_binary.clone(),
        qa: config.qa_config(),
        spindle: config.spindle_config(),
        ..TicketRunConfig::default()
    };

    // A session started in `Work` or `Ci` mode processes whatever is
    // already `ready` instead of scouting for new tickets: advance once,
    // up front, through the real `NextTicket` transition so the first
    // loop iteration lands on `Plan`/`Execute` (or `Done`, if nothing is
    // ready) rather than sitting in `Scout`.
    if matches!(cli.mode, Mode::Work | Mode::Ci { .. }) {
        let time_remaining = config.session_budgets().wall_clock.saturating_sub(started.elapsed());
        machine.advance("normal", time_remaining, |machine| {
            drive_next_ticket(machine, &ticket_repo, project.id, &config)
        })?;
    }

    // The ticket pipeline's own QA step is terminal (a QA failure ends the
    // ticket there, inside `run_ticket`), so by the time the phase machine
    // reaches `Phase::Qa`/`Phase::Pr` the outcome of the most recent
    // execute step is already known; this holds it across loop iterations
    // for those two phases to read back instead of guessing.
    let mut last_ticket_result: Option<TicketRunResult> = None;

    // Proposals the pipeline's batch-selection stage deferred (out-of-scope
    // or over the per-cycle cap) carry forward across scout cycles so they
    // compete again once the scope or budget that excluded them changes.
    let mut deferred_proposals: Vec<ratchet_types::Proposal> = Vec::new();

    loop {
        if started.elapsed() > config.session_budgets().wall_clock {
            break;
        }
        let directive = machine.check_budgets(0, started.elapsed())?;
        if directive == Directive::Stop {
            break;
        }

        let phase = machine.state().phase;
        let spindle_risk = "normal";
        let time_remaining = config.session_budgets().wall_clock.saturating_sub(started.elapsed());

        let directive = machine.advance(spindle_risk, time_remaining, |machine| {
            match phase {
                ratchet_types::Phase::Scout => drive_scout(
                    machine,
                    &scout_backend,
                    &root,
                    &project,
                    &mut dedup,
                    &mut learnings,
                    &mut sectors,
                    &ticket_repo,
                    &config,
                    &cancel,
                    &mut deferred_proposals,
                ),
                ratchet_types::Phase::NextTicket => drive_next_ticket(machine, &ticket_repo, project.id, &config),
                ratchet_types::Phase::Plan => drive_plan(machine, &execute_backend, &worktrees, &ticket_repo, &config, &cancel),
                ratchet_types::Phase::Execute | ratchet_types::Phase::ParallelExecute => drive_execute(
                    machine,
                    &execute_backend,
                    &worktrees,
                    &ticket_repo,
                    &run_repo,
                    &mut dedup,
                    &mut learnings,
                    &mut sectors,
                    &run_config,
                    &cancel,
                    &mut last_ticket_result,
                ),
                ratchet_types::Phase::Qa => drive_qa(
                    machine,
                    &ticket_repo,
                    &mut dedup,
                    &mut learnings,
                    &mut sectors,
                    &config,
                    &last_ticket_result,
                ),
                ratchet_types::Phase::Pr => {
                    let pr_created = last_ticket_result
                        .as_ref()
                        .and_then(|r| match &r.terminal {
                            Some(TicketTerminal::Done { pr_url }) => Some(pr_url.is_some()),
                            _ => None,
                        })
                        .unwrap_or(false);
                    machine.on_pr_result(pr_created)?;
                    Ok(Directive::Continue)
                }
                other => {
                    let _ = other;
                    Ok(Directive::Continue)
                }
            }
        });

        let directive = match directive {
            Ok(d) => d,
            Err(err) => {
                tracing::error!(error = %err, "session driver error");
                return Ok(SessionOutcome::Failure);
            }
        };

        if directive == Directive::Stop {
            break;
        }
    }

    let _ = dedup.save();
    let _ = learnings.save();
    let _ = sectors.save();

    let final_phase = machine.state().phase;
    run_repo.set_status(
        session_run.id,
        if final_phase == ratchet_types::Phase::Done {
            ratchet_types::RunStatus::Success
        } else {
            ratchet_types::RunStatus::Failure
        },
    )?;

    write_session_report(&state_dir, &machine)?;

    Ok(match final_phase {
        ratchet_types::Phase::Done => SessionOutcome::Success,
        _ => SessionOutcome::Failure,
    })
}

fn open_project(adapter: &SqliteAdapter, root: &std::path::Path) -> anyhow::Result<Project> {
    let repo = ProjectRepository::new(adapter);
    let root_str = root.display().to_string();
    if let Some(project) = repo.find_by_root_path(&root_str)? {
        return Ok(project);
    }
    let name = root.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_else(|| "project".to_string());
    let project = Project::new(name, root_str);
    repo.insert(&project)?;
    Ok(project)
}

fn ci_ticket_from_log(project: &Project, log: &str) -> Ticket {
    let affected: Vec<String> = log
        .lines()
        .filter_map(|line| {
            line.split_whitespace()
                .find(|tok| (tok.contains('/') || tok.contains('.')) && !tok.starts_with("http"))
                .map(|tok| tok.trim_matches(|c: char| !c.is_alphanumeric() && c != '/' && c != '.' && c != '_' && c != '-').to_string())
        })
        .filter(|p| !p.is_empty())
        .take(20)
        .collect();

    let mut ticket = Ticket::new(project.id, "Fix CI failure", TicketCategory::Fix, affected);
    ticket.description = format!("Automated ticket opened from a CI failure log:\n\n{log}");
    ticket
}

/// Resolves the sector that `path` names against the tracked sector list,
/// so the scout prompt can mention the sector's inferred purpose and
/// confidence instead of just a bare path.
fn resolve_sector(sectors: &SectorsStore, path: &str) -> Option<ratchet_types::Sector> {
    sectors.sectors().iter().find(|s| s.path == path).cloned()
}

#[allow(clippy::too_many_arguments)]
fn drive_scout(
    machine: &mut PhaseMachine,
    scout_backend: &Arc<dyn AgentBackend>,
    root: &std::path::Path,
    project: &Project,
    dedup: &mut DedupStore,
    learnings: &mut LearningsStore,
    sectors: &mut SectorsStore,
    ticket_repo: &TicketRepository,
    config: &EngineConfig,
    cancel: &CancellationToken,
    deferred: &mut Vec<ratchet_types::Proposal>,
) -> Result<Directive, ratchet_persistence::PersistenceError> {
    let sector_path = sectors.next_scope();
    let sector = sector_path.as_deref().and_then(|path| resolve_sector(sectors, path));

    let dedup_block = ratchet_memory::dedup::format_for_prompt(dedup.entries(), 1000);
    let relevance_ctx = ratchet_memory::learnings::RelevanceContext { paths: &[], commands: &[], title_hint: None };
    let relevant = ratchet_memory::learnings::select_relevant(learnings.learnings(), &relevance_ctx, 10);
    let learnings_block = ratchet_memory::learnings::format_learnings_for_prompt(&relevant, 1500);

    let prompt_ctx = scout::ScoutPromptContext {
        sector: sector.clone(),
        dedup_block,
        learnings_block,
        trajectory_focus: None,
        formula: config.formula.clone(),
        categories: config.categories.clone(),
        min_confidence: config.min_confidence,
        min_impact: config.min_impact,
        hints: Vec::new(),
    };
    let prompt = scout::build_scout_prompt(&prompt_ctx);

    let scouted = run_scout_turn(scout_backend, root, sector_path.as_deref(), prompt, cancel);

    // Stage 2: proposals deferred by a prior cycle's batch-selection step
    // re-enter competition once this cycle's scope covers their files.
    let reinjected = ratchet_proposals::pipeline::reinject_deferred(scouted, deferred, &config.scope_globs);
    // Stage 1: no external review backend is configured for this session,
    // so adversarial review is always skipped rather than silently no-op'd
    // against an empty confidence map (see `adversarial_review`'s doc
    // comment on why `skip_review` is unconditional here).
    let (proposals, review_learnings) = ratchet_proposals::pipeline::adversarial_review(reinjected, &std::collections::HashMap::new(), true);
    for learning in review_learnings {
        learnings.push(learning);
    }

    let category_filter = CategoryFilter {
        allow: config.categories.clone(),
        block: Vec::new(),
    };
    let pipeline_config = PipelineConfig {
        min_impact_score: config.min_impact,
        run_mode: if config.continuous_mode { RunMode::Continuous } else { RunMode::Planning },
        remaining_pr_budget: (config.max_prs as usize).saturating_sub(machine.state().budgets.prs_created as usize),
        ..PipelineConfig::default()
    };
    let ctx = PipelineContext {
        scope_globs: config.scope_globs.clone(),
        dedup_memory: dedup.entries().to_vec(),
        sector_affinity: sector.as_ref().map(|s| s.affinity.clone()),
        ..PipelineContext::default()
    };
    let outcome = ratchet_proposals::pipeline::run_pipeline(proposals, &category_filter, &pipeline_config, &ctx);
    *deferred = outcome.deferred.clone();

    let mut created = 0u32;
    for proposal in &outcome.accepted {
        let mut ticket = Ticket::new(
            project.id,
            proposal.title.clone(),
            proposal.category,
            if proposal.allowed_paths.is_empty() { proposal.files.clone() } else { proposal.allowed_paths.clone() },
        );
        ticket.description = proposal.description.clone();
        ticket.verification_commands = proposal.verification_commands.clone();
        ticket.priority = proposal.impact_score as i32;
        ticket_repo.insert(&ticket)?;
        ticket_repo.transition(ticket.id, TicketStatus::Ready)?;
        dedup.record(&proposal.title, false);
        created += 1;
    }
    if let Some(path) = &sector_path {
        sectors.record_scan(path, created);
    }

    machine.on_scout_result(created, sector_path.is_some(), config.continuous_mode)
}

/// Drives one scout turn synchronously. `block_in_place` + `block_on` run
/// the future to completion on the calling thread rather than spawning
/// it, so it can freely borrow `root` without a `'static` bound. Any agent
/// or parse failure degrades to an empty batch — the scout retry/advance-
/// sector logic in `scout_transition` already treats "nothing found" and
/// "couldn't run" the same way. The scout reads the checked-out tree
/// directly (no worktree is allocated for it): it never writes, so there
/// is nothing for an isolated copy to protect.
fn run_scout_turn(
    backend: &Arc<dyn AgentBackend>,
    root: &std::path::Path,
    scope: Option<&str>,
    prompt: String,
    cancel: &CancellationToken,
) -> Vec<ratchet_types::Proposal> {
    let scope_path = match scope {
        Some(s) => root.join(s),
        None => root.to_path_buf(),
    };
    let runtime = match tokio::runtime::Handle::try_current() {
        Ok(h) => h,
        Err(_) => return Vec::new(),
    };
    tokio::task::block_in_place(|| {
        runtime.block_on(scout::run_scout(backend.as_ref(), &scope_path, prompt, Duration::from_secs(300), cancel))
    })
    .unwrap_or_default()
}

fn drive_next_ticket(
    machine: &mut PhaseMachine,
    ticket_repo: &TicketRepository,
    project_id: Uuid,
    config: &EngineConfig,
) -> Result<Directive, ratchet_persistence::PersistenceError> {
    let ready = ticket_repo.list_ready(project_id).unwrap_or_default();
    let pr_budget_exhausted = machine.state().budgets.prs_created >= config.max_prs;
    let max_cycles_reached = machine.state().budgets.scout_cycles >= config.max_scout_cycles;

    if let Some(ticket) = ready.first() {
        ticket_repo.transition(ticket.id, TicketStatus::Leased).ok();
        machine.on_next_ticket(
            Some(ticket.category),
            config.parallel_width,
            ready.len() > 1,
            pr_budget_exhausted,
            max_cycles_reached,
            Some(ticket.id),
        )
    } else {
        machine.on_next_ticket(None, config.parallel_width, false, pr_budget_exhausted, max_cycles_reached, None)
    }
}

fn drive_plan(
    machine: &mut PhaseMachine,
    backend: &Arc<dyn AgentBackend>,
    worktrees: &WorktreeManager,
    ticket_repo: &TicketRepository,
    config: &EngineConfig,
    cancel: &CancellationToken,
) -> Result<Directive, ratchet_persistence::PersistenceError> {
    let Some(ticket_id) = machine.state().current_ticket_id else {
        return machine.on_plan_result(false, config.max_plan_rejections).map(|o| directive_of(o.phase));
    };
    let Ok(ticket) = ticket_repo.find(ticket_id) else {
        return machine.on_plan_result(false, config.max_plan_rejections).map(|o| directive_of(o.phase));
    };

    let handle = match worktrees.create("HEAD") {
        Ok(h) => h,
        Err(_) => return machine.on_plan_result(false, config.max_plan_rejections).map(|o| directive_of(o.phase)),
    };

    let runtime = tokio::runtime::Handle::try_current();
    let approved = if let Ok(handle_rt) = runtime {
        let worktree_path = handle.path();
        let max_lines = config.max_lines_per_ticket;
        tokio::task::block_in_place(|| {
            handle_rt.block_on(async {
                match plan::run_plan_agent(backend.as_ref(), worktree_path, &ticket, Duration::from_secs(300), cancel).await {
                    Ok(plan) => plan::validate_plan(&plan, &ticket, max_lines).is_ok(),
                    Err(_) => false,
                }
            })
        })
    } else {
        false
    };

    machine.on_plan_result(approved, config.max_plan_rejections).map(|o| directive_of(o.phase))
}

fn directive_of(phase: ratchet_types::Phase) -> Directive {
    if phase.is_terminal() {
        Directive::Stop
    } else {
        Directive::Continue
    }
}

#[allow(clippy::too_many_arguments)]
fn drive_execute(
    machine: &mut PhaseMachine,
    backend: &Arc<dyn AgentBackend>,
    worktrees: &WorktreeManager,
    ticket_repo: &TicketRepository,
    run_repo: &RunRepository,
    dedup: &mut DedupStore,
    learnings: &mut LearningsStore,
    sectors: &mut SectorsStore,
    run_config: &TicketRunConfig,
    cancel: &CancellationToken,
    last_ticket_result: &mut Option<TicketRunResult>,
) -> Result<Directive, ratchet_persistence::PersistenceError> {
    let Some(ticket_id) = machine.state().current_ticket_id else {
        return machine.on_execute_result(false, false, false, 0);
    };
    let Ok(ticket) = ticket_repo.find(ticket_id) else {
        return machine.on_execute_result(false, false, false, 0);
    };
    // `Leased` can't jump straight to `Done`/`Blocked` (see
    // `TicketStatus::allowed_next`); bridge through `InProgress` here, once,
    // before the first execute attempt touches the ticket.
    ticket_repo.transition(ticket.id, TicketStatus::InProgress).ok();

    let relevance_ctx = ratchet_memory::learnings::RelevanceContext {
        paths: &ticket.allowed_paths,
        commands: &ticket.verification_commands,
        title_hint: Some(ticket.title.as_str()),
    };
    let prompt_ctx = PromptContext {
        learnings_block: ratchet_memory::learnings::format_learnings_for_prompt(
            &ratchet_memory::learnings::select_relevant(learnings.learnings(), &relevance_ctx, 15),
            2000,
        ),
        dedup_block: ratchet_memory::dedup::format_for_prompt(dedup.entries(), 1000),
        ..PromptContext::default()
    };

    let runtime = tokio::runtime::Handle::try_current();
    let result = if let Ok(handle_rt) = runtime {
        // Synchronous `block_on` under `block_in_place` completes before
        // this call returns, so it can borrow `worktrees`/`ticket`/`cancel`
        // directly without any `'static` bound or unsafe pointer cast.
        tokio::task::block_in_place(|| {
            handle_rt.block_on(run_ticket(&ticket, "HEAD", worktrees, backend.as_ref(), &prompt_ctx, run_config, cancel, run_repo))
        })
    } else {
        TicketRunResult::default()
    };

    // A QA failure isn't final yet — the retry-vs-block decision belongs to
    // the `Qa` phase handler (`drive_qa`), so the ticket-outcome side
    // effects (status transition, dedup/learnings/sector bookkeeping) are
    // deferred until that decision is made, to avoid double-applying them.
    if !matches!(result.terminal, Some(TicketTerminal::QaFailed { .. })) {
        apply_ticket_outcome(&ticket, &result, ticket_repo, dedup, learnings, sectors);
    }

    let directive = match &result.terminal {
        // `QaFailed` took every prior step (worktree, agent, scope, commit,
        // push) successfully — it counts as a completed execute pass so the
        // phase machine advances to `Qa`, where `drive_qa` owns the
        // retry-vs-block decision.
        Some(TicketTerminal::Done { .. }) | Some(TicketTerminal::QaFailed { .. }) => {
            machine.on_execute_result(true, true, true, result.lines_changed as u64)
        }
        Some(TicketTerminal::SpindleAborted { reason }) => machine.on_spindle_abort(2, reason),
        Some(TicketTerminal::Blocked { .. }) | Some(TicketTerminal::NoChanges) | None => {
            machine.on_execute_result(false, false, false, result.lines_changed as u64)
        }
    };
    *last_ticket_result = Some(result);
    directive
}

fn apply_ticket_outcome(
    ticket: &Ticket,
    result: &TicketRunResult,
    ticket_repo: &TicketRepository,
    dedup: &mut DedupStore,
    learnings: &mut LearningsStore,
    sectors: &mut SectorsStore,
) {
    for learning in &result.learnings {
        learnings.push(learning.clone());
    }
    if let Some(completed) = result.dedup_outcome {
        dedup.record(&ticket.title, completed);
    }
    let category_name = ratchet_proposals::pipeline::category_name(ticket.category);
    if let Some(parent) = ticket.allowed_paths.first().and_then(|p| p.split('/').next()) {
        sectors.record_category_outcome(parent, category_name, matches!(result.terminal, Some(TicketTerminal::Done { .. })));
    }

    let next_status = match &result.terminal {
        Some(TicketTerminal::Done { .. }) => TicketStatus::Done,
        Some(TicketTerminal::SpindleAborted { .. }) => TicketStatus::Blocked,
        Some(TicketTerminal::Blocked { .. }) => TicketStatus::Blocked,
        Some(TicketTerminal::NoChanges) => TicketStatus::Blocked,
        // Only reached via `drive_qa`, once the retry budget is exhausted
        // and the ticket is finally blocked rather than re-driven.
        Some(TicketTerminal::QaFailed { .. }) => TicketStatus::Blocked,
        None => TicketStatus::Blocked,
    };
    let _ = ticket_repo.transition(ticket.id, next_status);
}

/// `Qa → Execute | Pr | NextTicket`. Reads back the most recent ticket
/// run's QA outcome (`run_ticket`'s QA step is the only thing that can
/// produce one) and asks the phase machine whether the session's
/// `qa_retry_cap` allows another `Execute` pass. Once the cap is hit, the
/// ticket-outcome side effects `drive_execute` deferred for `QaFailed` are
/// finally applied here, against the now-blocked ticket.
fn drive_qa(
    machine: &mut PhaseMachine,
    ticket_repo: &TicketRepository,
    dedup: &mut DedupStore,
    learnings: &mut LearningsStore,
    sectors: &mut SectorsStore,
    config: &EngineConfig,
    last_ticket_result: &Option<TicketRunResult>,
) -> Result<Directive, ratchet_persistence::PersistenceError> {
    let qa_passed = last_ticket_result.as_ref().and_then(|r| r.qa.as_ref()).map(|qa| qa.success).unwrap_or(true);
    let outcome: PhaseQaOutcome = machine.on_qa_result(qa_passed, config.qa_retry_cap)?;

    if !qa_passed && outcome.ticket_blocked {
        if let Some(ticket_id) = machine.state().current_ticket_id {
            if let (Ok(ticket), Some(result)) = (ticket_repo.find(ticket_id), last_ticket_result.as_ref()) {
                apply_ticket_outcome(&ticket, result, ticket_repo, dedup, learnings, sectors);
            }
        }
    }

    Ok(directive_of(outcome.phase))
}

fn write_session_report(state_dir: &StateDir, machine: &PhaseMachine) -> anyhow::Result<()> {
    let budgets = ratchet_phases::budget_summary(machine.state());
    let report = format!(
        "# Session {}\n\nphase: {:?}\ntickets completed: {}\ntickets failed: {}\ntickets blocked: {}\nPRs created: {}\nscout cycles: {}\nlines changed: {}\n",
        machine.state().run_id,
        machine.state().phase,
        budgets.tickets_completed,
        budgets.tickets_failed,
        budgets.tickets_blocked,
        budgets.prs_created,
        budgets.scout_cycles,
        budgets.lines_changed,
    );
    let path = state_dir.reports_dir().join(format!("session-{}.md", machine.state().run_id));
    std::fs::write(path, report)?;
    Ok(())
}
