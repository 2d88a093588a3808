//! Unified status view: scheduler snapshot, runtime records, coordination
//! locks, board rows, and recent update-log entries in one payload.

use serde::Serialize;
use std::collections::BTreeMap;

use teams_board::{Board, SpecIndex};
use teams_core::types::owner_key;
use teams_state::updates::{read_recent, UpdateEntry};

use crate::error::EngineError;
use crate::inventory::{load_lock_inventory, load_runtime_records, summarize, RuntimeRecord};
use crate::readiness::{evaluate, ReadinessSnapshot};
use crate::session::Session;

const UPDATES_LIMIT: usize = 200;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BoardRow {
    pub task_id: String,
    pub title: String,
    pub owner: String,
    pub scope: String,
    pub deps: String,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuntimeSummary {
    pub total: usize,
    pub active: usize,
    pub stale: usize,
    pub state_counts: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusPayload {
    pub repo_root: String,
    pub state_dir: String,
    pub scheduler: ReadinessSnapshot,
    pub runtime_summary: RuntimeSummary,
    pub workers: Vec<RuntimeRecord>,
    pub task_board: Vec<BoardRow>,
    #[serde(serialize_with = "serialize_updates")]
    pub updates: Vec<UpdateEntry>,
}

fn serialize_updates<S>(entries: &[UpdateEntry], serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    #[derive(Serialize)]
    struct Row<'a> {
        timestamp: &'a str,
        agent: &'a str,
        task_id: &'a str,
        status: &'a str,
        summary: &'a str,
    }
    serializer.collect_seq(entries.iter().map(|e| Row {
        timestamp: &e.timestamp,
        agent: &e.agent,
        task_id: &e.task_id,
        status: &e.status,
        summary: &e.summary,
    }))
}

pub fn build_status(
    session: &Session,
    trigger: &str,
    max_start: Option<u32>,
) -> Result<StatusPayload, EngineError> {
    let ctx = &session.ctx;
    let board = Board::open_or_create(&ctx.todo_file, &ctx.todo)?;
    let spec_index = SpecIndex::new(&session.primary.root);

    let lock_rows = load_lock_inventory(&ctx.lock_dir);
    let records = load_runtime_records(&ctx.orch_dir, &ctx.lock_dir);

    let scheduler = evaluate(
        ctx,
        &board,
        &spec_index,
        &records,
        &lock_rows,
        trigger,
        max_start,
    )?;

    let counts = summarize(&records);
    let runtime_summary = RuntimeSummary {
        total: records.len(),
        active: records.iter().filter(|r| r.state.is_active()).count(),
        stale: records.iter().filter(|r| r.stale).count(),
        state_counts: counts,
    };

    let task_board = board
        .list_tasks()
        .into_iter()
        .map(|row| {
            let scope = ctx
                .owners_by_key
                .get(&owner_key(&row.owner))
                .cloned()
                .unwrap_or_default();
            BoardRow {
                task_id: row.id,
                title: row.title,
                owner: row.owner,
                scope,
                deps: row.deps,
                status: row.status,
            }
        })
        .collect();

    Ok(StatusPayload {
        repo_root: session.primary.root.display().to_string(),
        state_dir: ctx.state_dir.display().to_string(),
        scheduler,
        runtime_summary,
        workers: records,
        task_board,
        updates: read_recent(&ctx.updates_file, UPDATES_LIMIT),
    })
}

pub fn render_text(payload: &StatusPayload) -> String {
    let mut lines = Vec::new();
    lines.push(format!("Repo: {}", payload.repo_root));
    lines.push(format!("State dir: {}", payload.state_dir));
    lines.push(format!("Trigger: {}", payload.scheduler.trigger));
    lines.push(format!("Max start: {}", payload.scheduler.max_start));
    lines.push(String::new());

    lines.push(format!(
        "Scheduler: ready={} excluded={}",
        payload.scheduler.ready_tasks.len(),
        payload.scheduler.excluded_tasks.len()
    ));
    for task in &payload.scheduler.ready_tasks {
        lines.push(format!(
            "  [READY] {} owner={} deps={}",
            task.task_id, task.owner, task.deps
        ));
    }
    for task in &payload.scheduler.excluded_tasks {
        lines.push(format!(
            "  [EXCLUDED] {} owner={} reason={} source={}",
            task.task_id,
            task.owner,
            task.reason.as_str(),
            task.source
        ));
    }

    lines.push(String::new());
    lines.push(format!(
        "Runtime: total={} active={} stale={}",
        payload.runtime_summary.total,
        payload.runtime_summary.active,
        payload.runtime_summary.stale
    ));
    if !payload.runtime_summary.state_counts.is_empty() {
        let states = payload
            .runtime_summary
            .state_counts
            .iter()
            .map(|(state, count)| format!("{state}:{count}"))
            .collect::<Vec<_>>()
            .join(", ");
        lines.push(format!("  states={states}"));
    }

    lines.push(String::new());
    lines.push(format!(
        "Coordination: locks={}",
        payload.scheduler.running_locks.len()
    ));
    for lock in &payload.scheduler.running_locks {
        lines.push(format!(
            "  [LOCK] scope={} owner={} task={}",
            lock.scope, lock.owner, lock.task_id
        ));
    }

    lines.join("\n")
}

pub fn render_json(payload: &StatusPayload) -> String {
    serde_json::to_string_pretty(payload).unwrap_or_else(|err| format!("{{\"error\": \"{err}\"}}"))
}
