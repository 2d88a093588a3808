//! Worker prompt rendering.
//!
//! The prompt is the only contract the worker sees, so the lifecycle rules
//! are spelled out in full: the task ends through `task complete` and nothing
//! else, and DONE means delivered files, not a summary.

use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerPromptInputs<'a> {
    pub agent: &'a str,
    pub scope: &'a str,
    pub task_id: &'a str,
    pub title: &'a str,
    pub worktree: &'a Path,
    pub state_dir: &'a Path,
    pub repo_root: &'a Path,
    pub cli_path: &'a Path,
    pub spec_rel_path: &'a str,
    pub goal_summary: &'a str,
    pub in_scope_summary: &'a str,
    pub acceptance_summary: &'a str,
    pub trigger: &'a str,
}

pub fn render_worker_prompt(inputs: &WorkerPromptInputs<'_>) -> String {
    let WorkerPromptInputs {
        agent,
        scope,
        task_id,
        title,
        worktree,
        state_dir,
        repo_root,
        cli_path,
        spec_rel_path,
        goal_summary,
        in_scope_summary,
        acceptance_summary,
        trigger,
    } = inputs;

    let cli = cli_path.display();
    let state = state_dir.display();

    format!(
        "You are {agent}, working task {task_id} ({title}) in scope {scope}.\n\
\n\
Workspace:\n\
- Worktree (your working directory): {}\n\
- Primary repository: {}\n\
- State directory: {state}\n\
- Task spec: {spec_rel_path}\n\
- Trigger: {trigger}\n\
\n\
Task summary:\n\
- Goal: {goal_summary}\n\
- In scope: {in_scope_summary}\n\
- Acceptance: {acceptance_summary}\n\
\n\
Read the full task spec before writing code. Work only inside your worktree.\n\
\n\
Lifecycle contract (non-negotiable):\n\
1. Implement the task and commit your deliverables in this worktree.\n\
2. When acceptance criteria are met, flip the board row with:\n\
   {cli} --repo {} --state-dir {state} task update {agent} {task_id} DONE \"<one-line summary>\"\n\
   then commit the board change (e.g. `chore: mark {task_id} done`).\n\
3. Finish ONLY via:\n\
   {cli} --repo {} --state-dir {state} task complete {agent} {scope} {task_id} --summary \"<one-line summary>\"\n\
4. Never call task lock/unlock or edit lock files yourself; the orchestrator\n\
   owns coordination state.\n\
5. Never mark DONE without delivered, committed files, and never substitute a\n\
   generic summary for real work.\n",
        worktree.display(),
        repo_root.display(),
        repo_root.display(),
        repo_root.display(),
    )
}
