//! Round-based scheduling of translation tasks over a bounded worker pool

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use parking_lot::Mutex;
use rayon::prelude::*;

use super::cache::{CacheStore, SAVE_INTERVAL, SaveTicker};
use super::chunker::{Chunk, ChunkPlanner, round_token_limit};
use super::filter::apply_prefilters;
use super::glossary::Glossary;
use super::state::{RunState, RunStateHandle};
use super::task::{TaskContext, TaskOutcome, TranslationTask};
use super::unit::{ProjectExtras, ProjectStatus, RunProject, Session, UnitStatus};

/// Worker count when neither configuration nor the backend names one.
pub const DEFAULT_CONCURRENCY: usize = 4;

const PROBE_LINE: &str = "Hello.";

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub token_limit: usize,
    /// 0 asks the backend for its capacity
    pub concurrency: usize,
    pub max_rounds: usize,
    pub source_language: String,
    pub save_interval: Duration,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            token_limit: 384,
            concurrency: 0,
            max_rounds: 16,
            source_language: "ja".to_string(),
            save_interval: SAVE_INTERVAL,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    RoundStarted {
        round: usize,
        token_limit: usize,
        chunks: usize,
        pending: usize,
    },
    TaskFinished {
        extras: ProjectExtras,
        pending: usize,
    },
    Done(ProjectExtras),
    Stopped(ProjectExtras),
}

pub type ProgressFn = dyn Fn(&ProgressEvent) + Send + Sync;

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub rounds: usize,
    pub pending: usize,
    pub stopped: bool,
    pub project: RunProject,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApiTestReport {
    pub passed: usize,
    pub failed: usize,
}

/// Fires once a stopping run has drained.
pub struct StopSignal {
    rx: Receiver<()>,
}

impl StopSignal {
    pub fn wait(&self, timeout: Duration) -> bool {
        self.rx.recv_timeout(timeout).is_ok()
    }
}

struct RunClock {
    started: Instant,
    carried: f64,
}

impl RunClock {
    fn elapsed(&self) -> f64 {
        self.carried + self.started.elapsed().as_secs_f64()
    }
}

pub struct Orchestrator {
    ctx: Arc<TaskContext>,
    planner: ChunkPlanner,
    store: Arc<CacheStore>,
    session: Arc<Mutex<Session>>,
    options: RunOptions,
    running: Arc<AtomicBool>,
    on_progress: Option<Box<ProgressFn>>,
}

impl Orchestrator {
    pub fn new(
        ctx: TaskContext,
        planner: ChunkPlanner,
        store: Arc<CacheStore>,
        session: Session,
        options: RunOptions,
    ) -> Self {
        Self {
            ctx: Arc::new(ctx),
            planner,
            store,
            session: Arc::new(Mutex::new(session)),
            options,
            running: Arc::new(AtomicBool::new(false)),
            on_progress: None,
        }
    }

    pub fn with_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(&ProgressEvent) + Send + Sync + 'static,
    {
        self.on_progress = Some(Box::new(callback));
        self
    }

    pub fn session(&self) -> Arc<Mutex<Session>> {
        Arc::clone(&self.session)
    }

    pub fn glossary(&self) -> Arc<parking_lot::RwLock<Glossary>> {
        Arc::clone(&self.ctx.glossary)
    }

    pub fn run_state(&self) -> RunState {
        self.ctx.run_state.get()
    }

    pub fn state_handle(&self) -> RunStateHandle {
        self.ctx.run_state.clone()
    }

    /// Runs rounds until nothing is pending, the round ceiling is hit, or
    /// a stop is requested. Blocks the calling thread.
    pub fn start(&self) -> Result<RunSummary> {
        self.ctx
            .run_state
            .transition(RunState::Translating)
            .map_err(|current| anyhow!("cannot start translation while {}", current))?;
        self.running.store(true, Ordering::SeqCst);

        let result = self.run_rounds();

        if let Err(current) = self.ctx.run_state.transition(RunState::Idle) {
            tracing::warn!(state = %current, "unexpected run state at end of run");
        }
        self.running.store(false, Ordering::SeqCst);
        result
    }

    /// Requests a cooperative stop. In-flight tasks finish; no new round starts.
    pub fn stop(&self) -> Result<StopSignal> {
        self.ctx
            .run_state
            .transition(RunState::Stopping)
            .map_err(|current| anyhow!("cannot stop while {}", current))?;
        tracing::info!("stop requested, draining in-flight tasks");

        let (tx, rx) = mpsc::channel();
        let running = Arc::clone(&self.running);
        thread::spawn(move || {
            while running.load(Ordering::SeqCst) {
                thread::sleep(Duration::from_millis(50));
            }
            let _ = tx.send(());
        });
        Ok(StopSignal { rx })
    }

    /// Sends `attempts` probe requests, one per configured credential.
    pub fn test_api(&self, attempts: usize) -> Result<ApiTestReport> {
        self.ctx
            .run_state
            .transition(RunState::Testing)
            .map_err(|current| anyhow!("cannot test the API while {}", current))?;

        let lines = vec![PROBE_LINE.to_string()];
        let messages = self.ctx.prompt.build(&lines, &[], &Glossary::new());
        let mut report = ApiTestReport::default();
        for attempt in 0..attempts.max(1) {
            let result = self
                .ctx
                .requester
                .request(&messages, 0, &self.ctx.settings.params);
            if result.should_skip || result.result.trim().is_empty() {
                tracing::warn!(attempt, "API probe failed");
                report.failed += 1;
            } else {
                tracing::info!(attempt, reply = %result.result.trim(), "API probe passed");
                report.passed += 1;
            }
        }

        if let Err(current) = self.ctx.run_state.transition(RunState::Idle) {
            tracing::warn!(state = %current, "unexpected run state after API test");
        }
        Ok(report)
    }

    fn concurrency(&self) -> usize {
        if self.options.concurrency > 0 {
            return self.options.concurrency;
        }
        match self.ctx.requester.probe_capacity() {
            Some(n) => {
                tracing::info!(concurrency = n, "using backend-reported capacity");
                n
            }
            None => DEFAULT_CONCURRENCY,
        }
    }

    fn run_rounds(&self) -> Result<RunSummary> {
        let clock = {
            let mut s = self.session.lock();
            let stats = apply_prefilters(&mut s.units, &self.options.source_language);
            s.recount();
            s.project.status = ProjectStatus::Translating;
            tracing::info!(
                total = s.project.extras.total_lines,
                completed = s.project.extras.completed_lines,
                excluded_by_rule = stats.by_rule,
                excluded_by_language = stats.by_language,
                "translation run prepared"
            );
            self.store.save_logged(&s.project, &s.units);
            RunClock {
                started: Instant::now(),
                carried: s.project.extras.elapsed_seconds,
            }
        };

        let ticker = SaveTicker::spawn(
            Arc::clone(&self.store),
            Arc::clone(&self.session),
            self.options.save_interval,
        );

        let workers = self.concurrency();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .build()
            .context("Failed to create worker pool")?;

        let mut rounds = 0;
        for round in 0..self.options.max_rounds {
            if self.ctx.run_state.is_stopping() {
                break;
            }

            let token_limit = round_token_limit(self.options.token_limit, round);
            let (chunks, snapshot) = {
                let mut s = self.session.lock();
                let chunks = self.planner.plan(&s.units, token_limit);
                let snapshot = s.units.clone();
                for idx in chunks.iter().flat_map(|c| c.members.iter()) {
                    s.units[*idx].status = UnitStatus::Translating;
                }
                (chunks, snapshot)
            };
            if chunks.is_empty() {
                break;
            }
            rounds += 1;

            let pending: usize = chunks.iter().map(|c| c.len()).sum();
            tracing::info!(round, token_limit, chunks = chunks.len(), pending, workers, "round started");
            self.emit(&ProgressEvent::RoundStarted {
                round,
                token_limit,
                chunks: chunks.len(),
                pending,
            });

            let ctx = &self.ctx;
            pool.install(|| {
                chunks.par_iter().for_each(|chunk| {
                    let outcome = TranslationTask::new(chunk, &snapshot, round).execute(ctx);
                    merge_outcome(
                        &self.session,
                        chunk,
                        &self.store,
                        self.on_progress.as_deref(),
                        &outcome,
                        &clock,
                    );
                });
            });
        }

        let stopped = self.ctx.run_state.is_stopping();
        let (pending, project) = {
            let mut s = self.session.lock();
            s.recount();
            let pending = s.pending_count();
            let budget_spent = !stopped && rounds == self.options.max_rounds;
            s.project.status = if pending == 0 || budget_spent {
                ProjectStatus::Translated
            } else {
                ProjectStatus::Untranslated
            };
            s.project.extras.elapsed_seconds = clock.elapsed();
            (pending, s.project.clone())
        };

        if !stopped && pending > 0 && rounds == self.options.max_rounds {
            tracing::warn!(
                pending,
                max_rounds = self.options.max_rounds,
                "round limit reached, leaving units untranslated"
            );
        }

        ticker.shutdown();

        if stopped {
            self.emit(&ProgressEvent::Stopped(project.extras.clone()));
        } else {
            self.emit(&ProgressEvent::Done(project.extras.clone()));
        }

        Ok(RunSummary {
            rounds,
            pending,
            stopped,
            project,
        })
    }

    fn emit(&self, event: &ProgressEvent) {
        if let Some(cb) = &self.on_progress {
            cb(event);
        }
    }
}

fn merge_outcome(
    session: &Mutex<Session>,
    chunk: &Chunk,
    store: &CacheStore,
    on_progress: Option<&ProgressFn>,
    outcome: &TaskOutcome,
    clock: &RunClock,
) {
    let (extras, pending) = {
        let mut s = session.lock();
        for (idx, unit) in &outcome.updates {
            if let Some(slot) = s.units.get_mut(*idx) {
                *slot = unit.clone();
            }
        }
        for idx in &chunk.members {
            if let Some(unit) = s.units.get_mut(*idx) {
                if unit.status == UnitStatus::Translating {
                    unit.status = UnitStatus::Untranslated;
                }
            }
        }
        s.project.credit_lines(outcome.updated_count);
        let extras = &mut s.project.extras;
        extras.tokens_used += outcome.prompt_tokens + outcome.completion_tokens;
        extras.completion_tokens += outcome.completion_tokens;
        extras.elapsed_seconds = clock.elapsed();
        (s.project.extras.clone(), s.pending_count())
    };

    store.request_save();
    if let Some(cb) = on_progress {
        cb(&ProgressEvent::TaskFinished { extras, pending });
    }
}
