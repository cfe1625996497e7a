//! End-to-end runs of the orchestrator against scripted backends

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use tempfile::TempDir;

use tlweave::translate::cache::CacheStore;
use tlweave::translate::chunker::{ChunkPlanner, TokenEstimator};
use tlweave::translate::glossary::Glossary;
use tlweave::translate::orchestrator::{Orchestrator, ProgressEvent, RunOptions};
use tlweave::translate::prompt::{Message, PromptBuilder};
use tlweave::translate::requester::{GenerationParams, RequestResult, Requester};
use tlweave::translate::state::{RunState, RunStateHandle};
use tlweave::translate::task::{TaskContext, TaskSettings};
use tlweave::translate::unit::{ProjectStatus, Session, TranslationUnit, UnitStatus};
use tlweave::translate::validator::ResultValidator;

type Reply = dyn Fn(usize, &serde_json::Map<String, serde_json::Value>) -> Option<String> + Send + Sync;

/// Answers each request from the numbered lines in its user message.
struct Scripted {
    reply: Box<Reply>,
    calls: AtomicUsize,
    penalties: Mutex<Vec<(usize, f32)>>,
    delay: Duration,
}

impl Scripted {
    fn new<F>(reply: F) -> Self
    where
        F: Fn(usize, &serde_json::Map<String, serde_json::Value>) -> Option<String>
            + Send
            + Sync
            + 'static,
    {
        Self {
            reply: Box::new(reply),
            calls: AtomicUsize::new(0),
            penalties: Mutex::new(Vec::new()),
            delay: Duration::ZERO,
        }
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

impl Requester for Scripted {
    fn name(&self) -> &str {
        "scripted"
    }

    fn request(&self, messages: &[Message], round: usize, params: &GenerationParams) -> RequestResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.penalties.lock().push((round, params.frequency_penalty));
        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }

        let user = &messages.last().unwrap().content;
        let body = user.rsplit("\n\n").next().unwrap();
        let lines: serde_json::Map<String, serde_json::Value> = serde_json::from_str(body).unwrap();

        match (self.reply)(round, &lines) {
            Some(result) => RequestResult {
                should_skip: false,
                thinking: String::new(),
                result,
                prompt_tokens: 20,
                completion_tokens: 10,
            },
            None => RequestResult::skipped(),
        }
    }
}

fn translate_all(lines: &serde_json::Map<String, serde_json::Value>) -> serde_json::Map<String, serde_json::Value> {
    lines
        .iter()
        .map(|(k, v)| {
            let n = v.as_str().unwrap().chars().count();
            (k.clone(), serde_json::Value::String(format!("译文{}号", n)))
        })
        .collect()
}

fn to_json(map: serde_json::Map<String, serde_json::Value>) -> String {
    serde_json::Value::Object(map).to_string()
}

struct Harness {
    _dir: TempDir,
    store: Arc<CacheStore>,
    backend: Arc<Scripted>,
    orchestrator: Arc<Orchestrator>,
    events: Arc<Mutex<Vec<ProgressEvent>>>,
}

fn harness(units: Vec<TranslationUnit>, backend: Scripted, options: RunOptions) -> Harness {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(CacheStore::new(dir.path()));
    let backend = Arc::new(backend);

    let ctx = TaskContext::new(
        backend.clone(),
        PromptBuilder::new("English", "Chinese"),
        ResultValidator::new(&options.source_language, options.token_limit),
        Arc::new(RwLock::new(Glossary::new())),
        TaskSettings {
            console_table: false,
            ..Default::default()
        },
        RunStateHandle::new(),
    );

    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    let orchestrator = Orchestrator::new(
        ctx,
        ChunkPlanner::new(TokenEstimator::heuristic()),
        Arc::clone(&store),
        Session::new(units),
        options,
    )
    .with_progress(move |e| sink.lock().push(e.clone()));

    Harness {
        _dir: dir,
        store,
        backend,
        orchestrator: Arc::new(orchestrator),
        events,
    }
}

fn english_units(n: usize) -> Vec<TranslationUnit> {
    (0..n)
        .map(|i| TranslationUnit::new("story.txt", i, &format!("Line number {} is here.", i)))
        .collect()
}

fn options(token_limit: usize, max_rounds: usize) -> RunOptions {
    RunOptions {
        token_limit,
        concurrency: 2,
        max_rounds,
        source_language: "en".to_string(),
        ..Default::default()
    }
}

#[test]
fn test_single_round_translates_everything() {
    let h = harness(
        english_units(10),
        Scripted::new(|_, lines| Some(to_json(translate_all(lines)))),
        options(4096, 16),
    );

    let summary = h.orchestrator.start().unwrap();

    assert_eq!(summary.rounds, 1);
    assert_eq!(summary.pending, 0);
    assert_eq!(summary.project.status, ProjectStatus::Translated);
    assert_eq!(h.backend.calls.load(Ordering::SeqCst), 1);

    let session = h.orchestrator.session();
    let s = session.lock();
    assert!(s.units.iter().all(|u| u.status == UnitStatus::Translated));
    assert_eq!(s.project.extras.completed_lines, 10);
    assert_eq!(s.project.extras.tokens_used, 30);
    assert_eq!(h.orchestrator.run_state(), RunState::Idle);
}

#[test]
fn test_missing_key_is_retried_next_round() {
    let h = harness(
        english_units(5),
        Scripted::new(|round, lines| {
            let mut out = translate_all(lines);
            if round == 0 {
                out.remove("4");
            }
            Some(to_json(out))
        }),
        options(4096, 16),
    );

    let summary = h.orchestrator.start().unwrap();

    assert_eq!(summary.rounds, 2);
    assert_eq!(summary.project.extras.completed_lines, 5);
    let session = h.orchestrator.session();
    assert!(session.lock().units.iter().all(|u| u.status == UnitStatus::Translated));
}

#[test]
fn test_untranslated_singleton_accepted_on_second_round() {
    let units = vec![TranslationUnit::new("a.txt", 0, "foo")];
    let h = harness(
        units,
        Scripted::new(|_, lines| Some(to_json(lines.clone()))),
        options(4096, 16),
    );

    let summary = h.orchestrator.start().unwrap();

    assert_eq!(summary.rounds, 2);
    let session = h.orchestrator.session();
    let s = session.lock();
    assert_eq!(s.units[0].status, UnitStatus::Translated);
    assert_eq!(s.units[0].target, "foo");
    assert_eq!(s.units[0].retry_count, 1);
}

#[test]
fn test_token_limit_halves_each_round() {
    let h = harness(english_units(4), Scripted::new(|_, _| None), options(64, 3));

    let summary = h.orchestrator.start().unwrap();

    assert_eq!(summary.rounds, 3);
    assert_eq!(summary.pending, 4);
    assert_eq!(summary.project.status, ProjectStatus::Translated);
    {
        let session = h.orchestrator.session();
        let s = session.lock();
        assert!(s.units.iter().all(|u| u.status == UnitStatus::Untranslated));
        assert_eq!(s.project.extras.completed_lines, 0);
    }

    let limits: Vec<usize> = h
        .events
        .lock()
        .iter()
        .filter_map(|e| match e {
            ProgressEvent::RoundStarted { token_limit, .. } => Some(*token_limit),
            _ => None,
        })
        .collect();
    assert_eq!(limits, vec![64, 32, 16]);
}

#[test]
fn test_units_are_marked_translating_while_in_flight() {
    let h = harness(
        english_units(3),
        Scripted::new(|_, lines| Some(to_json(translate_all(lines))))
            .with_delay(Duration::from_millis(300)),
        RunOptions {
            concurrency: 1,
            ..options(4096, 4)
        },
    );

    let runner = {
        let orchestrator = Arc::clone(&h.orchestrator);
        thread::spawn(move || orchestrator.start())
    };
    let deadline = Instant::now() + Duration::from_secs(10);
    while h.backend.calls.load(Ordering::SeqCst) == 0 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }

    {
        let session = h.orchestrator.session();
        let s = session.lock();
        assert!(s.units.iter().all(|u| u.status == UnitStatus::Translating));
        assert_eq!(s.pending_count(), 3);
    }

    let summary = runner.join().unwrap().unwrap();
    assert_eq!(summary.pending, 0);
    let session = h.orchestrator.session();
    assert!(session.lock().units.iter().all(|u| u.status == UnitStatus::Translated));
}

#[test]
fn test_stopped_run_with_pending_units_stays_untranslated() {
    let h = harness(
        english_units(6),
        Scripted::new(|_, _| None).with_delay(Duration::from_millis(100)),
        RunOptions {
            concurrency: 1,
            ..options(1, 16)
        },
    );

    let runner = {
        let orchestrator = Arc::clone(&h.orchestrator);
        thread::spawn(move || orchestrator.start())
    };
    let deadline = Instant::now() + Duration::from_secs(10);
    while h.backend.calls.load(Ordering::SeqCst) == 0 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }
    let signal = h.orchestrator.stop().unwrap();
    assert!(signal.wait(Duration::from_secs(10)));

    let summary = runner.join().unwrap().unwrap();
    assert!(summary.stopped);
    assert_eq!(summary.project.status, ProjectStatus::Untranslated);
}

#[test]
fn test_retry_rounds_raise_frequency_penalty() {
    let h = harness(english_units(2), Scripted::new(|_, _| None), options(4096, 2));
    h.orchestrator.start().unwrap();

    let penalties = h.backend.penalties.lock().clone();
    assert!(penalties.iter().any(|&(round, _)| round == 1));
    for (round, penalty) in penalties {
        if round == 0 {
            assert_eq!(penalty, 0.0);
        } else {
            assert!(penalty >= 0.20);
        }
    }
}

#[test]
fn test_excluded_units_are_not_requested() {
    let mut units = english_units(2);
    units.push(TranslationUnit::new("story.txt", 2, "12345"));
    units.push(TranslationUnit::new("story.txt", 3, "https://example.com/x"));
    let h = harness(
        units,
        Scripted::new(|_, lines| {
            assert_eq!(lines.len(), 2);
            Some(to_json(translate_all(lines)))
        }),
        options(4096, 4),
    );

    let summary = h.orchestrator.start().unwrap();

    assert_eq!(summary.pending, 0);
    let session = h.orchestrator.session();
    let s = session.lock();
    assert_eq!(s.units[2].status, UnitStatus::Excluded);
    assert_eq!(s.units[2].target, "12345");
    assert_eq!(s.project.extras.total_lines, 2);
}

#[test]
fn test_stop_drains_and_returns_to_idle() {
    let h = harness(
        english_units(12),
        Scripted::new(|_, lines| Some(to_json(translate_all(lines))))
            .with_delay(Duration::from_millis(100)),
        RunOptions {
            concurrency: 1,
            ..options(1, 16)
        },
    );

    let runner = {
        let orchestrator = Arc::clone(&h.orchestrator);
        thread::spawn(move || orchestrator.start())
    };

    let deadline = Instant::now() + Duration::from_secs(10);
    while h.backend.calls.load(Ordering::SeqCst) == 0 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }
    let signal = h.orchestrator.stop().unwrap();
    assert!(signal.wait(Duration::from_secs(10)));

    let summary = runner.join().unwrap().unwrap();
    assert!(summary.stopped);
    assert!(summary.pending > 0);
    assert!(h.backend.calls.load(Ordering::SeqCst) < 12);
    assert_eq!(h.orchestrator.run_state(), RunState::Idle);
    assert!(matches!(h.events.lock().last(), Some(ProgressEvent::Stopped(_))));
}

#[test]
fn test_second_start_is_rejected_while_running() {
    let h = harness(
        english_units(3),
        Scripted::new(|_, lines| Some(to_json(translate_all(lines))))
            .with_delay(Duration::from_millis(200)),
        RunOptions {
            concurrency: 1,
            ..options(1, 16)
        },
    );

    let runner = {
        let orchestrator = Arc::clone(&h.orchestrator);
        thread::spawn(move || orchestrator.start())
    };
    let deadline = Instant::now() + Duration::from_secs(10);
    while h.orchestrator.run_state() != RunState::Translating && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }

    assert!(h.orchestrator.start().is_err());
    assert!(h.orchestrator.test_api(1).is_err());
    runner.join().unwrap().unwrap();
}

#[test]
fn test_final_snapshot_is_persisted() {
    let h = harness(
        english_units(3),
        Scripted::new(|_, lines| Some(to_json(translate_all(lines)))),
        options(4096, 4),
    );
    h.orchestrator.start().unwrap();

    let (project, units) = h.store.load_snapshot().unwrap();
    assert_eq!(project.status, ProjectStatus::Translated);
    assert_eq!(units.len(), 3);
    assert!(units.iter().all(|u| u.status == UnitStatus::Translated));
}

#[test]
fn test_api_probe_counts_results() {
    let h = harness(
        Vec::new(),
        Scripted::new(|_, lines| Some(to_json(translate_all(lines)))),
        options(4096, 4),
    );

    let report = h.orchestrator.test_api(3).unwrap();
    assert_eq!(report.passed, 3);
    assert_eq!(report.failed, 0);
    assert_eq!(h.orchestrator.run_state(), RunState::Idle);
}
