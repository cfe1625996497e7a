pub mod cache;
pub mod chunker;
pub mod code_saver;
pub mod filter;
pub mod glossary;
pub mod normalize;
pub mod orchestrator;
pub mod prompt;
pub mod punctuation;
pub mod requester;
pub mod response;
pub mod state;
pub mod task;
pub mod unit;
pub mod validator;

use anyhow::{Context, Result};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::cli::{StatusArgs, TestApiArgs, TranslateArgs};
use crate::config::Config;
use crate::format;
use crate::logging::LOG_FILE;
use cache::{CACHE_DIR, CacheStore};
use chunker::{ChunkPlanner, TokenEstimator};
use glossary::Glossary;
use orchestrator::{Orchestrator, ProgressEvent, RunOptions};
use prompt::PromptBuilder;
use state::RunStateHandle;
use task::{TaskContext, TaskSettings};
use unit::Session;
use validator::ResultValidator;

pub const AUTO_GLOSSARY_FILE: &str = "glossary_auto.txt";

/// Folds command-line flags over the loaded configuration.
pub fn apply_overrides(cfg: &mut Config, args: &TranslateArgs) {
    if let Some(backend) = &args.backend {
        cfg.api.backend = backend.clone();
    }
    if let Some(lang) = &args.lang {
        cfg.translation.target_language = lang.clone();
    }
    if let Some(lang) = &args.source_lang {
        cfg.translation.source_language = lang.clone();
    }
    if let Some(n) = args.concurrency {
        cfg.translation.concurrency = n;
    }
    if let Some(n) = args.token_limit {
        cfg.translation.token_limit = n.max(1);
    }
    if let Some(n) = args.max_rounds {
        cfg.translation.max_rounds = n;
    }
    if let Some(path) = &args.glossary {
        cfg.rules.glossary_file = Some(path.display().to_string());
    }
}

/// `-o`, then `general.output_dir`, then `<input>_translated` beside the input.
pub fn resolve_output(args: &TranslateArgs, cfg: &Config) -> PathBuf {
    if let Some(out) = &args.output {
        return out.clone();
    }
    if let Some(dir) = &cfg.general.output_dir {
        return PathBuf::from(dir);
    }
    let stem = args
        .input
        .file_stem()
        .unwrap_or_default()
        .to_string_lossy()
        .to_string();
    args.input.with_file_name(format!("{}_translated", stem))
}

pub fn log_path(output: &Path) -> PathBuf {
    output.join(CACHE_DIR).join(LOG_FILE)
}

fn load_glossary(cfg: &Config, output: &Path, resume: bool) -> Result<Glossary> {
    let mut glossary = match &cfg.rules.glossary_file {
        Some(path) => Glossary::load(path)
            .with_context(|| format!("Failed to load glossary: {}", path))?,
        None => Glossary::new(),
    };

    let auto = output.join(AUTO_GLOSSARY_FILE);
    if resume && auto.exists() {
        match Glossary::load(&auto) {
            Ok(found) => {
                for entry in found.entries() {
                    if !glossary.entries().iter().any(|e| e.src == entry.src) {
                        glossary.add(entry.clone());
                    }
                }
            }
            Err(e) => tracing::warn!(error = %e, "ignoring unreadable auto glossary"),
        }
    }
    Ok(glossary)
}

/// Shared task state for a run built from `cfg`.
pub fn build_context(
    cfg: &Config,
    glossary: Arc<RwLock<Glossary>>,
    run_state: RunStateHandle,
) -> Result<TaskContext> {
    let requester = Arc::from(requester::build(cfg.backend_config())?);

    let t = &cfg.translation;
    let mut prompt = PromptBuilder::new(&t.source_language, &t.target_language);
    prompt.custom_body = t.custom_prompt.clone();
    prompt.request_glossary = t.auto_glossary;

    let validator = ResultValidator::new(&t.source_language, t.token_limit)
        .with_similarity_cutoff(t.similarity_round_cutoff)
        .with_singleton_retry_threshold(t.singleton_retry_threshold);

    let settings = TaskSettings {
        pre_rules: cfg.rules.pre_rules(),
        post_rules: cfg.rules.post_rules(),
        params: cfg.generation_params(),
        auto_glossary: t.auto_glossary,
        traditional_chinese: t.traditional_chinese,
        request_timeout: Duration::from_secs(cfg.api.request_timeout_secs),
        pause_prompt_tokens: t.pause_prompt_tokens,
        pause: Duration::from_secs(t.pause_secs),
        console_table: cfg.general.batch_table,
    };

    Ok(TaskContext::new(
        requester, prompt, validator, glossary, settings, run_state,
    ))
}

pub fn run(args: TranslateArgs) -> Result<()> {
    let mut cfg = Config::load().unwrap_or_default();
    apply_overrides(&mut cfg, &args);
    let output = resolve_output(&args, &cfg);

    if !args.input.exists() {
        anyhow::bail!("Input path does not exist: {}", args.input.display());
    }

    let adapters = format::adapters();
    let (root, files) = format::collect_files(&args.input, &adapters)?;
    if files.is_empty() {
        println!("{}", "[WARN] No supported files found".yellow());
        return Ok(());
    }
    println!(
        "{}",
        format!("[Translate] Found {} file(s)", files.len()).green()
    );

    let store = Arc::new(CacheStore::new(&output));
    let session = if args.resume && store.exists() {
        let (project, units) = store
            .load_snapshot()
            .context("Failed to load cached run")?;
        println!(
            "{}",
            format!("[Translate] Resuming run {}", project.id).cyan()
        );
        Session { project, units }
    } else {
        Session::new(format::read_all(&root, &files, &adapters)?)
    };

    if session.units.is_empty() {
        println!("{}", "[WARN] No translatable text found".yellow());
        return Ok(());
    }
    println!("  Found {} translatable entries", session.units.len());

    let glossary = Arc::new(RwLock::new(load_glossary(&cfg, &output, args.resume)?));
    let ctx = build_context(&cfg, Arc::clone(&glossary), RunStateHandle::new())?;
    println!(
        "{}",
        format!(
            "[Translate] Using {} ({} -> {})",
            ctx.requester.name(),
            cfg.translation.source_language,
            cfg.translation.target_language
        )
        .cyan()
    );

    let options = RunOptions {
        token_limit: cfg.translation.token_limit,
        concurrency: cfg.translation.concurrency,
        max_rounds: cfg.translation.max_rounds,
        source_language: cfg.translation.source_language.clone(),
        save_interval: Duration::from_secs(cfg.translation.save_interval_secs.max(1)),
    };

    let pb = ProgressBar::new(session.units.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
            .progress_chars("=>-"),
    );
    pb.enable_steady_tick(Duration::from_millis(100));

    let bar = pb.clone();
    let orchestrator = Orchestrator::new(
        ctx,
        ChunkPlanner::new(TokenEstimator::new()),
        Arc::clone(&store),
        session,
        options,
    )
    .with_progress(move |event| match event {
        ProgressEvent::RoundStarted { round, token_limit, .. } => {
            bar.set_message(format!("round {} (limit {})", round + 1, token_limit));
        }
        ProgressEvent::TaskFinished { extras, .. } => {
            bar.set_length(extras.total_lines as u64);
            bar.set_position(extras.completed_lines as u64);
        }
        ProgressEvent::Done(_) | ProgressEvent::Stopped(_) => {}
    });

    let summary = orchestrator.start()?;
    pb.finish_and_clear();

    let units = orchestrator.session().lock().units.clone();
    let written = format::write_all(&root, &output, &units, &adapters)?;

    if cfg.translation.auto_glossary {
        let path = output.join(AUTO_GLOSSARY_FILE);
        if let Err(e) = glossary.read().save(&path) {
            tracing::warn!(error = %e, "failed to save auto glossary");
        }
    }

    let extras = &summary.project.extras;
    if summary.pending == 0 {
        println!(
            "{}",
            format!(
                "[OK] Translated {}/{} lines in {} round(s), {} file(s) -> {}",
                extras.completed_lines,
                extras.total_lines,
                summary.rounds,
                written,
                output.display()
            )
            .green()
        );
    } else {
        println!(
            "{}",
            format!(
                "[WARN] {} line(s) still untranslated after {} round(s); rerun with --continue",
                summary.pending, summary.rounds
            )
            .yellow()
        );
    }
    println!("  Tokens used: {}", extras.tokens_used);

    Ok(())
}

pub fn status(args: StatusArgs) -> Result<()> {
    let store = CacheStore::new(&args.output);
    let (project, units) = store
        .load_snapshot()
        .with_context(|| format!("No cached run in {}", args.output.display()))?;

    let pending = units.iter().filter(|u| u.is_pending()).count();
    let e = &project.extras;
    println!("{}", "[Status]".green());
    println!("  Project:   {}", project.id);
    println!("  Status:    {:?}", project.status);
    println!("  Lines:     {}/{}", e.completed_lines, e.total_lines);
    println!("  Pending:   {}", pending);
    println!(
        "  Tokens:    {} ({} completion)",
        e.tokens_used, e.completion_tokens
    );
    println!("  Elapsed:   {:.1}s", e.elapsed_seconds);

    Ok(())
}

pub fn test_api(args: TestApiArgs) -> Result<()> {
    let mut cfg = Config::load().unwrap_or_default();
    if let Some(backend) = args.backend {
        cfg.api.backend = backend;
    }
    let attempts = cfg.api_keys().len().max(1);

    let ctx = build_context(
        &cfg,
        Arc::new(RwLock::new(Glossary::new())),
        RunStateHandle::new(),
    )?;
    println!(
        "{}",
        format!(
            "[Test] {} request(s) to {}",
            attempts,
            ctx.requester.name()
        )
        .cyan()
    );

    let scratch = std::env::temp_dir().join("tlweave");
    let orchestrator = Orchestrator::new(
        ctx,
        ChunkPlanner::new(TokenEstimator::heuristic()),
        Arc::new(CacheStore::new(scratch)),
        Session::default(),
        RunOptions::default(),
    );
    let report = orchestrator.test_api(attempts)?;

    if report.failed == 0 {
        println!("{}", format!("[OK] {} passed", report.passed).green());
    } else {
        println!(
            "{}",
            format!("[WARN] {} passed, {} failed", report.passed, report.failed).yellow()
        );
    }
    Ok(())
}
