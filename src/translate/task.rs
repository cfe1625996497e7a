//! One request/response cycle over a chunk of units

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use colored::Colorize;
use parking_lot::RwLock;

use super::chunker::Chunk;
use super::code_saver::{CodeGrammar, ProtectedLine};
use super::glossary::Glossary;
use super::normalize::{ReplaceRule, apply_rules, normalize_line, split_sublines};
use super::prompt::{Message, PromptBuilder};
use super::punctuation;
use super::requester::{GenerationParams, Requester};
use super::response::{DecodedResponse, decode};
use super::state::RunStateHandle;
use super::unit::{TranslationUnit, UnitStatus};
use super::validator::{BatchInfo, FailureKind, ResultValidator};
use crate::logging::AUDIT_TARGET;
use crate::utils::truncate_display;

/// Above this many concurrently active tasks the console table is skipped.
pub const CONSOLE_TABLE_LIMIT: usize = 32;

#[derive(Debug, Clone)]
pub struct TaskSettings {
    pub pre_rules: Vec<ReplaceRule>,
    pub post_rules: Vec<ReplaceRule>,
    pub params: GenerationParams,
    pub auto_glossary: bool,
    pub traditional_chinese: bool,
    pub request_timeout: Duration,
    /// 0 disables the courtesy pause
    pub pause_prompt_tokens: u64,
    pub pause: Duration,
    pub console_table: bool,
}

impl Default for TaskSettings {
    fn default() -> Self {
        Self {
            pre_rules: Vec::new(),
            post_rules: Vec::new(),
            params: GenerationParams::default(),
            auto_glossary: false,
            traditional_chinese: false,
            request_timeout: Duration::from_secs(120),
            pause_prompt_tokens: 0,
            pause: Duration::from_secs(0),
            console_table: true,
        }
    }
}

/// Everything tasks of one run share.
pub struct TaskContext {
    pub requester: Arc<dyn Requester>,
    pub prompt: PromptBuilder,
    pub validator: ResultValidator,
    pub glossary: Arc<RwLock<Glossary>>,
    pub settings: TaskSettings,
    pub run_state: RunStateHandle,
    active: AtomicUsize,
}

impl TaskContext {
    pub fn new(
        requester: Arc<dyn Requester>,
        prompt: PromptBuilder,
        validator: ResultValidator,
        glossary: Arc<RwLock<Glossary>>,
        settings: TaskSettings,
        run_state: RunStateHandle,
    ) -> Self {
        Self {
            requester,
            prompt,
            validator,
            glossary,
            settings,
            run_state,
            active: AtomicUsize::new(0),
        }
    }

    pub fn active_tasks(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }
}

struct ActiveGuard<'a>(&'a AtomicUsize);

impl<'a> ActiveGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskOutcome {
    pub accepted: bool,
    pub updated_count: usize,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub failure: Option<FailureKind>,
    /// Replacement unit values, keyed by session index
    pub updates: Vec<(usize, TranslationUnit)>,
}

impl TaskOutcome {
    fn failed(kind: FailureKind) -> Self {
        Self {
            failure: Some(kind),
            ..Default::default()
        }
    }
}

struct Subline {
    /// Position of the owning unit within the chunk
    owner: usize,
    protected: ProtectedLine,
}

pub struct TranslationTask<'a> {
    chunk: &'a Chunk,
    members: Vec<TranslationUnit>,
    context: Vec<String>,
    round: usize,
    dispatched_at: Instant,
}

impl<'a> TranslationTask<'a> {
    /// Snapshots the chunk's units and context from the session list.
    pub fn new(chunk: &'a Chunk, units: &[TranslationUnit], round: usize) -> Self {
        Self {
            chunk,
            members: chunk.members.iter().map(|&i| units[i].clone()).collect(),
            context: chunk
                .context
                .iter()
                .map(|&i| units[i].source.clone())
                .collect(),
            round,
            dispatched_at: Instant::now(),
        }
    }

    /// Overrides the admission time used by the pre-request timeout check.
    pub fn with_dispatch_time(mut self, at: Instant) -> Self {
        self.dispatched_at = at;
        self
    }

    pub fn execute(&self, ctx: &TaskContext) -> TaskOutcome {
        let _guard = ActiveGuard::enter(&ctx.active);

        if ctx.run_state.is_stopping() {
            tracing::debug!(file = %self.chunk.file_path, "task skipped, run is stopping");
            return TaskOutcome::failed(FailureKind::Unknown);
        }

        let sublines = self.prepare(ctx);
        let src: Vec<String> = sublines.iter().map(|s| s.protected.text.clone()).collect();
        let messages = {
            let glossary = ctx.glossary.read();
            ctx.prompt.build(&src, &self.context, &glossary)
        };

        if self.dispatched_at.elapsed() > ctx.settings.request_timeout {
            tracing::warn!(
                file = %self.chunk.file_path,
                waited = ?self.dispatched_at.elapsed(),
                "task expired before its request was sent"
            );
            return TaskOutcome::failed(FailureKind::Unknown);
        }

        let params = ctx.settings.params.for_round(self.round);
        let response = ctx.requester.request(&messages, self.round, &params);
        if response.should_skip {
            tracing::warn!(
                backend = ctx.requester.name(),
                file = %self.chunk.file_path,
                units = self.members.len(),
                "request failed, batch left for the next round"
            );
            return TaskOutcome {
                prompt_tokens: response.prompt_tokens,
                completion_tokens: response.completion_tokens,
                ..TaskOutcome::failed(FailureKind::Unknown)
            };
        }

        if ctx.settings.pause_prompt_tokens > 0
            && response.prompt_tokens >= ctx.settings.pause_prompt_tokens
        {
            tracing::debug!(
                tokens = response.prompt_tokens,
                pause = ?ctx.settings.pause,
                "courtesy pause after large prompt"
            );
            thread::sleep(ctx.settings.pause);
        }

        let decoded = decode(&response.result, ctx.settings.auto_glossary);
        let mut outcome = self.apply(ctx, &sublines, &src, &decoded);
        outcome.prompt_tokens = response.prompt_tokens;
        outcome.completion_tokens = response.completion_tokens;

        self.audit(ctx, &messages, &src, &decoded, &response.thinking, &outcome);
        outcome
    }

    /// Sub-line split, normalization, pre-replacement and code protection.
    fn prepare(&self, ctx: &TaskContext) -> Vec<Subline> {
        let mut sublines = Vec::new();
        for (owner, unit) in self.members.iter().enumerate() {
            let grammar = CodeGrammar::for_format(unit.source_format);
            for raw in split_sublines(&unit.source) {
                let line = apply_rules(&normalize_line(&raw), &ctx.settings.pre_rules);
                sublines.push(Subline {
                    owner,
                    protected: ProtectedLine::protect(&line, grammar),
                });
            }
        }
        sublines
    }

    fn apply(
        &self,
        ctx: &TaskContext,
        sublines: &[Subline],
        src: &[String],
        decoded: &DecodedResponse,
    ) -> TaskOutcome {
        let singleton = self.members.len() == 1;
        let retries = self.members.first().map(|u| u.retry_count).unwrap_or(0);
        let forced = singleton && ctx.validator.overrides_singleton(retries);
        let batch = BatchInfo {
            singleton_retries: singleton.then_some(retries),
        };

        let verdict = ctx
            .validator
            .check(src, &decoded.lines, self.round, batch);

        let flags = match (&verdict.failure, verdict.flags) {
            (Some(kind), None) => {
                let mut outcome = TaskOutcome::failed(*kind);
                if singleton {
                    let mut unit = self.members[0].clone();
                    unit.retry_count += 1;
                    tracing::warn!(
                        failure = %kind,
                        file = %unit.file_path,
                        index = unit.sequence_index,
                        retries = unit.retry_count,
                        "single-line batch rejected"
                    );
                    outcome.updates.push((self.chunk.members[0], unit));
                } else {
                    tracing::info!(
                        failure = %kind,
                        units = self.members.len(),
                        round = self.round,
                        "batch rejected"
                    );
                }
                return outcome;
            }
            (_, Some(flags)) => flags,
            (None, None) => vec![false; src.len()],
        };

        let lines: Vec<Option<String>> = sublines
            .iter()
            .enumerate()
            .map(|(i, sub)| {
                if flags.get(i).copied().unwrap_or(false) {
                    return None;
                }
                let dst = match decoded.lines.get(&i.to_string()) {
                    Some(d) => d.clone(),
                    None if forced => sub.protected.text.clone(),
                    None => return None,
                };
                Some(self.finish_line(ctx, &sub.protected, &dst))
            })
            .collect();

        if ctx.settings.auto_glossary && !decoded.glossary.is_empty() {
            let added = ctx.glossary.write().merge_candidates(&decoded.glossary);
            if added > 0 {
                tracing::info!(added, "glossary entries discovered");
            }
        }

        let mut outcome = TaskOutcome {
            accepted: verdict.failure.is_none(),
            failure: verdict.failure,
            ..Default::default()
        };

        for (owner, unit) in self.members.iter().enumerate() {
            let parts: Option<Vec<String>> = sublines
                .iter()
                .zip(&lines)
                .filter(|(sub, _)| sub.owner == owner)
                .map(|(_, line)| line.clone())
                .collect();

            let mut updated = unit.clone();
            match parts {
                Some(parts) => {
                    updated.target = parts.join("\n");
                    updated.status = UnitStatus::Translated;
                    outcome.updated_count += 1;
                }
                None if singleton => {
                    updated.retry_count += 1;
                    tracing::warn!(
                        failure = ?verdict.failure,
                        file = %updated.file_path,
                        index = updated.sequence_index,
                        retries = updated.retry_count,
                        "single-line batch flagged"
                    );
                }
                None => continue,
            }
            outcome.updates.push((self.chunk.members[owner], updated));
        }

        outcome
    }

    /// Punctuation repair, span reinsertion, post-replacement and script conversion.
    fn finish_line(&self, ctx: &TaskContext, protected: &ProtectedLine, dst: &str) -> String {
        let repaired = punctuation::repair(&protected.text, dst);
        let restored = protected.restore(&repaired);
        let replaced = apply_rules(&restored, &ctx.settings.post_rules);
        if ctx.settings.traditional_chinese {
            zhconv::zhconv(&replaced, zhconv::Variant::ZhHant)
        } else {
            replaced
        }
    }

    fn audit(
        &self,
        ctx: &TaskContext,
        messages: &[Message],
        src: &[String],
        decoded: &DecodedResponse,
        thinking: &str,
        outcome: &TaskOutcome,
    ) {
        let mut rows = String::new();
        for (i, s) in src.iter().enumerate() {
            let d = decoded
                .lines
                .get(&i.to_string())
                .map(String::as_str)
                .unwrap_or("<missing>");
            rows.push_str(&format!("  [{i}] {s}\n   => {d}\n"));
        }
        let glossary: Vec<String> = decoded
            .glossary
            .iter()
            .map(|g| format!("{} = {} | {}", g.src, g.dst, g.info))
            .collect();

        tracing::info!(
            target: AUDIT_TARGET,
            file = %self.chunk.file_path,
            round = self.round,
            failure = ?outcome.failure,
            updated = outcome.updated_count,
            prompt_tokens = outcome.prompt_tokens,
            completion_tokens = outcome.completion_tokens,
            "\n{rows}"
        );
        tracing::debug!(
            target: AUDIT_TARGET,
            prompt = %messages.iter().map(|m| m.content.as_str()).collect::<Vec<_>>().join("\n---\n"),
            thinking = %thinking,
            glossary = ?glossary,
            "request detail"
        );

        if ctx.settings.console_table && ctx.active_tasks() <= CONSOLE_TABLE_LIMIT {
            self.print_table(src, decoded, outcome);
        }
    }

    fn print_table(&self, src: &[String], decoded: &DecodedResponse, outcome: &TaskOutcome) {
        let status = match outcome.failure {
            None => "[OK]".green(),
            Some(kind) => format!("[{}]", kind).yellow(),
        };
        let mut out = format!(
            "{} {} round {} ({} lines, {} units updated)\n",
            status,
            self.chunk.file_path.cyan(),
            self.round,
            src.len(),
            outcome.updated_count
        );
        for (i, s) in src.iter().enumerate() {
            let d = decoded.lines.get(&i.to_string()).map(String::as_str).unwrap_or("");
            out.push_str(&format!(
                "  {:>3} | {} | {}\n",
                i,
                truncate_display(s, 40),
                truncate_display(d, 40).dimmed()
            ));
        }
        print!("{}", out);
    }
}
