//! Sequential fallback over a ranked list of candidate models.
//!
//! Attempts run strictly one after another in plan order. A recoverable
//! failure (transport, backend envelope, unusable output) moves on to the next
//! candidate after a fixed backoff; a precondition failure ends the walk
//! before any request is sent.

use serde::Serialize;
use std::collections::HashSet;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::RunSettings;
use crate::error::FixError;
use crate::llm::{self, ProviderKind, ProviderRegistry, REMOTE_KEY_ENV};
use crate::runner::{self, Progress, Silent, Spinner, TaskFailure};
use crate::validate;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Candidate {
    pub provider: ProviderKind,
    pub model: String,
}

impl Candidate {
    pub fn new(provider: ProviderKind, model: impl Into<String>) -> Self {
        Self { provider, model: model.into() }
    }
}

/// Primary followed by fallbacks, consumed left to right. Never empty.
#[derive(Debug, Clone)]
pub struct FallbackPlan {
    candidates: Vec<Candidate>,
}

impl FallbackPlan {
    pub fn new(candidates: Vec<Candidate>) -> Result<Self, FixError> {
        if candidates.is_empty() {
            return Err(FixError::NoCandidates);
        }
        Ok(Self { candidates })
    }

    pub fn candidates(&self) -> &[Candidate] {
        &self.candidates
    }
}

/// `primary` then the distinct `fallbacks`, cut to `1 + max_fallbacks`.
pub fn chain(primary: &str, fallbacks: &[String], max_fallbacks: usize) -> Vec<String> {
    let mut out = vec![primary.to_string()];
    for fb in fallbacks {
        if out.len() > max_fallbacks {
            break;
        }
        if !fb.trim().is_empty() && !out.contains(fb) {
            out.push(fb.clone());
        }
    }
    out
}

/// Record of one attempt, kept for the final report.
#[derive(Debug, Clone, Serialize)]
pub struct AttemptResult {
    pub model_id: String,
    pub provider: ProviderKind,
    pub succeeded: bool,
    #[serde(skip)]
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_class: Option<&'static str>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FixOutcome {
    pub model: String,
    pub provider: ProviderKind,
    pub content: String,
    pub attempts: Vec<AttemptResult>,
}

enum State {
    Trying(usize),
    Advancing { index: usize, error: FixError },
    Succeeded(usize, String),
    Exhausted(FixError),
}

pub struct Orchestrator<'a> {
    registry: &'a ProviderRegistry,
    settings: &'a RunSettings,
    credential: Option<String>,
}

impl<'a> Orchestrator<'a> {
    pub fn new(registry: &'a ProviderRegistry, settings: &'a RunSettings, credential: Option<String>) -> Self {
        let credential = credential.filter(|k| !k.trim().is_empty());
        Self { registry, settings, credential }
    }

    /// Walk `plan` until one candidate returns usable output.
    pub async fn run(&self, plan: &FallbackPlan, input: &str) -> Result<FixOutcome, FixError> {
        self.check_preconditions(plan)?;

        let started = Instant::now();
        let candidates = plan.candidates();
        let mut attempts: Vec<AttemptResult> = Vec::with_capacity(candidates.len());
        let mut dead: HashSet<ProviderKind> = HashSet::new();
        let mut state = State::Trying(0);

        loop {
            state = match state {
                State::Trying(index) => {
                    let candidate = &candidates[index];
                    let Some(timeout) = self.attempt_timeout(started) else {
                        let error = budget_error(candidate, self.settings.budget);
                        return Err(self.exhausted(&attempts, error));
                    };
                    info!(model = %candidate.model, provider = %candidate.provider, attempt = index + 1, of = candidates.len(), "trying model");
                    match self.attempt(candidate, input, timeout).await {
                        Ok(content) => {
                            attempts.push(AttemptResult {
                                model_id: candidate.model.clone(),
                                provider: candidate.provider,
                                succeeded: true,
                                content: content.clone(),
                                error_message: None,
                                error_class: None,
                            });
                            State::Succeeded(index, content)
                        }
                        Err(error) if !error.is_recoverable() => return Err(error),
                        Err(error) => {
                            warn!(model = %candidate.model, class = error.class().as_str(), "attempt failed: {error}");
                            if matches!(error, FixError::Unreachable { .. }) {
                                dead.insert(candidate.provider);
                            }
                            attempts.push(AttemptResult {
                                model_id: candidate.model.clone(),
                                provider: candidate.provider,
                                succeeded: false,
                                content: String::new(),
                                error_message: Some(error.to_string()),
                                error_class: Some(error.class().as_str()),
                            });
                            State::Advancing { index, error }
                        }
                    }
                }
                State::Advancing { index, error } => {
                    let next = (index + 1..candidates.len()).find(|i| !dead.contains(&candidates[*i].provider));
                    match next {
                        Some(next) => {
                            let wait = self.backoff(started);
                            debug!(?wait, next = %candidates[next].model, "backing off before fallback");
                            tokio::time::sleep(wait).await;
                            info!(model = %candidates[next].model, "trying fallback model");
                            State::Trying(next)
                        }
                        None => State::Exhausted(self.exhausted(&attempts, error)),
                    }
                }
                State::Succeeded(index, content) => {
                    let winner = &candidates[index];
                    if index > 0 {
                        info!(model = %winner.model, "fallback model succeeded");
                    }
                    return Ok(FixOutcome { model: winner.model.clone(), provider: winner.provider, content, attempts });
                }
                State::Exhausted(error) => return Err(error),
            };
        }
    }

    fn check_preconditions(&self, plan: &FallbackPlan) -> Result<(), FixError> {
        for candidate in plan.candidates() {
            let adapter = self.registry.get(candidate.provider).ok_or_else(|| {
                FixError::InvalidArgs(format!("no adapter configured for {}", candidate.provider))
            })?;
            if adapter.requires_credential() && self.credential.is_none() {
                return Err(FixError::MissingCredential {
                    provider: candidate.provider.name().to_string(),
                    env_var: REMOTE_KEY_ENV.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Per-attempt deadline clipped to what is left of the budget; `None`
    /// once the budget is spent.
    fn attempt_timeout(&self, started: Instant) -> Option<Duration> {
        match self.settings.budget {
            None => Some(self.settings.attempt_timeout),
            Some(budget) => {
                let left = budget.saturating_sub(started.elapsed());
                (!left.is_zero()).then(|| left.min(self.settings.attempt_timeout))
            }
        }
    }

    fn backoff(&self, started: Instant) -> Duration {
        match self.settings.budget {
            None => self.settings.backoff,
            Some(budget) => self.settings.backoff.min(budget.saturating_sub(started.elapsed())),
        }
    }

    fn exhausted(&self, attempts: &[AttemptResult], last_error: FixError) -> FixError {
        let last_model = last_error
            .model()
            .map(str::to_string)
            .or_else(|| attempts.last().map(|a| a.model_id.clone()))
            .unwrap_or_default();
        FixError::Exhausted { attempts: attempts.len(), last_model, last_error: Box::new(last_error) }
    }

    fn progress_for(&self, candidate: &Candidate) -> Box<dyn Progress> {
        if self.settings.show_progress {
            Box::new(Spinner::new(format!("Processing via {} ({})", candidate.provider, candidate.model)))
        } else {
            Box::new(Silent)
        }
    }

    /// One request/response cycle. The request body and the response body
    /// live only inside this call.
    async fn attempt(&self, candidate: &Candidate, input: &str, timeout: Duration) -> Result<String, FixError> {
        let adapter = self
            .registry
            .get(candidate.provider)
            .ok_or_else(|| FixError::InvalidArgs(format!("no adapter configured for {}", candidate.provider)))?;
        let provider = candidate.provider.name().to_string();
        let wire = adapter.build_request(&candidate.model, &self.settings.prompt, input);

        let work = {
            let adapter = adapter.clone();
            let model = candidate.model.clone();
            let credential = self.credential.clone();
            async move { adapter.send(&model, wire, credential.as_deref(), timeout).await }
        };
        let mut progress = self.progress_for(candidate);
        let raw = match runner::run(work, timeout, progress.as_mut()).await {
            Ok(sent) => sent?,
            Err(TaskFailure::TimedOut(after)) => {
                return Err(FixError::Timeout {
                    provider,
                    model: candidate.model.clone(),
                    after_ms: after.as_millis() as u64,
                });
            }
            Err(TaskFailure::Panicked(message)) => {
                return Err(FixError::Transport { provider, model: candidate.model.clone(), message });
            }
        };

        if !raw.is_success() {
            let message = adapter
                .extract_error(&raw.body)
                .unwrap_or_else(|| llm::preview(raw.body.trim(), 200));
            return Err(FixError::Backend { provider, model: candidate.model.clone(), status: Some(raw.status), message });
        }

        let Some(content) = adapter.extract_content(&raw.body) else {
            let message = adapter
                .extract_error(&raw.body)
                .unwrap_or_else(|| "response carried no content field".to_string());
            return Err(FixError::Backend { provider, model: candidate.model.clone(), status: None, message });
        };

        let rules = &self.settings.validator;
        if validate::is_valid(&content, rules) {
            return Ok(content);
        }
        match validate::check(&content, rules).reason {
            Some(reason) => {
                debug!(model = %candidate.model, reason = reason.as_str(), "rejected output");
                Err(FixError::Quality { provider, model: candidate.model.clone(), reason })
            }
            None => Ok(content),
        }
    }
}

fn budget_error(candidate: &Candidate, budget: Option<Duration>) -> FixError {
    FixError::Timeout {
        provider: candidate.provider.name().to_string(),
        model: candidate.model.clone(),
        after_ms: budget.map(|b| b.as_millis() as u64).unwrap_or(0),
    }
}
