use analysis_core::{ExecutionLogEntry, TokenUsage};
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use uuid::Uuid;

/// Per-batch shared state. Created by the pipeline at the start of a run and
/// dropped with it; every counter is updated atomically.
#[derive(Debug)]
pub struct RunContext {
    batch_id: Uuid,
    started_at: DateTime<Utc>,
    token_budget: Option<u64>,
    prompt_tokens: AtomicU64,
    completion_tokens: AtomicU64,
    model_calls: AtomicUsize,
    fallbacks: AtomicUsize,
    persistence_failures: AtomicUsize,
    /// Attempts whose dimension task was dropped before reporting
    cancelled_attempts: Mutex<Vec<ExecutionLogEntry>>,
}

impl RunContext {
    pub fn new(token_budget: Option<u64>) -> Self {
        Self {
            batch_id: Uuid::new_v4(),
            started_at: Utc::now(),
            token_budget,
            prompt_tokens: AtomicU64::new(0),
            completion_tokens: AtomicU64::new(0),
            model_calls: AtomicUsize::new(0),
            fallbacks: AtomicUsize::new(0),
            persistence_failures: AtomicUsize::new(0),
            cancelled_attempts: Mutex::new(Vec::new()),
        }
    }

    pub fn batch_id(&self) -> Uuid {
        self.batch_id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Pre-call gate for model-backed strategies.
    pub fn budget_available(&self) -> bool {
        match self.token_budget {
            Some(budget) => self.tokens_used() < budget,
            None => true,
        }
    }

    pub fn record_usage(&self, usage: &TokenUsage) {
        self.prompt_tokens
            .fetch_add(usage.prompt_tokens, Ordering::Relaxed);
        self.completion_tokens
            .fetch_add(usage.completion_tokens, Ordering::Relaxed);
        self.model_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fallback(&self) {
        self.fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_persistence_failure(&self) {
        self.persistence_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cancelled(&self, entries: Vec<ExecutionLogEntry>) {
        if let Ok(mut cancelled) = self.cancelled_attempts.lock() {
            cancelled.extend(entries);
        }
    }

    pub fn take_cancelled(&self) -> Vec<ExecutionLogEntry> {
        self.cancelled_attempts
            .lock()
            .map(|mut cancelled| std::mem::take(&mut *cancelled))
            .unwrap_or_default()
    }

    pub fn tokens_used(&self) -> u64 {
        self.prompt_tokens.load(Ordering::Relaxed) + self.completion_tokens.load(Ordering::Relaxed)
    }

    pub fn token_usage(&self) -> TokenUsage {
        TokenUsage {
            prompt_tokens: self.prompt_tokens.load(Ordering::Relaxed),
            completion_tokens: self.completion_tokens.load(Ordering::Relaxed),
        }
    }

    pub fn model_calls(&self) -> usize {
        self.model_calls.load(Ordering::Relaxed)
    }

    pub fn fallbacks(&self) -> usize {
        self.fallbacks.load(Ordering::Relaxed)
    }

    pub fn persistence_failures(&self) -> usize {
        self.persistence_failures.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_unbounded_budget_is_always_available() {
        let ctx = RunContext::new(None);
        ctx.record_usage(&TokenUsage {
            prompt_tokens: 1_000_000,
            completion_tokens: 1_000_000,
        });
        assert!(ctx.budget_available());
    }

    #[test]
    fn test_budget_closes_once_spent() {
        let ctx = RunContext::new(Some(100));
        assert!(ctx.budget_available());
        ctx.record_usage(&TokenUsage {
            prompt_tokens: 60,
            completion_tokens: 40,
        });
        assert!(!ctx.budget_available());
        assert_eq!(ctx.model_calls(), 1);
        assert_eq!(ctx.token_usage().total(), 100);
    }

    #[tokio::test]
    async fn test_counters_are_shared_across_tasks() {
        let ctx = Arc::new(RunContext::new(None));
        let mut handles = Vec::new();
        for _ in 0..16 {
            let ctx = Arc::clone(&ctx);
            handles.push(tokio::spawn(async move {
                ctx.record_fallback();
                ctx.record_usage(&TokenUsage {
                    prompt_tokens: 2,
                    completion_tokens: 1,
                });
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(ctx.fallbacks(), 16);
        assert_eq!(ctx.tokens_used(), 48);
    }
}
