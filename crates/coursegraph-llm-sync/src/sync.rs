//! Calendar verification pipeline
//!
//! Checks a batch of (course, prose) pairs against the store and, when told
//! to, rewrites the stored prerequisites:
//!
//! ```text
//!            ┌─ empty prose ───────────────► no_prereq_text
//!            │
//! course ────┼─ resolve ─┬─ no groups ─────► empty_groups
//!            │           ├─ equal stored ──► no_change (+ snapshot)
//!            │           ├─ conf < thresh ─► mismatch_low_conf
//!            │           └─ otherwise ─────► would_update | reconcile
//!            │                                              ├─ complete ─► updated (+ snapshot)
//!            │                                              └─ rows left ► skipped_locked
//! ```
//!
//! Courses run concurrently up to `max_concurrency`. The model call finishes
//! before any write for that course starts, and one course failing never
//! stops the batch.

use crate::arbiter::{Arbiter, ArbiterConfig, Resolution};
use crate::diagnostics::{DecisionRecord, DecisionSink, IssueKind};
use crate::llm::providers::ConfigError;
use anyhow::Context;
use coursegraph_dsl::{CourseCode, PrereqExpression};
use coursegraph_storage::{
    expression_from_rows, groups_equal, reconcile, PrereqSnapshot, RelationshipStore, RetryPolicy,
    StoreError, StoreResult,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::ops::AddAssign;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerifyConfig {
    /// Write changes; otherwise report `would_update` only.
    pub apply: bool,
    pub confidence_threshold: f64,
    pub max_concurrency: usize,
    pub only_course: Option<CourseCode>,
    pub department: Option<String>,
    pub arbiter: ArbiterConfig,
    pub retry: RetryPolicy,
}

impl Default for VerifyConfig {
    fn default() -> Self {
        Self {
            apply: false,
            confidence_threshold: 0.75,
            max_concurrency: 4,
            only_course: None,
            department: None,
            arbiter: ArbiterConfig::default(),
            retry: RetryPolicy::default(),
        }
    }
}

impl VerifyConfig {
    /// Load from a JSON file; absent keys take their defaults.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(ConfigError::Invalid(format!(
                "confidence_threshold must be within [0, 1] (got {})",
                self.confidence_threshold
            )));
        }
        if self.max_concurrency == 0 {
            return Err(ConfigError::Invalid("max_concurrency must be at least 1".to_string()));
        }
        Ok(())
    }
}

// ============================================================================
// Stats
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyStats {
    pub checked: u64,
    /// Applied updates, or would-be updates on a dry run.
    pub updated: u64,
    pub skipped_low_conf: u64,
    pub no_change: u64,
    pub missing_prereq_text: u64,
    pub skipped_locked: u64,
}

impl VerifyStats {
    pub fn merge(&mut self, other: &VerifyStats) {
        self.checked += other.checked;
        self.updated += other.updated;
        self.skipped_low_conf += other.skipped_low_conf;
        self.no_change += other.no_change;
        self.missing_prereq_text += other.missing_prereq_text;
        self.skipped_locked += other.skipped_locked;
    }

    pub fn count(&mut self, outcome: CourseOutcome) {
        self.checked += 1;
        match outcome {
            CourseOutcome::MissingText => self.missing_prereq_text += 1,
            CourseOutcome::EmptyGroups | CourseOutcome::LowConfidence => self.skipped_low_conf += 1,
            CourseOutcome::NoChange => self.no_change += 1,
            CourseOutcome::Updated | CourseOutcome::WouldUpdate => self.updated += 1,
            CourseOutcome::SkippedLocked => self.skipped_locked += 1,
        }
    }
}

impl AddAssign for VerifyStats {
    fn add_assign(&mut self, rhs: Self) {
        self.merge(&rhs);
    }
}

/// How one course ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CourseOutcome {
    MissingText,
    EmptyGroups,
    NoChange,
    LowConfidence,
    Updated,
    WouldUpdate,
    SkippedLocked,
}

// ============================================================================
// Verifier
// ============================================================================

#[derive(Clone)]
pub struct Verifier {
    arbiter: Arc<Arbiter>,
    store: Arc<dyn RelationshipStore>,
    sink: Arc<dyn DecisionSink>,
    config: VerifyConfig,
}

impl Verifier {
    pub fn new(
        arbiter: Arc<Arbiter>,
        store: Arc<dyn RelationshipStore>,
        sink: Arc<dyn DecisionSink>,
        config: VerifyConfig,
    ) -> Self {
        Self {
            arbiter,
            store,
            sink,
            config,
        }
    }

    pub fn config(&self) -> &VerifyConfig {
        &self.config
    }

    /// Verify every course in `courses`, honoring `only_course`.
    pub async fn verify(&self, courses: BTreeMap<CourseCode, String>) -> anyhow::Result<VerifyStats> {
        let known: BTreeSet<CourseCode> = self
            .blocking(|store| store.known_courses())
            .await
            .context("loading known course codes")?
            .into_iter()
            .collect();
        let known = Arc::new(known);

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrency.max(1)));
        let mut tasks = JoinSet::new();

        for (course, raw) in courses {
            if self.config.only_course.as_ref().is_some_and(|only| *only != course) {
                continue;
            }
            let permit = Arc::clone(&semaphore)
                .acquire_owned()
                .await
                .context("verification semaphore closed")?;
            let this = self.clone();
            let known = Arc::clone(&known);
            tasks.spawn(async move {
                let _permit = permit;
                let outcome = this.verify_isolated(course.clone(), raw, known).await;
                (course, outcome)
            });
        }

        let mut stats = VerifyStats::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((course, outcome)) => {
                    tracing::debug!(course = %course, ?outcome, "course verified");
                    stats.count(outcome);
                }
                Err(err) => tracing::error!(error = %err, "verification task failed"),
            }
        }

        tracing::info!(
            department = self.config.department.as_deref().unwrap_or("-"),
            checked = stats.checked,
            updated = stats.updated,
            no_change = stats.no_change,
            skipped_low_conf = stats.skipped_low_conf,
            skipped_locked = stats.skipped_locked,
            missing_prereq_text = stats.missing_prereq_text,
            apply = self.config.apply,
            "verification finished"
        );
        Ok(stats)
    }

    /// [`Self::verify_course`] on its own task, so a panic inside it is
    /// recorded against the course and counted as `skipped_locked`.
    async fn verify_isolated(&self, course: CourseCode, raw: String, known: Arc<BTreeSet<CourseCode>>) -> CourseOutcome {
        let worker = self.clone();
        let target = course.clone();
        let excerpt = raw.clone();
        let handle = tokio::spawn(async move { worker.verify_course(target, &raw, &known).await });

        match handle.await {
            Ok(outcome) => outcome,
            Err(err) => {
                tracing::error!(course = %course, error = %err, "verification task failed");
                self.emit(
                    self.record(&course, IssueKind::SkippedLocked, &excerpt)
                        .with_error(err),
                );
                CourseOutcome::SkippedLocked
            }
        }
    }

    /// Run the pipeline for one course.
    pub async fn verify_course(&self, course: CourseCode, raw: &str, known: &BTreeSet<CourseCode>) -> CourseOutcome {
        let raw = raw.trim();
        if raw.is_empty() {
            self.emit(self.record(&course, IssueKind::NoPrereqText, raw));
            return CourseOutcome::MissingText;
        }

        let resolution = self
            .arbiter
            .resolve(raw, known, self.config.confidence_threshold)
            .await;
        let Resolution { result, source, .. } = &resolution;

        if result.groups.is_empty() {
            self.emit(
                self.record(&course, IssueKind::EmptyGroups, raw)
                    .with_confidence(result.confidence)
                    .with_constraints(&result.constraints)
                    .with_source(*source),
            );
            return CourseOutcome::EmptyGroups;
        }

        let current = match self.stored_expression(&course).await {
            Ok(expr) => expr,
            Err(err) => {
                tracing::warn!(course = %course, error = %err, "could not read stored prerequisites");
                self.emit(
                    self.record(&course, IssueKind::SkippedLocked, raw)
                        .with_confidence(result.confidence)
                        .with_source(*source)
                        .with_error(&err),
                );
                return CourseOutcome::SkippedLocked;
            }
        };

        if groups_equal(&result.groups, &current) {
            self.save_snapshot(&course, raw, &resolution).await;
            return CourseOutcome::NoChange;
        }

        let decision = |issue| {
            self.record(&course, issue, raw)
                .with_confidence(result.confidence)
                .with_constraints(&result.constraints)
                .with_source(*source)
        };

        if result.confidence < self.config.confidence_threshold {
            self.emit(decision(IssueKind::MismatchLowConf).with_groups(current, result.groups.clone()));
            return CourseOutcome::LowConfidence;
        }

        if !self.config.apply {
            tracing::info!(course = %course, confidence = result.confidence, "would update");
            self.emit(decision(IssueKind::WouldUpdate).with_groups(current, result.groups.clone()));
            return CourseOutcome::WouldUpdate;
        }

        let expr = result.groups.clone();
        let target = course.clone();
        let policy = self.config.retry;
        let applied = self
            .blocking(move |store| reconcile(store, &target, &expr, &policy))
            .await;

        match applied {
            Ok(report) if report.is_complete() => {
                self.save_snapshot(&course, raw, &resolution).await;
                tracing::info!(
                    course = %course,
                    deleted = report.deleted.len(),
                    upserted = report.upserted.len(),
                    courses_created = report.courses_created,
                    "updated prerequisites"
                );
                self.emit(decision(IssueKind::Updated).with_groups(current, result.groups.clone()));
                CourseOutcome::Updated
            }
            Ok(report) => {
                let after = self.stored_expression(&course).await.unwrap_or(current);
                let first_error = report.skipped.first().map(|row| row.error.clone());
                let mut record = decision(IssueKind::SkippedLocked)
                    .with_groups(after, result.groups.clone())
                    .with_skipped_rows(report.skipped);
                if let Some(err) = first_error {
                    record = record.with_error(err);
                }
                self.emit(record);
                CourseOutcome::SkippedLocked
            }
            Err(err) => {
                tracing::warn!(course = %course, error = %err, "reconcile failed");
                let after = self.stored_expression(&course).await.unwrap_or(current);
                self.emit(
                    decision(IssueKind::SkippedLocked)
                        .with_groups(after, result.groups.clone())
                        .with_error(&err),
                );
                CourseOutcome::SkippedLocked
            }
        }
    }

    fn record(&self, course: &CourseCode, issue: IssueKind, raw: &str) -> DecisionRecord {
        let dept = self
            .config
            .department
            .as_deref()
            .unwrap_or_else(|| course.department());
        DecisionRecord::new(course.clone(), issue, raw).with_dept(Some(dept))
    }

    fn emit(&self, record: DecisionRecord) {
        self.sink.record(&record);
    }

    async fn stored_expression(&self, course: &CourseCode) -> StoreResult<PrereqExpression> {
        let course = course.clone();
        let rows = self.blocking(move |store| store.rows_for(&course)).await?;
        Ok(expression_from_rows(&rows))
    }

    async fn save_snapshot(&self, course: &CourseCode, raw: &str, resolution: &Resolution) {
        let snapshot = PrereqSnapshot::new(raw, resolution.result.clone());
        let target = course.clone();
        if let Err(err) = self
            .blocking(move |store| store.put_snapshot(&target, snapshot))
            .await
        {
            tracing::warn!(course = %course, error = %err, "failed to store prerequisite snapshot");
        }
    }

    /// Run a synchronous store call off the async workers.
    async fn blocking<T, F>(&self, op: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&dyn RelationshipStore) -> StoreResult<T> + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || op(store.as_ref()))
            .await
            .map_err(|err| StoreError::Backend(format!("store task failed: {err}")))?
    }
}
