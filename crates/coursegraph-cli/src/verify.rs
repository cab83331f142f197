//! `coursegraph verify`

use anyhow::{anyhow, Context, Result};
use colored::Colorize;
use coursegraph_dsl::{canonicalize, CourseCode};
use coursegraph_ingest_calendar::{parse_calendar, CalendarClient, CalendarError};
use coursegraph_llm_sync::{
    arbiter_from_env, DecisionSink, NdjsonSink, NullSink, Verifier, VerifyConfig, VerifyStats,
};
use coursegraph_storage::{FileStore, RelationshipStore};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

pub struct VerifyArgs {
    pub store: PathBuf,
    pub html: Option<PathBuf>,
    pub departments: Vec<String>,
    pub year: String,
    pub apply: bool,
    pub threshold: Option<f64>,
    pub only_course: Option<String>,
    pub log: Option<PathBuf>,
    pub concurrency: Option<usize>,
    pub no_llm: bool,
    pub config: Option<PathBuf>,
}

/// Config file (or defaults) with command-line overrides applied.
pub fn effective_config(args: &VerifyArgs) -> Result<VerifyConfig> {
    let mut config = match &args.config {
        Some(path) => VerifyConfig::from_path(path)
            .with_context(|| format!("failed to load verify config {}", path.display()))?,
        None => VerifyConfig::default(),
    };

    config.apply |= args.apply;
    if let Some(threshold) = args.threshold {
        config.confidence_threshold = threshold;
    }
    if let Some(concurrency) = args.concurrency {
        config.max_concurrency = concurrency;
    }
    if let Some(raw) = &args.only_course {
        config.only_course =
            Some(canonicalize(raw).ok_or_else(|| anyhow!("not a course code: {raw}"))?);
    }
    if args.no_llm {
        config.arbiter.structuring_enabled = false;
    }
    config.validate()?;
    Ok(config)
}

pub async fn cmd_verify(args: VerifyArgs) -> Result<()> {
    let config = effective_config(&args)?;

    let store = FileStore::open(&args.store)
        .with_context(|| format!("failed to open store {}", args.store.display()))?;
    let store: Arc<dyn RelationshipStore> = Arc::new(store);

    let sink: Arc<dyn DecisionSink> = match &args.log {
        Some(path) => Arc::new(
            NdjsonSink::open(path).with_context(|| format!("failed to open log {}", path.display()))?,
        ),
        None => Arc::new(NullSink),
    };
    let arbiter = Arc::new(arbiter_from_env(config.arbiter)?);

    let batches = load_batches(&args).await?;
    let mut total = VerifyStats::default();
    for (dept, courses) in batches {
        register_courses(store.as_ref(), &courses)?;

        let dept_config = VerifyConfig {
            department: dept.clone().or_else(|| config.department.clone()),
            ..config.clone()
        };
        let verifier = Verifier::new(arbiter.clone(), store.clone(), sink.clone(), dept_config);
        let stats = verifier.verify(courses).await?;

        eprintln!(
            "{} {}: checked {}, updated {}, no change {}, low confidence {}, locked {}, no text {}",
            "ok".green().bold(),
            dept.as_deref().unwrap_or("calendar").bold(),
            stats.checked,
            stats.updated,
            stats.no_change,
            stats.skipped_low_conf,
            stats.skipped_locked,
            stats.missing_prereq_text,
        );
        total += stats;
    }

    if !config.apply {
        eprintln!("{}", "dry run: no changes written (use --apply)".yellow());
    }
    println!("{}", serde_json::to_string_pretty(&total)?);
    Ok(())
}

type Batch = (Option<String>, BTreeMap<CourseCode, String>);

/// One batch for `--html`, one per reachable department otherwise.
async fn load_batches(args: &VerifyArgs) -> Result<Vec<Batch>> {
    if let Some(path) = &args.html {
        let html = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        return Ok(vec![(None, parse_calendar(&html)?)]);
    }

    let client = CalendarClient::new()?;
    let mut batches = Vec::new();
    for dept in &args.departments {
        let dept = dept.trim().to_uppercase();
        match client.fetch_courses(&args.year, &dept).await {
            Ok(courses) => batches.push((Some(dept), courses)),
            Err(CalendarError::NotFound(url)) => {
                tracing::warn!(dept = %dept, url = %url, "no calendar page, skipping department");
            }
            Err(err) if args.departments.len() > 1 => {
                tracing::warn!(dept = %dept, error = %err, "calendar fetch failed, skipping department");
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(batches)
}

/// Every course on a calendar page is a known course, with or without rows.
fn register_courses(store: &dyn RelationshipStore, courses: &BTreeMap<CourseCode, String>) -> Result<()> {
    let codes: Vec<CourseCode> = courses.keys().cloned().collect();
    let created = store
        .ensure_courses(&codes)
        .context("failed to register calendar courses")?;
    if created > 0 {
        tracing::info!(created, "registered new calendar courses");
    }
    Ok(())
}
