//! Offline evaluation of a profile against supplied samples
//!
//! Runs one full cycle with in-memory collaborators: nothing touches a
//! cluster, and the resulting status can be saved to feed the next run.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Args;
use optimizer_lib::engine::{CycleOutcome, Decision, Orchestrator};
use optimizer_lib::sources::{MemoryMetricsSource, MemoryProfileStore, MemoryWorkloadStore};
use optimizer_lib::{Profile, ProfileKey, ProfileSpec, ProfileStatus, ScalableWorkload};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tabled::Tabled;
use tokio::sync::watch;

use crate::output::{
    color_action, color_outcome, color_state, format_percent, format_secs, print_info, print_json,
    print_success, print_warning, table, FieldRow, OutputFormat,
};

#[derive(Debug, Args)]
pub struct EvaluateArgs {
    /// Profile document (JSON with metadata, spec and optional status)
    #[arg(long, short)]
    pub profile: PathBuf,

    /// Comma-separated utilization samples in percent, e.g. 70,80
    #[arg(long, short, default_value = "")]
    pub samples: String,

    /// JSON array of workloads the profile targets
    #[arg(long, short)]
    pub workloads: Option<PathBuf>,

    /// Evaluation time (RFC3339), defaults to now
    #[arg(long)]
    pub at: Option<DateTime<Utc>>,

    /// Write the profile with its updated status to this file
    #[arg(long)]
    pub save: Option<PathBuf>,
}

fn default_namespace() -> String {
    "default".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub name: String,
    #[serde(default = "default_namespace")]
    pub namespace: String,
}

/// On-disk shape of a profile, close to the custom resource
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileDocument {
    pub metadata: DocumentMetadata,
    pub spec: ProfileSpec,
    #[serde(default)]
    pub status: ProfileStatus,
}

impl ProfileDocument {
    pub fn into_profile(self) -> Profile {
        let key = ProfileKey::new(self.metadata.namespace, self.metadata.name);
        let mut profile = Profile::new(key, self.spec);
        profile.status = self.status;
        profile
    }

    fn from_profile(profile: &Profile) -> Self {
        Self {
            metadata: DocumentMetadata {
                name: profile.key.name.clone(),
                namespace: profile.key.namespace.clone(),
            },
            spec: profile.spec.clone(),
            status: profile.status.clone(),
        }
    }
}

fn read_file(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}

pub fn load_profile(path: &Path) -> Result<Profile> {
    let raw = read_file(path)?;
    let document: ProfileDocument = serde_json::from_str(&raw)
        .with_context(|| format!("Invalid profile document {}", path.display()))?;
    document.spec.validate().context("Invalid profile spec")?;
    Ok(document.into_profile())
}

pub fn load_workloads(path: &Path) -> Result<Vec<ScalableWorkload>> {
    let raw = read_file(path)?;
    serde_json::from_str(&raw).with_context(|| format!("Invalid workloads file {}", path.display()))
}

/// Parse `"70, 80.5,90"` into samples; blank input means no samples
pub fn parse_samples(raw: &str) -> Result<Vec<f64>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<f64>().with_context(|| format!("Invalid sample {:?}", s)))
        .collect()
}

#[derive(Tabled)]
struct OutcomeRow {
    #[tabled(rename = "Workload")]
    workload: String,
    #[tabled(rename = "Outcome")]
    outcome: String,
    #[tabled(rename = "Detail")]
    detail: String,
}

fn print_decision(decision: &Decision) {
    let mut rows = vec![
        FieldRow::new("Profile", decision.profile.to_string()),
        FieldRow::new("Policy", decision.policy.as_str()),
        FieldRow::new("Average CPU", format_percent(decision.value)),
        FieldRow::new("State", color_state(decision.state())),
        FieldRow::new("Action", color_action(decision.action)),
        FieldRow::new("Requeue after", format_secs(decision.requeue_after.as_secs())),
    ];
    if let Some(record) = &decision.new_action_record {
        rows.push(FieldRow::new("Recorded", record.timestamp.to_rfc3339()));
    }
    println!("{}", table(rows));

    for recommendation in &decision.recommendations {
        print_info(recommendation);
    }

    if !decision.outcomes.is_empty() {
        let rows = decision.outcomes.iter().map(|o| {
            let detail = o.outcome.to_string();
            let detail = detail.split_once(": ").map(|(_, d)| d.to_string()).unwrap_or(detail);
            OutcomeRow {
                workload: o.workload.to_string(),
                outcome: color_outcome(o.outcome.label()),
                detail,
            }
        });
        println!("\n{}", table(rows));
    }
}

pub async fn run(args: EvaluateArgs, format: OutputFormat) -> Result<()> {
    let profile = load_profile(&args.profile)?;
    let key = profile.key.clone();
    let samples = parse_samples(&args.samples)?;
    let workloads = match &args.workloads {
        Some(path) => load_workloads(path)?,
        None => Vec::new(),
    };

    let profiles = Arc::new(MemoryProfileStore::new());
    profiles.insert(profile);
    let workload_store = Arc::new(MemoryWorkloadStore::new());
    for workload in workloads {
        workload_store.insert(workload).await;
    }

    let orchestrator = Orchestrator::new(
        Arc::new(MemoryMetricsSource::with_values(&samples)),
        workload_store,
        profiles.clone(),
    );
    let (_shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let now = args.at.unwrap_or_else(Utc::now);

    let decision = match orchestrator.run_cycle_at(&key, now, &mut shutdown_rx).await? {
        CycleOutcome::Evaluated(decision) => decision,
        CycleOutcome::ProfileGone => anyhow::bail!("profile {} disappeared during evaluation", key),
    };

    if let Some(path) = &args.save {
        let updated = profiles
            .snapshot(&key)
            .context("Evaluated profile missing from store")?;
        let json = serde_json::to_string_pretty(&ProfileDocument::from_profile(&updated))?;
        std::fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;
    }

    match format {
        OutputFormat::Json => print_json(&decision)?,
        OutputFormat::Table => {
            print_decision(&decision);
            if decision.value.is_none() {
                print_warning("No samples supplied; nothing was decided");
            }
            if let Some(path) = &args.save {
                print_success(&format!("Saved updated profile to {}", path.display()));
            }
        }
    }

    Ok(())
}
