//! Compute a vertical resize without a profile

use anyhow::{Context, Result};
use clap::Args;
use optimizer_lib::engine::{compute_resize, ResizeBounds};
use optimizer_lib::{CpuQuantity, Thresholds};
use serde::Serialize;

use crate::output::{print_json, table, FieldRow, OutputFormat};

#[derive(Debug, Args)]
pub struct ResizeArgs {
    /// Current cpu request, e.g. 500m or 1.5
    #[arg(long)]
    pub current: String,

    /// Observed utilization in percent of the current request
    #[arg(long)]
    pub observed: f64,

    /// Lower utilization threshold in percent
    #[arg(long, default_value_t = 30)]
    pub min: i32,

    /// Upper utilization threshold in percent
    #[arg(long, default_value_t = 70)]
    pub max: i32,

    /// Never go below this request
    #[arg(long)]
    pub min_cpu: Option<String>,

    /// Never go above this request
    #[arg(long)]
    pub max_cpu: Option<String>,
}

#[derive(Debug, Serialize)]
struct ResizeResult {
    current: CpuQuantity,
    observed_percent: f64,
    target_percent: f64,
    recommended: CpuQuantity,
}

fn parse_quantity(raw: &str, what: &str) -> Result<CpuQuantity> {
    raw.parse().with_context(|| format!("Invalid {} {:?}", what, raw))
}

fn compute(args: &ResizeArgs) -> Result<ResizeResult> {
    let current = parse_quantity(&args.current, "current request")?;
    let bounds = ResizeBounds::new(
        args.min_cpu.as_deref().map(|q| parse_quantity(q, "min cpu")).transpose()?,
        args.max_cpu.as_deref().map(|q| parse_quantity(q, "max cpu")).transpose()?,
    );
    let thresholds = Thresholds::new(args.min, args.max);
    let recommended = compute_resize(args.observed, current, &thresholds, &bounds)?;

    Ok(ResizeResult {
        current,
        observed_percent: args.observed,
        target_percent: thresholds.midpoint(),
        recommended,
    })
}

pub fn run(args: ResizeArgs, format: OutputFormat) -> Result<()> {
    let result = compute(&args)?;
    match format {
        OutputFormat::Json => print_json(&result)?,
        OutputFormat::Table => {
            let rows = vec![
                FieldRow::new("Current request", result.current.to_string()),
                FieldRow::new("Observed", format!("{:.2}%", result.observed_percent)),
                FieldRow::new("Target", format!("{:.2}%", result.target_percent)),
                FieldRow::new("Recommended request", result.recommended.to_string()),
            ];
            println!("{}", table(rows));
        }
    }
    Ok(())
}
