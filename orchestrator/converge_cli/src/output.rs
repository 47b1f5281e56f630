//! Output formatting utilities.

use colored::Colorize;
use serde::Serialize;
use tabled::{Table, Tabled};

use converge_core::{BatchResult, HookOutcome, PlanEntry, ReconciliationResult};
use converge_types::ContainerSpecList;

use crate::error::Result;
use crate::OutputFormat;

/// Print a serializable document as JSON or YAML.
fn print_document<T: Serialize + ?Sized>(document: &T, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(document)?),
        OutputFormat::Yaml => println!("{}", serde_yaml_ng::to_string(document)?),
        OutputFormat::Table => {}
    }
    Ok(())
}

/// Print rows as a table.
fn print_table<T: Tabled>(rows: &[T]) {
    if rows.is_empty() {
        println!("{}", "No containers selected.".dimmed());
    } else {
        println!("{}", Table::new(rows));
    }
}

fn hook_cell(outcome: Option<&HookOutcome>) -> String {
    match outcome {
        None => "-".to_string(),
        Some(HookOutcome::Skipped) => "skipped".to_string(),
        Some(HookOutcome::Succeeded) => "ok".to_string(),
        Some(HookOutcome::Failed(_)) => "failed".to_string(),
    }
}

/// Display-friendly reconciliation result for table output.
#[derive(Debug, Tabled)]
pub struct ResultRow {
    #[tabled(rename = "Container")]
    name: String,
    #[tabled(rename = "Pre")]
    pre_hook: String,
    #[tabled(rename = "Decision")]
    decision: String,
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Outcome")]
    outcome: String,
    #[tabled(rename = "Post")]
    post_hook: String,
    #[tabled(rename = "State")]
    state: String,
}

impl From<&ReconciliationResult> for ResultRow {
    fn from(r: &ReconciliationResult) -> Self {
        ResultRow {
            name: r.name.clone(),
            pre_hook: hook_cell(Some(&r.pre_hook)),
            decision: r
                .decision
                .as_ref()
                .map(|d| d.label().to_string())
                .unwrap_or_else(|| "-".to_string()),
            action: r.action_taken.to_string(),
            outcome: match &r.action_outcome {
                converge_core::ActionOutcome::Failed(_) => "failed".to_string(),
                converge_core::ActionOutcome::Unreachable(_) => "unreachable".to_string(),
                other => other.to_string(),
            },
            post_hook: hook_cell(r.post_hook.as_ref()),
            state: r.terminal.to_string(),
        }
    }
}

/// Print the result of an apply run.
pub fn print_batch(batch: &BatchResult, format: OutputFormat) -> Result<()> {
    if !matches!(format, OutputFormat::Table) {
        return print_document(batch, format);
    }

    let rows: Vec<ResultRow> = batch.results.iter().map(ResultRow::from).collect();
    print_table(&rows);

    for failed in batch.failed() {
        if let converge_core::TerminalState::Failed { stage, reason, .. } = &failed.terminal {
            error(&format!("{} ({}): {}", failed.name, stage, reason));
        }
    }
    if !batch.skipped.is_empty() {
        warn(&format!("Not processed after halt: {}", batch.skipped.join(", ")));
    }

    let failed = batch.failed().count();
    if failed == 0 && !batch.halted {
        success(&format!(
            "{} container(s) converged, {} changed",
            batch.results.len(),
            batch.changed_count()
        ));
    } else {
        warn(&format!(
            "{} of {} container(s) failed",
            failed,
            batch.results.len() + batch.skipped.len()
        ));
    }
    Ok(())
}

/// Display-friendly plan entry for table output.
#[derive(Debug, Tabled)]
pub struct PlanRow {
    #[tabled(rename = "Container")]
    name: String,
    #[tabled(rename = "Decision")]
    decision: String,
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Details")]
    details: String,
}

impl From<&PlanEntry> for PlanRow {
    fn from(entry: &PlanEntry) -> Self {
        let details = match (&entry.decision, &entry.error) {
            (_, Some(error)) => error.clone(),
            (Some(converge_core::Decision::Diverges { fields }), None) => fields
                .iter()
                .map(|f| f.as_str())
                .collect::<Vec<_>>()
                .join(", "),
            _ => String::new(),
        };
        PlanRow {
            name: entry.name.clone(),
            decision: entry
                .decision
                .as_ref()
                .map(|d| d.label().to_string())
                .unwrap_or_else(|| "unknown".to_string()),
            action: entry
                .action
                .map(|a| a.to_string())
                .unwrap_or_else(|| "-".to_string()),
            details,
        }
    }
}

pub fn print_plan(entries: &[PlanEntry], format: OutputFormat) -> Result<()> {
    if !matches!(format, OutputFormat::Table) {
        return print_document(entries, format);
    }
    let rows: Vec<PlanRow> = entries.iter().map(PlanRow::from).collect();
    print_table(&rows);
    Ok(())
}

/// Display-friendly declared container for table output.
#[derive(Debug, Serialize, Tabled)]
pub struct SpecRow {
    #[tabled(rename = "Container")]
    name: String,
    #[tabled(rename = "Image")]
    image: String,
    #[tabled(rename = "Pre")]
    pre: String,
    #[tabled(rename = "Post")]
    post: String,
    #[tabled(rename = "Compared")]
    compared: String,
}

pub fn spec_rows(specs: &ContainerSpecList) -> Vec<SpecRow> {
    let path_cell = |p: &Option<std::path::PathBuf>| {
        p.as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "-".to_string())
    };
    specs
        .iter()
        .map(|spec| SpecRow {
            name: spec.name.clone(),
            image: spec.effective_image().unwrap_or_else(|_| spec.image.clone()),
            pre: path_cell(&spec.pre),
            post: path_cell(&spec.post),
            compared: spec
                .compared_fields()
                .iter()
                .map(|f| f.as_str())
                .collect::<Vec<_>>()
                .join(","),
        })
        .collect()
}

pub fn print_specs(specs: &ContainerSpecList, format: OutputFormat) -> Result<()> {
    let rows = spec_rows(specs);
    match format {
        OutputFormat::Table => print_table(&rows),
        _ => print_document(&rows, format)?,
    }
    Ok(())
}

/// Print a success message.
pub fn success(msg: &str) {
    println!("{} {}", "✓".green().bold(), msg);
}

/// Print a warning message.
pub fn warn(msg: &str) {
    println!("{} {}", "!".yellow().bold(), msg);
}

/// Print an error message.
pub fn error(msg: &str) {
    eprintln!("{} {}", "✗".red().bold(), msg);
}
