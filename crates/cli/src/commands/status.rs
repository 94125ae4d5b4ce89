//! Agent status command

use anyhow::Result;
use colored::Colorize;
use serde_json::json;
use tabled::Tabled;
use watch_lib::{HealthResponse, RunReport};

use super::check::print_report;
use crate::client::ApiClient;
use crate::output::{color_status, print_json, print_table, print_warning, OutputFormat};

/// Row for the components table
#[derive(Tabled)]
struct ComponentRow {
    #[tabled(rename = "Component")]
    name: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Message")]
    message: String,
}

/// Show agent health and the most recent run
pub async fn show_status(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let (_, health): (_, HealthResponse) = client.get_lenient("healthz").await?;
    let last_run: Option<RunReport> = client.get_optional("runs/last").await?;

    match format {
        OutputFormat::Json => print_json(&json!({
            "health": health,
            "last_run": last_run,
        })),
        OutputFormat::Table => {
            println!("{} {}", "Agent:".bold(), color_status(health.status.as_str()));
            println!();

            let mut rows: Vec<ComponentRow> = health
                .components
                .iter()
                .map(|(name, component)| ComponentRow {
                    name: name.clone(),
                    status: color_status(component.status.as_str()),
                    message: component.message.clone().unwrap_or_default(),
                })
                .collect();
            rows.sort_by(|a, b| a.name.cmp(&b.name));
            print_table(rows);
            println!();

            match last_run {
                Some(report) => {
                    println!(
                        "{} {} ({} ms)",
                        "Last run:".bold(),
                        report.finished_at.format("%Y-%m-%d %H:%M:%S UTC"),
                        report.elapsed_ms()
                    );
                    print_report(&report);
                }
                None => print_warning("No run has completed yet"),
            }
            Ok(())
        }
    }
}
