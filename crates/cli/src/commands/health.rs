//! Agent health command

use anyhow::Result;
use colored::Colorize;
use tabled::Tabled;

use crate::client::ApiClient;
use crate::output::{color_status, print_table, OutputFormat};

#[derive(Tabled)]
struct ComponentRow {
    #[tabled(rename = "Component")]
    name: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Message")]
    message: String,
}

/// Show overall and per-component health
pub async fn show_health(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let result = client.health().await?;

    let mut names: Vec<&String> = result.components.keys().collect();
    names.sort();
    let rows: Vec<ComponentRow> = names
        .into_iter()
        .map(|name| {
            let component = &result.components[name];
            ComponentRow {
                name: name.clone(),
                status: color_status(&component.status),
                message: component.message.clone().unwrap_or_default(),
            }
        })
        .collect();

    if format == OutputFormat::Table {
        println!("Agent: {}\n", color_status(&result.status).bold());
    }
    print_table(rows, &result, format);
    Ok(())
}
