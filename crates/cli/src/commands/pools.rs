//! Pool inspection and reconfiguration commands

use anyhow::Result;
use colored::Colorize;
use tabled::Tabled;

use crate::client::{
    ApiClient, PoolConfigUpdate, PoolDetailResponse, PoolListResponse, PoolStats, PoolSummary,
    RefreshResponse,
};
use crate::output::{
    color_status, color_usage, format_capacity, print_info, print_json, print_success,
    print_table, print_warning, OutputFormat,
};

/// Row for pools table
#[derive(Tabled)]
struct PoolRow {
    #[tabled(rename = "Pool")]
    pool_id: String,
    #[tabled(rename = "Core")]
    core: String,
    #[tabled(rename = "Max")]
    max: String,
    #[tabled(rename = "Active")]
    active: String,
    #[tabled(rename = "Queue")]
    queue: String,
    #[tabled(rename = "Policy")]
    policy: String,
    #[tabled(rename = "Overflow")]
    overflow: String,
    #[tabled(rename = "Completed")]
    completed: String,
}

impl From<&PoolSummary> for PoolRow {
    fn from(summary: &PoolSummary) -> Self {
        match &summary.stats {
            Some(stats) => Self {
                pool_id: summary.pool_id.clone(),
                core: stats.core_pool_size.to_string(),
                max: stats.maximum_pool_size.to_string(),
                active: color_usage(stats.active_count, Some(stats.maximum_pool_size)),
                queue: color_usage(stats.queue_size, stats.queue_capacity),
                policy: stats.overflow_policy.clone(),
                overflow: stats.overflow_count.to_string(),
                completed: stats.completed_task_count.to_string(),
            },
            None => Self {
                pool_id: summary.pool_id.clone(),
                core: "-".to_string(),
                max: "-".to_string(),
                active: "-".to_string(),
                queue: "-".to_string(),
                policy: color_status("terminated"),
                overflow: "-".to_string(),
                completed: "-".to_string(),
            },
        }
    }
}

/// List every pool hosted by the agent
pub async fn list_pools(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let result: PoolListResponse = client.get("api/v1/pools").await?;

    let rows: Vec<PoolRow> = result.pools.iter().map(PoolRow::from).collect();
    print_table(rows, &result, format);

    if format == OutputFormat::Table && result.total > 0 {
        println!("\nTotal: {} pools", result.total);
    }
    Ok(())
}

/// Show declared configuration and live stats of one pool
pub async fn get_pool(client: &ApiClient, pool_id: &str, format: OutputFormat) -> Result<()> {
    let path = format!("api/v1/pools/{}", pool_id);
    let result: PoolDetailResponse = client.get(&path).await?;

    if format == OutputFormat::Json {
        print_json(&result);
        return Ok(());
    }

    let config = &result.config;
    println!("{}", "Pool Details".bold());
    println!("{}", "=".repeat(50));
    println!("Pool:              {}", config.pool_id.cyan());
    println!("Queue:             {} (capacity {})", config.queue_kind, format_capacity(config.queue_capacity));
    println!("Overflow policy:   {}", config.overflow_policy);
    println!("Keep-alive:        {}s", config.keep_alive_secs);
    println!("Core timeout:      {}", config.allow_core_thread_timeout);
    println!();

    println!("{}", "Alarms".bold());
    if config.alarm.enable {
        println!("  Queue threshold:  {}%", config.alarm.queue_threshold);
        println!("  Active threshold: {}%", config.alarm.active_threshold);
        println!("  Cooldown:         {}m", config.notify.interval_minutes);
        if !config.notify.receives.is_empty() {
            println!("  Receivers:        {}", config.notify.receives.join(", "));
        }
    } else {
        println!("  {}", "disabled".yellow());
    }
    println!();

    match (&result.stats, &result.error) {
        (Some(stats), _) => print_stats(stats),
        (None, Some(error)) => print_warning(&format!("No live stats: {}", error)),
        (None, None) => print_warning("No live stats"),
    }
    Ok(())
}

fn print_stats(stats: &PoolStats) {
    println!("{}", "Live".bold());
    println!("  Core / max:       {} / {}", stats.core_pool_size, stats.maximum_pool_size);
    println!("  Workers:          {} (largest {})", stats.pool_size, stats.largest_pool_size);
    println!("  Active:           {}", color_usage(stats.active_count, Some(stats.maximum_pool_size)));
    println!("  Queued:           {}", color_usage(stats.queue_size, stats.queue_capacity));
    println!("  Completed tasks:  {}", stats.completed_task_count);
    println!("  Overflowed tasks: {}", stats.overflow_count);
}

/// Push a partial configuration to one pool
pub async fn update_pool(
    client: &ApiClient,
    pool_id: &str,
    update: PoolConfigUpdate,
    format: OutputFormat,
) -> Result<()> {
    if update.is_empty() {
        anyhow::bail!("Nothing to update; pass at least one setting");
    }

    let path = format!("api/v1/pools/{}/config", pool_id);
    let result: RefreshResponse = client.put(&path, &update).await?;

    if format == OutputFormat::Json {
        print_json(&result);
        return Ok(());
    }

    if result.changes.is_empty() {
        print_info(&format!("Pool {} already has this configuration", result.pool_id.cyan()));
        return Ok(());
    }

    print_success(&format!("Pool {} reconfigured", result.pool_id.cyan()));
    for change in &result.changes {
        println!("  {}: {} => {}", change.field, change.old.dimmed(), change.new.bold());
    }
    Ok(())
}
