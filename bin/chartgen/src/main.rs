// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2024 Jonathan Lee
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License version 3
// as published by the Free Software Foundation.
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.
// See the GNU Affero General Public License for more details.
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see https://www.gnu.org/licenses/.

mod anthropic;
mod dataset;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::json;
use sleet::{ChartPipeline, ChartRequest, PipelineConfig, PipelineDeps};
use stele::{AttemptLedger, QueryPool, QueryPoolConfig, SqliteLedger, SqliteStore};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::anthropic::AnthropicGenerator;

#[derive(Parser, Debug, Clone)]
#[command(name = "chartgen", about = "Generate a chart specification from a CSV file")]
struct Cli {
    /// CSV file with a header row.
    #[arg(long)]
    csv: PathBuf,

    #[arg(long)]
    intent: String,

    /// Table name for the imported rows; defaults to the file stem.
    #[arg(long)]
    table: Option<String>,

    #[arg(long)]
    dataset_id: Option<String>,

    /// Pipeline settings in TOML.
    #[arg(long, env = "CHARTGEN_CONFIG")]
    config: Option<PathBuf>,

    /// SQLite file for the attempt ledger.
    #[arg(long, env = "CHARTGEN_LEDGER")]
    ledger: Option<String>,

    #[arg(long, default_value_t = 5)]
    max_connections: usize,

    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!(error = %e, "chartgen failed");
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let config = match &cli.config {
        Some(path) => PipelineConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => PipelineConfig::default(),
    }
    .with_env_overrides()?;

    let table_name = cli.table.clone().unwrap_or_else(|| {
        cli.csv
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("dataset")
            .to_string()
    });
    let dataset_id = cli
        .dataset_id
        .clone()
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let table = dataset::load_csv(&cli.csv)?;
    let store = SqliteStore::in_memory().await?;
    let imported = store
        .import_rows(&dataset_id, &table_name, &table.columns, &table.rows)
        .await?;
    info!(table = %table_name, rows = imported, columns = table.columns.len(), "Dataset imported");

    let ledger: Option<Arc<dyn AttemptLedger>> = match &cli.ledger {
        Some(path) => Some(Arc::new(SqliteLedger::connect(path).await?)),
        None => None,
    };
    let pool = QueryPool::new(
        Arc::new(store),
        QueryPoolConfig {
            max_connections: cli.max_connections,
            ..Default::default()
        },
    )?;
    let generator = Arc::new(AnthropicGenerator::from_env()?);

    let pipeline = ChartPipeline::new(
        PipelineDeps {
            generator,
            pool,
            ledger,
        },
        config,
    )?;

    match pipeline
        .run(ChartRequest::new(cli.intent, dataset_id, table_name))
        .await
    {
        Ok(response) => {
            println!("{}", serde_json::to_string_pretty(&response)?);
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            let report = json!({
                "error": e.to_string(),
                "stage": e.stage,
                "kind": e.kind,
                "attempts": e.attempts,
                "processing_steps": e.partial.processing_steps,
                "attempt_counts": e.partial.attempt_count,
                "generation_id": e.partial.generation_id,
            });
            eprintln!("{}", serde_json::to_string_pretty(&report)?);
            Ok(ExitCode::FAILURE)
        }
    }
}
