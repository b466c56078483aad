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

mod cli;

use anyhow::{bail, Context, Result};
use clap::Parser;
use cli::{Cli, Commands};
use llm_contracts::LLMAdapter;
use llm_providers::ProviderAdapter;
use loom::{
    CompileRequest, EnhancedPrompt, LoomConfig, MetadataSource, PluginCatalog,
    StaticMetadataSource, WorkflowPipeline,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let args = Cli::parse();
    init_tracing(args.debug, args.log_json);

    let mut config = match &args.config {
        Some(path) => LoomConfig::from_path(path)?,
        None => LoomConfig::default(),
    };
    config.apply_env_overrides();
    config.validate()?;
    let catalog = load_catalog(args.catalog.as_deref(), &config)?;

    match args.command.clone() {
        Commands::Generate { prompt, metadata } => {
            let prompt: EnhancedPrompt = read_json(&prompt)?;
            let source: Arc<dyn MetadataSource> = match metadata {
                Some(path) => Arc::new(StaticMetadataSource::from_path(&path)?),
                None => Arc::new(StaticMetadataSource::default()),
            };
            let pipeline = WorkflowPipeline::new(adapter(&config)?, config, catalog, source);
            let outcome = pipeline.generate(prompt).await?;
            info!(
                request_id = %outcome.request_id,
                must_confirm = outcome.ambiguity_report.must_confirm.len(),
                "Generation finished"
            );
            write_output(args.out.as_deref(), &outcome)?;
        }
        Commands::Compile { request } => {
            let request: CompileRequest = read_json(&request)?;
            let source: Arc<dyn MetadataSource> = Arc::new(StaticMetadataSource::default());
            let pipeline = WorkflowPipeline::new(adapter(&config)?, config, catalog, source);
            let outcome = pipeline.compile(request).await?;
            info!(
                request_id = %outcome.request_id,
                strategy = outcome.strategy.as_str(),
                valid = outcome.validation.valid,
                "Compilation finished"
            );
            write_output(args.out.as_deref(), &outcome)?;
        }
        Commands::DefaultAction { service } => {
            let Some(action) = catalog.default_action(&service) else {
                bail!("{service} has no read-only action in the catalog");
            };
            write_output(args.out.as_deref(), action)?;
        }
    }
    Ok(())
}

fn init_tracing(debug: bool, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if debug {
            EnvFilter::new("debug,reqwest=info,hyper=info,h2=info,hyper_util=info,rustls=info")
        } else {
            EnvFilter::new("info,reqwest=warn,hyper=warn,h2=warn,hyper_util=warn,rustls=warn")
        }
    });
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

fn adapter(config: &LoomConfig) -> Result<Arc<dyn LLMAdapter>> {
    let adapter = ProviderAdapter::from_settings(&config.llm.primary, config.llm.fallback.as_ref())
        .context("failed to initialise the LLM provider")?;
    Ok(Arc::new(adapter))
}

fn load_catalog(flag: Option<&Path>, config: &LoomConfig) -> Result<PluginCatalog> {
    let path = flag
        .map(Path::to_path_buf)
        .or_else(|| config.catalog_path.as_ref().map(PathBuf::from));
    match path {
        Some(path) => Ok(PluginCatalog::from_path(&path)?),
        None => {
            info!("No plugin catalog configured, formalisation is unscoped");
            Ok(PluginCatalog::default())
        }
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("failed to parse {}", path.display()))
}

fn write_output<T: Serialize + ?Sized>(out: Option<&Path>, value: &T) -> Result<()> {
    let rendered = serde_json::to_string_pretty(value)?;
    match out {
        Some(path) => std::fs::write(path, rendered)
            .with_context(|| format!("failed to write {}", path.display()))?,
        None => println!("{rendered}"),
    }
    Ok(())
}
