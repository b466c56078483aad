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

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Understand a request, ground it in sampled data and report what needs review.
    Generate {
        /// Enhanced prompt as JSON.
        #[arg(long)]
        prompt: PathBuf,
        /// Plugin key to metadata map (JSON or YAML) used in place of live sampling.
        #[arg(long)]
        metadata: Option<PathBuf>,
    },
    /// Formalise and compile a reviewed plan into workflow steps.
    Compile {
        /// Compile request as JSON: enhanced_prompt, grounded_plan, decisions, feedback.
        #[arg(long)]
        request: PathBuf,
    },
    /// Show the read action a service is sampled through.
    DefaultAction {
        #[arg(long)]
        service: String,
    },
}

#[derive(Parser, Debug, Clone)]
#[command(name = "loom")]
#[command(about = "Turn natural-language workflow requests into validated workflow steps")]
pub struct Cli {
    /// Pipeline configuration (YAML). Built-in defaults when omitted.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
    /// Plugin catalog (YAML). Overrides `catalog_path` from the configuration.
    #[arg(long, global = true)]
    pub catalog: Option<PathBuf>,
    /// Emit logs as JSON lines.
    #[arg(long, global = true, default_value_t = false)]
    pub log_json: bool,
    #[arg(long, global = true, default_value_t = false)]
    pub debug: bool,
    /// Write the result here instead of stdout.
    #[arg(long, global = true)]
    pub out: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Commands,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_flags_follow_the_subcommand() {
        let cli = Cli::try_parse_from([
            "loom",
            "generate",
            "--prompt",
            "prompt.json",
            "--log-json",
            "--catalog",
            "plugins.yml",
        ])
        .unwrap();
        assert!(cli.log_json);
        assert_eq!(cli.catalog, Some(PathBuf::from("plugins.yml")));
        assert!(matches!(cli.command, Commands::Generate { metadata: None, .. }));
    }

    #[test]
    fn default_action_needs_a_service() {
        assert!(Cli::try_parse_from(["loom", "default-action"]).is_err());
    }
}
