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

//! Natural-language to workflow compilation: understand a request, ground its
//! assumptions in sampled data, surface what needs review, formalise to an IR
//! and compile that IR into executable steps.

pub mod ambiguity;
pub mod catalog;
pub mod compiler;
pub mod config;
pub mod error;
pub mod formalization;
pub mod grounding;
pub mod llm;
pub mod logging;
pub mod metadata_source;
pub mod models;
pub mod pipeline;
pub mod understanding;

#[cfg(test)]
pub(crate) mod testing;

pub use ambiguity::{AmbiguityDetector, AmbiguityReport, ReviewItem, ReviewItemKind};
pub use catalog::{ActionDefinition, PluginCatalog, PluginDefinition};
pub use compiler::{CompilationStrategy, CompiledWorkflow, CompilerService, WorkflowStep};
pub use config::LoomConfig;
pub use error::{CompileError, ConfigError, MetadataError, Phase, PipelineError};
pub use formalization::{IRFormalizer, IntermediateRepresentation};
pub use grounding::{DataSampler, FieldMatcher, GroundingEngine};
pub use metadata_source::{fetch_with_timeout, MetadataSource, StaticMetadataSource};
pub use models::*;
pub use pipeline::{
    CompilationOutcome, CompileRequest, GenerationOutcome, PhaseTimings, WorkflowPipeline,
};
pub use understanding::SemanticPlanGenerator;
