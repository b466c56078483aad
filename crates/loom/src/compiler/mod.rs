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

//! IR to executable steps. The rule-based compiler runs first; the model
//! compiler takes over when it fails or when reviewer feedback must be
//! applied. Both outputs go through the same post-processing.

pub mod deterministic;
pub mod dsl;
pub mod generative;
pub mod postprocess;
pub mod validation;

pub use deterministic::compile_deterministic;
pub use dsl::{
    count_steps, ActionStep, Gather, GatherOperation, Scatter, ScatterGatherStep, StepOperation,
    TransformStep, WorkflowStep,
};
pub use generative::GenerativeCompiler;
pub use postprocess::post_process;
pub use validation::{validate_workflow, WorkflowValidation};

use crate::config::CompilationSettings;
use crate::error::{Phase, PipelineError};
use crate::formalization::IntermediateRepresentation;
use crate::llm::RetryPolicy;
use crate::models::GroundedSemanticPlan;
use llm_contracts::LLMAdapter;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompilationStrategy {
    Deterministic,
    Generative,
}

impl CompilationStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompilationStrategy::Deterministic => "deterministic",
            CompilationStrategy::Generative => "generative",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CompiledWorkflow {
    pub workflow: Vec<WorkflowStep>,
    pub strategy: CompilationStrategy,
    /// Set whenever the generative compiler produced the workflow.
    pub fallback_reason: Option<String>,
    pub validation: WorkflowValidation,
}

pub struct CompilerService {
    generative: GenerativeCompiler,
    collapse_threshold: usize,
}

impl CompilerService {
    pub fn new(
        adapter: Arc<dyn LLMAdapter>,
        settings: CompilationSettings,
        policy: RetryPolicy,
    ) -> Self {
        let collapse_threshold = settings.filter_collapse_threshold;
        Self {
            generative: GenerativeCompiler::new(adapter, settings, policy),
            collapse_threshold,
        }
    }

    #[instrument(skip_all, fields(request_id = %request_id))]
    pub async fn compile(
        &self,
        ir: &IntermediateRepresentation,
        grounded: &GroundedSemanticPlan,
        feedback: Option<&str>,
        request_id: &str,
    ) -> Result<CompiledWorkflow, PipelineError> {
        let feedback = feedback.map(str::trim).filter(|f| !f.is_empty());

        let (steps, strategy, fallback_reason) = match feedback {
            Some(feedback) => {
                info!("Reviewer feedback present, compiling with the model");
                let steps = self
                    .generate(ir, grounded, Some(feedback), request_id, None)
                    .await?;
                (
                    steps,
                    CompilationStrategy::Generative,
                    Some("reviewer feedback requires the generative compiler".to_string()),
                )
            }
            None => match compile_deterministic(ir) {
                Ok(steps) => (steps, CompilationStrategy::Deterministic, None),
                Err(err) => {
                    warn!(error = %err, "Deterministic compilation failed, falling back to the model");
                    let reason = format!("deterministic compiler failed: {err}");
                    let steps = self
                        .generate(ir, grounded, None, request_id, Some(&reason))
                        .await?;
                    (steps, CompilationStrategy::Generative, Some(reason))
                }
            },
        };

        let workflow = post_process(steps, self.collapse_threshold);
        let validation = validate_workflow(&workflow);
        if !validation.valid {
            warn!(
                errors = validation.errors.len(),
                strategy = strategy.as_str(),
                "Compiled workflow failed structural validation"
            );
        }
        info!(
            steps = count_steps(&workflow),
            strategy = strategy.as_str(),
            valid = validation.valid,
            "Workflow compiled"
        );
        Ok(CompiledWorkflow {
            workflow,
            strategy,
            fallback_reason,
            validation,
        })
    }

    /// Both strategies failing is terminal.
    async fn generate(
        &self,
        ir: &IntermediateRepresentation,
        grounded: &GroundedSemanticPlan,
        feedback: Option<&str>,
        request_id: &str,
        deterministic_failure: Option<&str>,
    ) -> Result<Vec<WorkflowStep>, PipelineError> {
        match self.generative.compile(ir, grounded, feedback, request_id).await {
            Ok(attempted) => Ok(attempted.value),
            Err(err) => {
                let message = match deterministic_failure {
                    Some(first) => format!("{first}; generative compiler failed: {err}"),
                    None => format!("generative compiler failed: {err}"),
                };
                Err(PipelineError::Compilation {
                    phase: Phase::Compilation,
                    message,
                })
            }
        }
    }
}
