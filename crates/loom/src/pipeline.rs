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

//! The two request/response stages: `generate` (understand, sample, ground,
//! classify) and `compile` (apply decisions, formalise, compile). Nothing is
//! held between them.

use crate::ambiguity::{AmbiguityDetector, AmbiguityReport};
use crate::catalog::PluginCatalog;
use crate::compiler::{CompilationStrategy, CompilerService, WorkflowStep, WorkflowValidation};
use crate::config::LoomConfig;
use crate::error::{Phase, PipelineError};
use crate::formalization::{flatten_decisions, prune_disabled, IRFormalizer, IntermediateRepresentation};
use crate::grounding::GroundingEngine;
use crate::llm::RetryPolicy;
use crate::logging::{log_phase_completed, log_phase_failed, log_phase_started};
use crate::metadata_source::{fetch_with_timeout, MetadataSource};
use crate::models::{
    DataSourceMetadata, EnhancedPrompt, GroundedSemanticPlan, HumanDecisions, ResolvedOverride,
    SemanticPlan,
};
use crate::understanding::SemanticPlanGenerator;
use llm_contracts::LLMAdapter;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, instrument, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PhaseTiming {
    pub phase: Phase,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PhaseTimings {
    pub phases: Vec<PhaseTiming>,
    pub total_ms: u64,
}

impl PhaseTimings {
    fn record(&mut self, phase: Phase, elapsed: Duration) {
        let elapsed_ms = elapsed.as_millis() as u64;
        self.total_ms += elapsed_ms;
        self.phases.push(PhaseTiming { phase, elapsed_ms });
    }

    pub fn elapsed_ms(&self, phase: Phase) -> Option<u64> {
        self.phases
            .iter()
            .find(|t| t.phase == phase)
            .map(|t| t.elapsed_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationOutcome {
    pub request_id: String,
    pub semantic_plan: SemanticPlan,
    pub grounded_plan: GroundedSemanticPlan,
    pub ambiguity_report: AmbiguityReport,
    pub metadata_sources: Vec<DataSourceMetadata>,
    pub timings: PhaseTimings,
    pub warnings: Vec<String>,
}

/// Everything the second stage needs; the client sends it back after review.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompileRequest {
    pub enhanced_prompt: EnhancedPrompt,
    pub grounded_plan: GroundedSemanticPlan,
    #[serde(default)]
    pub decisions: HumanDecisions,
    #[serde(default)]
    pub feedback: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompilationOutcome {
    pub request_id: String,
    pub ir: IntermediateRepresentation,
    pub overrides: Vec<ResolvedOverride>,
    pub workflow: Vec<WorkflowStep>,
    pub strategy: CompilationStrategy,
    pub fallback_reason: Option<String>,
    pub validation: WorkflowValidation,
    pub timings: PhaseTimings,
}

pub struct WorkflowPipeline {
    config: LoomConfig,
    catalog: Arc<PluginCatalog>,
    metadata: Arc<dyn MetadataSource>,
    generator: SemanticPlanGenerator,
    grounding: GroundingEngine,
    detector: AmbiguityDetector,
    formalizer: IRFormalizer,
    compiler: CompilerService,
}

impl WorkflowPipeline {
    pub fn new(
        adapter: Arc<dyn LLMAdapter>,
        config: LoomConfig,
        catalog: PluginCatalog,
        metadata: Arc<dyn MetadataSource>,
    ) -> Self {
        let catalog = Arc::new(catalog);
        let policy = RetryPolicy::from_settings(&config.llm);
        info!(
            plugins = catalog.plugins.len(),
            max_attempts = policy.max_attempts,
            "Workflow pipeline initialised"
        );
        Self {
            generator: SemanticPlanGenerator::new(
                adapter.clone(),
                config.understanding.clone(),
                policy.clone(),
            ),
            grounding: GroundingEngine::new(config.grounding.clone()),
            detector: AmbiguityDetector::new(config.ambiguity.clone()),
            formalizer: IRFormalizer::new(
                adapter.clone(),
                config.formalization.clone(),
                policy.clone(),
                catalog.clone(),
            ),
            compiler: CompilerService::new(adapter, config.compilation.clone(), policy),
            catalog,
            metadata,
            config,
        }
    }

    pub fn catalog(&self) -> &PluginCatalog {
        &self.catalog
    }

    #[instrument(skip_all, fields(services = prompt.specifics.services_involved.len()))]
    pub async fn generate(&self, prompt: EnhancedPrompt) -> Result<GenerationOutcome, PipelineError> {
        let request_id = Uuid::new_v4().to_string();
        let missing = prompt.missing_fields();
        if !missing.is_empty() {
            let err = PipelineError::invalid_input(
                Phase::Understanding,
                format!("missing required fields: {}", missing.join(", ")),
            );
            log_phase_failed(&request_id, &err);
            return Err(err);
        }

        let mut timings = PhaseTimings::default();
        let mut warnings = Vec::new();

        log_phase_started(Phase::Understanding, &request_id);
        let started = Instant::now();
        let (generation, (metadata_sources, sampling_warnings)) = tokio::join!(
            self.generator.generate(&prompt, &request_id),
            self.sample_metadata(&prompt.specifics.services_involved)
        );
        let generation = generation.inspect_err(|err| log_phase_failed(&request_id, err))?;
        timings.record(Phase::Understanding, started.elapsed());
        log_phase_completed(Phase::Understanding, &request_id, started.elapsed());
        warnings.extend(generation.warnings);
        warnings.extend(sampling_warnings);

        log_phase_started(Phase::Grounding, &request_id);
        let started = Instant::now();
        let grounded_plan = self.grounding.ground(&generation.plan, &metadata_sources);
        let ambiguity_report = self.detector.detect(&generation.plan, &grounded_plan, &prompt);
        timings.record(Phase::Grounding, started.elapsed());
        log_phase_completed(Phase::Grounding, &request_id, started.elapsed());

        info!(
            request_id = %request_id,
            grounding_confidence = grounded_plan.grounding_confidence,
            overall_confidence = ambiguity_report.overall_confidence,
            must_confirm = ambiguity_report.must_confirm.len(),
            blocking = grounded_plan.has_blocking_errors(),
            "Generation stage finished"
        );

        Ok(GenerationOutcome {
            request_id,
            semantic_plan: generation.plan,
            grounded_plan,
            ambiguity_report,
            metadata_sources,
            timings,
            warnings,
        })
    }

    #[instrument(skip_all, fields(has_feedback = request.feedback.is_some()))]
    pub async fn compile(&self, request: CompileRequest) -> Result<CompilationOutcome, PipelineError> {
        let request_id = Uuid::new_v4().to_string();
        let result = self.compile_inner(request, &request_id).await;
        if let Err(err) = &result {
            log_phase_failed(&request_id, err);
        }
        result
    }

    async fn compile_inner(
        &self,
        request: CompileRequest,
        request_id: &str,
    ) -> Result<CompilationOutcome, PipelineError> {
        let CompileRequest {
            enhanced_prompt,
            grounded_plan,
            decisions,
            feedback,
        } = request;

        let missing = enhanced_prompt.missing_fields();
        if !missing.is_empty() {
            return Err(PipelineError::invalid_input(
                Phase::Formalization,
                format!("missing required fields: {}", missing.join(", ")),
            ));
        }

        let grounded = prune_disabled(
            &grounded_plan,
            &decisions.disabled_assumptions,
            self.config.grounding.skip_threshold,
        );
        if grounded.has_blocking_errors() && !decisions.acknowledge_blocking_errors {
            let codes: Vec<&str> = grounded
                .grounding_errors
                .iter()
                .filter(|e| e.blocking)
                .map(|e| e.code.as_str())
                .collect();
            return Err(PipelineError::Blocked {
                phase: Phase::Grounding,
                message: format!(
                    "grounded plan has unacknowledged blocking errors: {}",
                    codes.join(", ")
                ),
            });
        }

        let overrides = flatten_decisions(&decisions);
        let mut timings = PhaseTimings::default();

        log_phase_started(Phase::Formalization, request_id);
        let started = Instant::now();
        let ir = self
            .formalizer
            .formalize(&grounded, &enhanced_prompt, &overrides, request_id)
            .await?;
        timings.record(Phase::Formalization, started.elapsed());
        log_phase_completed(Phase::Formalization, request_id, started.elapsed());

        log_phase_started(Phase::Compilation, request_id);
        let started = Instant::now();
        let compiled = self
            .compiler
            .compile(&ir, &grounded, feedback.as_deref(), request_id)
            .await?;
        timings.record(Phase::Compilation, started.elapsed());
        log_phase_completed(Phase::Compilation, request_id, started.elapsed());

        Ok(CompilationOutcome {
            request_id: request_id.to_string(),
            ir,
            overrides,
            workflow: compiled.workflow,
            strategy: compiled.strategy,
            fallback_reason: compiled.fallback_reason,
            validation: compiled.validation,
            timings,
        })
    }

    /// Samples every involved service through its default read action.
    pub async fn sample_metadata(&self, services: &[String]) -> (Vec<DataSourceMetadata>, Vec<String>) {
        let mut sources = Vec::new();
        let mut warnings = Vec::new();
        let params = Value::Object(Map::new());
        for service in services {
            let Some(action) = self.catalog.default_action(service) else {
                warn!(service = %service, "No read-only action to sample");
                warnings.push(format!("no read-only action to sample {service}"));
                continue;
            };
            match fetch_with_timeout(
                self.metadata.as_ref(),
                service,
                &action.name,
                &params,
                self.config.metadata.timeout(),
            )
            .await
            {
                Some(metadata) => sources.push(metadata),
                None => warnings.push(format!("no metadata available for {service}")),
            }
        }
        (sources, warnings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata_source::StaticMetadataSource;
    use crate::testing::ScriptedAdapter;

    fn pipeline(adapter: Arc<ScriptedAdapter>) -> WorkflowPipeline {
        WorkflowPipeline::new(
            adapter,
            LoomConfig::default(),
            PluginCatalog::default(),
            Arc::new(StaticMetadataSource::default()),
        )
    }

    #[tokio::test]
    async fn empty_request_fails_before_any_call() {
        let adapter = Arc::new(ScriptedAdapter::with_texts(Vec::<String>::new()));
        let err = pipeline(adapter.clone())
            .generate(EnhancedPrompt::new(" "))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidInput { phase: Phase::Understanding, .. }));
        assert_eq!(adapter.calls(), 0);
    }

    #[tokio::test]
    async fn services_without_a_catalog_entry_are_reported() {
        let adapter = Arc::new(ScriptedAdapter::with_texts(Vec::<String>::new()));
        let (sources, warnings) = pipeline(adapter)
            .sample_metadata(&["gmail".to_string()])
            .await;
        assert!(sources.is_empty());
        assert_eq!(warnings, vec!["no read-only action to sample gmail".to_string()]);
    }

    #[test]
    fn timings_accumulate() {
        let mut timings = PhaseTimings::default();
        timings.record(Phase::Formalization, Duration::from_millis(12));
        timings.record(Phase::Compilation, Duration::from_millis(3));
        assert_eq!(timings.total_ms, 15);
        assert_eq!(timings.elapsed_ms(Phase::Compilation), Some(3));
        assert_eq!(timings.elapsed_ms(Phase::Understanding), None);
    }
}
