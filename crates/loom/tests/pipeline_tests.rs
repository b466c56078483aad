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

mod common;

use common::*;
use loom::compiler::{post_process, WorkflowStep};
use loom::{
    CompilationStrategy, CompileRequest, GroundingErrorCode, HumanDecisions, Phase, PipelineError,
    StaticMetadataSource,
};
use serde_json::json;

#[tokio::test]
async fn generate_grounds_content_field_through_its_description() {
    let llm = MockLLM::new([plan_json(json!([content_assumption()]))]);
    let metadata = StaticMetadataSource::default().with_source("gmail", gmail_metadata());
    let outcome = pipeline(llm.clone(), metadata)
        .generate(prompt(&["gmail"]))
        .await
        .unwrap();

    let result = outcome.grounded_plan.result_for("a1").unwrap();
    assert!(result.validated);
    assert_eq!(result.resolved_value.as_deref(), Some("snippet"));
    assert_eq!(result.validation_method, "description");
    assert!(result.confidence > 0.0 && result.confidence <= 1.0);
    assert_eq!(outcome.metadata_sources.len(), 1);
    assert_eq!(outcome.metadata_sources[0].plugin_key.as_deref(), Some("gmail"));
    assert!(!outcome.grounded_plan.has_blocking_errors());
    assert!(outcome.timings.elapsed_ms(Phase::Grounding).is_some());
    assert_eq!(llm.calls(), 1);
}

#[tokio::test]
async fn missing_metadata_skips_and_blocks() {
    let llm = MockLLM::new([plan_json(json!([content_assumption()]))]);
    let outcome = pipeline(llm, StaticMetadataSource::default())
        .generate(prompt(&["gmail"]))
        .await
        .unwrap();

    let grounded = &outcome.grounded_plan;
    let result = grounded.result_for("a1").unwrap();
    assert!(result.skipped);
    assert!(!result.validated);
    assert_eq!(result.confidence, 0.0);
    assert_eq!(grounded.grounding_confidence, 0.0);
    assert!(grounded.all_assumptions_skipped);
    assert!(grounded
        .grounding_errors
        .iter()
        .any(|e| e.code == GroundingErrorCode::InsufficientValidation && e.blocking));
    assert!(outcome
        .warnings
        .contains(&"no metadata available for gmail".to_string()));
    assert!(!outcome.ambiguity_report.must_confirm.is_empty());
}

#[tokio::test]
async fn unacknowledged_blocking_errors_stop_compilation() {
    let llm = MockLLM::new(Vec::<String>::new());
    let err = pipeline(llm.clone(), StaticMetadataSource::default())
        .compile(CompileRequest {
            enhanced_prompt: prompt(&["gmail", "slack"]),
            grounded_plan: grounded_plan(true),
            decisions: HumanDecisions::default(),
            feedback: None,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::Blocked { phase: Phase::Grounding, .. }));
    assert!(err.to_string().contains("insufficient_validation"));
    assert_eq!(llm.calls(), 0);
}

#[tokio::test]
async fn disabling_the_skipped_assumption_unblocks_compilation() {
    let llm = MockLLM::new([ir_json("contains", &["invoice"])]);
    let decisions = HumanDecisions {
        disabled_assumptions: vec!["a1".into()],
        ..Default::default()
    };
    let outcome = pipeline(llm, StaticMetadataSource::default())
        .compile(CompileRequest {
            enhanced_prompt: prompt(&["gmail", "slack"]),
            grounded_plan: grounded_plan(true),
            decisions,
            feedback: None,
        })
        .await
        .unwrap();
    assert!(outcome
        .overrides
        .iter()
        .any(|o| o.key == "assumption.a1" && o.value == "disabled"));
    assert_eq!(outcome.ir.overrides, outcome.overrides);
}

#[tokio::test]
async fn deterministic_compilation_needs_only_the_formalisation_call() {
    let llm = MockLLM::new([ir_json("contains", &["invoice"])]);
    let outcome = pipeline(llm.clone(), StaticMetadataSource::default())
        .compile(CompileRequest {
            enhanced_prompt: prompt(&["gmail", "slack"]),
            grounded_plan: grounded_plan(false),
            decisions: HumanDecisions::default(),
            feedback: None,
        })
        .await
        .unwrap();

    assert_eq!(llm.calls(), 1);
    assert_eq!(outcome.strategy, CompilationStrategy::Deterministic);
    assert_eq!(outcome.fallback_reason, None);
    assert_eq!(outcome.ir.data_sources[0].action, "search_emails");
    assert!(outcome.validation.valid, "{:?}", outcome.validation.errors);

    let ids: Vec<_> = outcome.workflow.iter().map(|s| s.id().to_string()).collect();
    assert_eq!(ids, vec!["step1", "step2", "step3"]);
    let WorkflowStep::Action(notify) = &outcome.workflow[2] else {
        panic!("expected delivery action");
    };
    assert_eq!(notify.params["text"], "{{step2.data}}");
    assert!(outcome.timings.elapsed_ms(Phase::Compilation).is_some());
}

#[tokio::test]
async fn twelve_keyword_clauses_collapse_and_stay_collapsed() {
    let keywords = [
        "invoice", "receipt", "bill", "payment", "remittance", "statement", "overdue", "due",
        "balance", "credit", "refund", "charge",
    ];
    let llm = MockLLM::new([ir_json("contains", &keywords)]);
    let outcome = pipeline(llm, StaticMetadataSource::default())
        .compile(CompileRequest {
            enhanced_prompt: prompt(&["gmail", "slack"]),
            grounded_plan: grounded_plan(false),
            decisions: HumanDecisions::default(),
            feedback: None,
        })
        .await
        .unwrap();

    let WorkflowStep::Transform(filter) = &outcome.workflow[1] else {
        panic!("expected filter");
    };
    let condition = filter.config["condition"].as_str().unwrap();
    assert_eq!(
        condition,
        "['invoice', 'receipt', 'bill', 'payment', 'remittance', 'statement', 'overdue', 'due', \
         'balance', 'credit', 'refund', 'charge'].some(k => [item.snippet].some(f => \
         String(f ?? '').toLowerCase().includes(k)))"
    );

    let again = post_process(outcome.workflow.clone(), 10);
    assert_eq!(again, outcome.workflow);
}

#[tokio::test]
async fn deterministic_failure_falls_back_to_the_generative_compiler() {
    let generated = json!([
        {"type": "action", "id": "fetch", "plugin": "gmail", "action": "search_emails"},
        {"type": "transform", "id": "big", "operation": "filter", "input": "{{fetch.data}}",
         "config": {"condition": "Number(item.size) > 1000"}},
        {"type": "action", "id": "tell", "plugin": "slack", "action": "post_message",
         "params": {"channel": "#finance", "text": "{{big.data}}"}}
    ])
    .to_string();
    let llm = MockLLM::new([ir_json("greater_than", &["large"]), generated]);
    let outcome = pipeline(llm.clone(), StaticMetadataSource::default())
        .compile(CompileRequest {
            enhanced_prompt: prompt(&["gmail", "slack"]),
            grounded_plan: grounded_plan(false),
            decisions: HumanDecisions::default(),
            feedback: None,
        })
        .await
        .unwrap();

    assert_eq!(llm.calls(), 2);
    assert_eq!(outcome.strategy, CompilationStrategy::Generative);
    assert!(outcome
        .fallback_reason
        .as_deref()
        .unwrap()
        .contains("numeric value"));
    let compile_prompt = &llm.prompts()[1];
    assert!(compile_prompt.contains("\"greater_than\""));
    assert!(compile_prompt.contains("snippet"));
    assert!(outcome.validation.valid);
}

#[tokio::test]
async fn malformed_formalisation_is_retried_with_the_failure_reason() {
    let llm = MockLLM::new(["I think the IR is roughly...".to_string(), ir_json("contains", &["invoice"])]);
    let outcome = pipeline(llm.clone(), StaticMetadataSource::default())
        .compile(CompileRequest {
            enhanced_prompt: prompt(&["gmail", "slack"]),
            grounded_plan: grounded_plan(false),
            decisions: HumanDecisions::default(),
            feedback: None,
        })
        .await
        .unwrap();
    assert_eq!(outcome.strategy, CompilationStrategy::Deterministic);
    assert_eq!(llm.calls(), 2);
    assert!(llm.prompts()[1].contains("IMPORTANT: attempt 1 of 2 failed"));
}

#[tokio::test]
async fn out_of_catalog_action_is_a_terminal_schema_violation() {
    let ir = ir_json("contains", &["invoice"]).replace("post_message", "launch_rocket");
    let llm = MockLLM::new([ir.clone(), ir]);
    let err = pipeline(llm.clone(), StaticMetadataSource::default())
        .compile(CompileRequest {
            enhanced_prompt: prompt(&["gmail", "slack"]),
            grounded_plan: grounded_plan(false),
            decisions: HumanDecisions::default(),
            feedback: None,
        })
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        PipelineError::SchemaViolation { phase: Phase::Formalization, .. }
    ));
    assert_eq!(llm.calls(), 1);
}
