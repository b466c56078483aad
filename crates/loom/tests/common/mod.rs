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

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use llm_contracts::{
    LLMAdapter, LLMError, LLMRequest, LLMResponse, LLMResult, ResponseMetadata, Usage,
};
use loom::{
    DataSourceMetadata, EnhancedPrompt, FieldDescriptor, GroundedSemanticPlan, LoomConfig,
    PluginCatalog, StaticMetadataSource, WorkflowPipeline,
};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Answers each call with the next canned text and keeps every prompt.
#[derive(Default)]
pub struct MockLLM {
    responses: Mutex<VecDeque<String>>,
    prompts: Mutex<Vec<String>>,
}

impl MockLLM {
    pub fn new<I: IntoIterator<Item = String>>(responses: I) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into_iter().collect()),
            prompts: Mutex::new(Vec::new()),
        })
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }
}

#[async_trait]
impl LLMAdapter for MockLLM {
    async fn generate_response(&self, request: LLMRequest) -> LLMResult<LLMResponse> {
        self.prompts.lock().unwrap().push(request.prompt.clone());
        let content = self
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| LLMError::Internal("no more mock responses".into()))?;
        Ok(LLMResponse {
            id: Uuid::new_v4(),
            request_id: request.id,
            content,
            model_used: "mock".into(),
            provider_used: "mock".into(),
            usage: Usage::new(1, 1),
            metadata: ResponseMetadata::default(),
            created_at: Utc::now(),
        })
    }

    fn provider_name(&self) -> &str {
        "mock"
    }
}

pub fn config_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("config")
}

pub fn catalog() -> PluginCatalog {
    PluginCatalog::from_path(config_dir().join("plugins.yml")).unwrap()
}

pub fn pipeline(llm: Arc<MockLLM>, metadata: StaticMetadataSource) -> WorkflowPipeline {
    WorkflowPipeline::new(llm, LoomConfig::default(), catalog(), Arc::new(metadata))
}

pub fn gmail_metadata() -> DataSourceMetadata {
    DataSourceMetadata {
        source_type: "email".into(),
        fields: vec![
            FieldDescriptor::described("snippet", "USE THIS for content matching"),
            FieldDescriptor::described("body", "usually empty"),
            FieldDescriptor::named("from"),
        ],
        sample_rows: serde_json::from_value(json!([
            {"snippet": "Invoice 1042 is attached", "body": "", "from": "ap@acme.test"},
            {"snippet": "Your order has shipped", "body": "", "from": "shop@store.test"}
        ]))
        .unwrap(),
        ..Default::default()
    }
}

pub fn prompt(services: &[&str]) -> EnhancedPrompt {
    let mut prompt = EnhancedPrompt::new("Tell me in Slack about emails that mention invoices");
    prompt.sections.data = vec!["Recent Gmail messages".into()];
    prompt.sections.delivery = vec!["Post a summary to #finance".into()];
    prompt.specifics.services_involved = services.iter().map(|s| s.to_string()).collect();
    prompt
}

pub fn plan_json(assumptions: Value) -> String {
    json!({
        "goal": "Post invoice emails to Slack",
        "understanding": {
            "summary": "Search mail, keep invoice messages, post them",
            "data_flow": ["gmail", "filter", "slack"],
            "edge_cases": [{"condition": "no matches", "suggested_handling": "post nothing"}]
        },
        "assumptions": assumptions,
        "ambiguities": [],
        "inferences": [],
        "reasoning_trace": ["content lives in the snippet field"]
    })
    .to_string()
}

pub fn content_assumption() -> Value {
    json!({
        "id": "a1",
        "category": "field_name",
        "description": "Email text is available as a field",
        "validation_strategy": {
            "method": "field_match",
            "parameters": {"candidates": ["email content"], "plugin_key": "gmail"}
        },
        "impact_if_wrong": "critical",
        "fallback": null
    })
}

/// Conditions on `snippet`, one per keyword.
pub fn ir_json(operator: &str, keywords: &[&str]) -> String {
    let conditions: Vec<Value> = keywords
        .iter()
        .map(|k| json!({"field": "snippet", "operator": operator, "value": k}))
        .collect();
    json!({
        "ir_version": "1.0",
        "goal": "Post invoice emails to Slack",
        "data_sources": [
            {"id": "emails", "plugin_key": "gmail", "action": "", "params": [], "fields": ["snippet"]}
        ],
        "filters": [
            {"id": "matches", "input": "emails", "combinator": "or", "conditions": conditions}
        ],
        "transforms": [],
        "actions": [],
        "delivery": [
            {"id": "notify", "plugin_key": "slack", "action": "post_message",
             "params": [{"key": "channel", "value": "#finance"}, {"key": "text", "value": "{{matches.data}}"}],
             "input": "matches"}
        ],
        "edge_cases": []
    })
    .to_string()
}

pub fn grounded_plan(blocking: bool) -> GroundedSemanticPlan {
    let errors = if blocking {
        json!([{"code": "insufficient_validation", "assumption_id": null,
                "message": "1 of 1 assumptions could not be checked", "blocking": true}])
    } else {
        json!([])
    };
    serde_json::from_value(json!({
        "goal": "Post invoice emails to Slack",
        "assumptions": [content_assumption()],
        "reasoning_trace": ["content lives in the snippet field"],
        "grounding_results": [{
            "assumption_id": "a1", "validated": !blocking, "skipped": blocking,
            "confidence": if blocking { 0.0 } else { 0.8 },
            "resolved_value": if blocking { Value::Null } else { json!("snippet") },
            "validation_method": if blocking { "skipped" } else { "description" }
        }],
        "grounding_errors": errors,
        "grounding_confidence": if blocking { 0.0 } else { 0.8 }
    }))
    .unwrap()
}
