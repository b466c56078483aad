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

use async_trait::async_trait;
use chrono::Utc;
use llm_contracts::{
    LLMAdapter, LLMError, LLMRequest, LLMResponse, LLMResult, ResponseMetadata, Usage,
};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;
use uuid::Uuid;

/// Replays canned responses in order and records every request it receives.
pub struct ScriptedAdapter {
    script: Mutex<VecDeque<LLMResult<String>>>,
    requests: Mutex<Vec<LLMRequest>>,
    delay: Option<Duration>,
}

impl ScriptedAdapter {
    pub fn new(script: Vec<LLMResult<String>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            requests: Mutex::new(Vec::new()),
            delay: None,
        }
    }

    pub fn with_texts<I, S>(texts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(texts.into_iter().map(|t| Ok(t.into())).collect())
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn prompts(&self) -> Vec<String> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.prompt.clone())
            .collect()
    }

    pub fn requests(&self) -> Vec<LLMRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl LLMAdapter for ScriptedAdapter {
    async fn generate_response(&self, request: LLMRequest) -> LLMResult<LLMResponse> {
        let request_id = request.id;
        self.requests.lock().unwrap().push(request);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let next = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(LLMError::Internal("script exhausted".into())));
        next.map(|content| LLMResponse {
            id: Uuid::new_v4(),
            request_id,
            content,
            model_used: "scripted".into(),
            provider_used: "scripted".into(),
            usage: Usage::new(10, 10),
            metadata: ResponseMetadata::default(),
            created_at: Utc::now(),
        })
    }

    fn provider_name(&self) -> &str {
        "scripted"
    }
}
