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

use crate::error::{Phase, PipelineError};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, error, info};

pub fn log_phase_started(phase: Phase, request_id: &str) {
    info!(
        phase = phase.as_str(),
        request_id = request_id,
        "Pipeline phase started"
    );
}

pub fn log_phase_completed(phase: Phase, request_id: &str, elapsed: Duration) {
    info!(
        phase = phase.as_str(),
        request_id = request_id,
        elapsed_ms = elapsed.as_millis() as u64,
        "Pipeline phase completed"
    );
}

pub fn log_phase_failed(request_id: &str, err: &PipelineError) {
    error!(
        phase = err.phase().as_str(),
        kind = err.kind(),
        request_id = request_id,
        error = %err,
        "Pipeline phase failed"
    );
}

pub fn log_phase_payload(phase: Phase, event: &str, payload: &Value) {
    debug!(
        phase = phase.as_str(),
        event = event,
        payload = %serde_json::to_string(payload).unwrap_or_else(|_| "{}".to_string()),
        "Pipeline event"
    );
}
