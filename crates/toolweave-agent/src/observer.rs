//! Run observation.
//!
//! The loop reports everything it does through a [`RunObserver`]: round and
//! call boundaries with timing, provider and usage metadata, user-visible
//! text fragments, and the final summary.  All methods default to no-ops.

use std::time::Duration;

use serde_json::{Map, Value};
use uuid::Uuid;

use crate::orchestrator::RunSummary;
use crate::types::ToolResult;
use crate::usage::Usage;

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct RoundStarted {
    pub run_id: Uuid,
    pub round: u32,
    /// Whether tool schemas are withheld this round.
    pub tools_withheld: bool,
}

#[derive(Debug, Clone)]
pub struct RoundFinished {
    pub run_id: Uuid,
    pub round: u32,
    /// The model's text this round.
    pub llm_response: String,
    pub tool_results: Vec<ToolResult>,
    pub elapsed: Duration,
    /// Usage of this round's model call.
    pub usage: Option<Usage>,
}

#[derive(Debug, Clone)]
pub struct ModelCallStarted {
    pub run_id: Uuid,
    pub round: u32,
    pub provider: String,
    pub model: String,
    pub tool_count: usize,
    pub stream: bool,
}

#[derive(Debug, Clone)]
pub struct ModelCallFinished {
    pub run_id: Uuid,
    pub round: u32,
    pub provider: String,
    pub model: String,
    pub output: String,
    /// Requested tool names joined with `;`.
    pub tool_names: String,
    /// Requested arguments keyed by tool name.
    pub tool_inputs: Map<String, Value>,
    pub elapsed: Duration,
    pub usage: Option<Usage>,
}

#[derive(Debug, Clone)]
pub struct ToolCallStarted {
    pub run_id: Uuid,
    pub round: u32,
    pub tool_name: String,
    /// Empty for remote tools.
    pub provider: String,
}

#[derive(Debug, Clone)]
pub struct ToolCallFinished {
    pub run_id: Uuid,
    pub round: u32,
    pub provider: String,
    pub result: ToolResult,
    pub elapsed: Duration,
}

// ---------------------------------------------------------------------------
// Observer trait
// ---------------------------------------------------------------------------

/// Receives progress from a run.
pub trait RunObserver: Send + Sync {
    fn on_round_start(&self, _event: &RoundStarted) {}
    fn on_round_finish(&self, _event: &RoundFinished) {}
    fn on_model_call_start(&self, _event: &ModelCallStarted) {}
    fn on_model_call_finish(&self, _event: &ModelCallFinished) {}
    fn on_tool_call_start(&self, _event: &ToolCallStarted) {}
    fn on_tool_call_finish(&self, _event: &ToolCallFinished) {}

    /// A text fragment for the user, delivered as soon as it is known.
    fn on_text(&self, _fragment: &str) {}

    fn on_summary(&self, _summary: &RunSummary) {}
}

/// Ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl RunObserver for NoopObserver {}

/// Forwards every event to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl RunObserver for TracingObserver {
    fn on_round_start(&self, e: &RoundStarted) {
        tracing::info!(run_id = %e.run_id, round = e.round, tools_withheld = e.tools_withheld, "round started");
    }

    fn on_round_finish(&self, e: &RoundFinished) {
        tracing::info!(
            run_id = %e.run_id,
            round = e.round,
            tool_results = e.tool_results.len(),
            elapsed_ms = e.elapsed.as_millis() as u64,
            total_tokens = e.usage.as_ref().map_or(0, |u| u.total_tokens),
            "round finished"
        );
    }

    fn on_model_call_start(&self, e: &ModelCallStarted) {
        tracing::debug!(
            run_id = %e.run_id,
            round = e.round,
            provider = %e.provider,
            model = %e.model,
            tools = e.tool_count,
            stream = e.stream,
            "model call started"
        );
    }

    fn on_model_call_finish(&self, e: &ModelCallFinished) {
        tracing::info!(
            run_id = %e.run_id,
            round = e.round,
            provider = %e.provider,
            model = %e.model,
            tool_names = %e.tool_names,
            elapsed_ms = e.elapsed.as_millis() as u64,
            total_tokens = e.usage.as_ref().map_or(0, |u| u.total_tokens),
            total_price = e.usage.as_ref().map_or(0.0, |u| u.total_price),
            "model call finished"
        );
    }

    fn on_tool_call_start(&self, e: &ToolCallStarted) {
        tracing::debug!(run_id = %e.run_id, round = e.round, tool = %e.tool_name, provider = %e.provider, "tool call started");
    }

    fn on_tool_call_finish(&self, e: &ToolCallFinished) {
        if let Some(error) = &e.result.error {
            tracing::warn!(
                run_id = %e.run_id,
                round = e.round,
                tool = %e.result.tool_name,
                call_id = %e.result.tool_call_id,
                error = %error,
                "tool call failed"
            );
        } else {
            tracing::info!(
                run_id = %e.run_id,
                round = e.round,
                tool = %e.result.tool_name,
                call_id = %e.result.tool_call_id,
                elapsed_ms = e.elapsed.as_millis() as u64,
                "tool call finished"
            );
        }
    }

    fn on_summary(&self, s: &RunSummary) {
        tracing::info!(
            run_id = %s.run_id,
            rounds = s.rounds,
            total_tokens = s.usage.total_tokens,
            total_price = s.usage.total_price,
            currency = s.usage.currency.as_deref().unwrap_or(""),
            "run complete"
        );
    }
}
