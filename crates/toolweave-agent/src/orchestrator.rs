//! Function-calling agent loop.
//!
//! Each round invokes the model with the conversation so far and the merged
//! tool catalog, dispatches any requested tool calls (local tools first, then
//! remote ones), and appends the results to the conversation.  The run ends
//! when a round requests no tools or the round budget is spent.  On the last
//! round of a multi-round budget no tools are offered, so the model has to
//! answer in plain text.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use toolweave_mcp::{McpClientPool, McpError, ServersConfig};
use uuid::Uuid;

use crate::error::{AgentError, Result};
use crate::model::{ModelChunk, ModelConfig, ModelInvoker, ModelOutput, ModelRequest, ModelResult, RawToolCall};
use crate::observer::{
    ModelCallFinished, ModelCallStarted, NoopObserver, RoundFinished, RoundStarted, RunObserver,
    ToolCallFinished, ToolCallStarted,
};
use crate::prompt::{organize_prompt, seed_messages};
use crate::remote::RemoteToolSource;
use crate::stream::StreamAccumulator;
use crate::tools::{LocalTool, NoLocalTools, ToolInvoker, render_tool_messages};
use crate::types::{PromptMessage, ToolCall, ToolDescriptor, ToolResult};
use crate::usage::{Usage, UsageAccumulator};

/// Round budget when none is given.
pub const DEFAULT_MAX_ITERATIONS: u32 = 3;

fn default_max_iterations() -> u32 {
    DEFAULT_MAX_ITERATIONS
}

// ---------------------------------------------------------------------------
// Parameters
// ---------------------------------------------------------------------------

/// Input of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentParams {
    pub query: String,
    #[serde(default)]
    pub instruction: Option<String>,
    pub model: ModelConfig,
    #[serde(default)]
    pub tools: Vec<LocalTool>,
    /// Remote server configuration as a JSON document, optionally wrapped
    /// under `mcpServers`.
    #[serde(default)]
    pub mcp_servers_config: Option<String>,
    #[serde(default = "default_max_iterations")]
    pub maximum_iterations: u32,
}

impl AgentParams {
    pub fn new(query: impl Into<String>, model: ModelConfig) -> Self {
        Self {
            query: query.into(),
            instruction: None,
            model,
            tools: Vec::new(),
            mcp_servers_config: None,
            maximum_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }

    pub fn with_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.instruction = Some(instruction.into());
        self
    }

    pub fn with_tool(mut self, tool: LocalTool) -> Self {
        self.tools.push(tool);
        self
    }

    pub fn with_servers_config(mut self, json: impl Into<String>) -> Self {
        self.mcp_servers_config = Some(json.into());
        self
    }

    pub fn with_max_iterations(mut self, rounds: u32) -> Self {
        self.maximum_iterations = rounds;
        self
    }

    /// Parse loosely-typed parameters.
    pub fn from_value(value: Value) -> Result<Self> {
        let params: Self = serde_json::from_value(value).map_err(|e| AgentError::InvalidParameters {
            reason: e.to_string(),
        })?;
        params.validate()?;
        Ok(params)
    }

    /// Check the parameters before anything is started.
    pub fn validate(&self) -> Result<()> {
        if self.query.trim().is_empty() {
            return Err(AgentError::InvalidParameters {
                reason: "query is required".into(),
            });
        }
        if self.maximum_iterations < 1 {
            return Err(AgentError::InvalidParameters {
                reason: "maximum_iterations must be at least 1".into(),
            });
        }
        Ok(())
    }

    /// Parse the remote server configuration, if any.
    pub fn servers_config(&self) -> Result<Option<ServersConfig>> {
        let Some(raw) = self.mcp_servers_config.as_deref().filter(|s| !s.trim().is_empty()) else {
            return Ok(None);
        };
        match ServersConfig::from_json_str(raw) {
            Ok(config) => Ok(Some(config)),
            Err(McpError::Config { reason }) => Err(AgentError::Config { reason }),
            Err(e) => Err(e.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// Summary
// ---------------------------------------------------------------------------

/// The outcome of a run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    /// Text of the last round.
    pub answer: String,
    pub rounds: u32,
    /// Totals across every model call.
    pub usage: Usage,
    /// The full conversation, seed messages included.
    pub messages: Vec<PromptMessage>,
    pub tool_results: Vec<ToolResult>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// What one model call produced.
struct ModelTurn {
    text: String,
    tool_calls: Vec<ToolCall>,
    usage: Option<Usage>,
}

// ---------------------------------------------------------------------------
// Agent
// ---------------------------------------------------------------------------

/// Drives function-calling runs.
pub struct FunctionCallingAgent {
    model: Arc<dyn ModelInvoker>,
    tools: Arc<dyn ToolInvoker>,
    observer: Arc<dyn RunObserver>,
}

impl FunctionCallingAgent {
    pub fn new(model: Arc<dyn ModelInvoker>) -> Self {
        Self {
            model,
            tools: Arc::new(NoLocalTools),
            observer: Arc::new(NoopObserver),
        }
    }

    pub fn with_tool_invoker(mut self, tools: Arc<dyn ToolInvoker>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn RunObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Run to completion, connecting to the configured remote servers first.
    ///
    /// The server pool is closed before this returns, whether the run
    /// succeeded or not.
    ///
    /// # Errors
    ///
    /// Invalid parameters, an unparsable server configuration, a server that
    /// cannot be connected, tool discovery failures, and model failures.
    /// Tool failures are not errors; they are reported to the model.
    pub async fn run(&self, params: AgentParams) -> Result<RunSummary> {
        params.validate()?;
        let pool = match params.servers_config()? {
            Some(config) if !config.is_empty() => Some(McpClientPool::connect(&config).await?),
            _ => None,
        };
        self.complete(&params, pool.as_ref().map(|p| p as &dyn RemoteToolSource))
            .await
    }

    /// Run to completion against an already-connected remote source, which
    /// is closed before this returns.  `mcp_servers_config` is ignored.
    pub async fn run_with_remote(
        &self,
        params: AgentParams,
        remote: &dyn RemoteToolSource,
    ) -> Result<RunSummary> {
        params.validate()?;
        self.complete(&params, Some(remote)).await
    }

    async fn complete(
        &self,
        params: &AgentParams,
        remote: Option<&dyn RemoteToolSource>,
    ) -> Result<RunSummary> {
        let outcome = self.drive(params, remote).await;
        if let Some(remote) = remote {
            remote.close().await;
        }

        let summary = outcome?;
        self.observer.on_summary(&summary);
        Ok(summary)
    }

    async fn drive(
        &self,
        params: &AgentParams,
        remote: Option<&dyn RemoteToolSource>,
    ) -> Result<RunSummary> {
        let run_id = Uuid::now_v7();
        let started_at = Utc::now();
        let max_rounds = params.maximum_iterations;

        // -- Tool catalog ----------------------------------------------------
        let local: HashMap<&str, &LocalTool> = params
            .tools
            .iter()
            .map(|t| (t.name.as_str(), t))
            .collect();
        let mut catalog: Vec<ToolDescriptor> = params.tools.iter().map(LocalTool::descriptor).collect();
        let mut remote_names = HashSet::new();
        if let Some(remote) = remote {
            for descriptor in remote.discover().await? {
                remote_names.insert(descriptor.name.clone());
                if local.contains_key(descriptor.name.as_str()) {
                    tracing::warn!(run_id = %run_id, tool = %descriptor.name, "remote tool shadowed by local tool");
                    continue;
                }
                catalog.push(descriptor);
            }
        }

        tracing::info!(
            run_id = %run_id,
            provider = %params.model.provider,
            model = %params.model.model,
            local_tools = local.len(),
            remote_tools = remote_names.len(),
            max_rounds,
            "agent run started"
        );

        let stream = params.model.streams_tool_calls();
        let stop = params.model.stop_words();
        let seed = seed_messages(
            params.instruction.as_deref(),
            &params.model.history,
            &params.query,
        );

        let mut thoughts: Vec<PromptMessage> = Vec::new();
        let mut usage = UsageAccumulator::new();
        let mut tool_results: Vec<ToolResult> = Vec::new();
        let mut answer = String::new();
        let mut round = 0;
        let mut wants_tools = true;

        // -- Rounds ----------------------------------------------------------
        while wants_tools && round < max_rounds {
            round += 1;
            let round_started = Instant::now();
            let final_round = round == max_rounds;
            let withhold_tools = final_round && max_rounds > 1;

            self.observer.on_round_start(&RoundStarted {
                run_id,
                round,
                tools_withheld: withhold_tools,
            });

            let request = ModelRequest {
                provider: params.model.provider.clone(),
                model: params.model.model.clone(),
                completion_params: params.model.completion_params.clone(),
                messages: organize_prompt(&seed, &thoughts),
                tools: if withhold_tools { Vec::new() } else { catalog.clone() },
                stop: stop.clone(),
                stream,
            };

            self.observer.on_model_call_start(&ModelCallStarted {
                run_id,
                round,
                provider: params.model.provider.clone(),
                model: params.model.model.clone(),
                tool_count: request.tools.len(),
                stream,
            });
            let model_started = Instant::now();

            let turn = match self.model.invoke(request).await? {
                ModelOutput::Stream(chunks) => self.consume_stream(chunks, final_round, &mut usage).await?,
                ModelOutput::Blocking(result) => self.consume_blocking(result, &mut usage)?,
            };
            wants_tools = !turn.tool_calls.is_empty();

            self.observer.on_model_call_finish(&ModelCallFinished {
                run_id,
                round,
                provider: params.model.provider.clone(),
                model: params.model.model.clone(),
                output: turn.text.clone(),
                tool_names: turn
                    .tool_calls
                    .iter()
                    .map(|c| c.name.as_str())
                    .collect::<Vec<_>>()
                    .join(";"),
                tool_inputs: turn
                    .tool_calls
                    .iter()
                    .map(|c| (c.name.clone(), Value::Object(c.arguments.clone())))
                    .collect(),
                elapsed: model_started.elapsed(),
                usage: turn.usage.clone(),
            });

            thoughts.push(if wants_tools {
                PromptMessage::assistant_tool_calls(turn.tool_calls.clone())
            } else {
                PromptMessage::assistant(turn.text.clone())
            });

            let mut round_results = Vec::with_capacity(turn.tool_calls.len());
            for call in &turn.tool_calls {
                let result = self
                    .dispatch(run_id, round, call, &local, remote, &remote_names)
                    .await;
                thoughts.push(PromptMessage::tool_result(
                    &result.tool_call_id,
                    &result.tool_name,
                    result.output.clone(),
                ));
                round_results.push(result);
            }

            self.observer.on_round_finish(&RoundFinished {
                run_id,
                round,
                llm_response: turn.text.clone(),
                tool_results: round_results.clone(),
                elapsed: round_started.elapsed(),
                usage: turn.usage,
            });

            answer = turn.text;
            tool_results.extend(round_results);
        }

        let mut messages = seed;
        messages.extend(thoughts);

        Ok(RunSummary {
            run_id,
            answer,
            rounds: round,
            usage: usage.total(),
            messages,
            tool_results,
            started_at,
            finished_at: Utc::now(),
        })
    }

    /// Pull a streamed turn to completion.  Text is forwarded to the observer
    /// only while no tool call has appeared, or always on the final round.
    async fn consume_stream(
        &self,
        mut chunks: BoxStream<'static, Result<ModelChunk>>,
        final_round: bool,
        usage: &mut UsageAccumulator,
    ) -> Result<ModelTurn> {
        let mut acc = StreamAccumulator::new();
        let mut current = None;

        while let Some(chunk) = chunks.next().await {
            let chunk = chunk?;
            let fragments = acc.feed(&chunk);
            if !acc.has_tool_calls() || final_round {
                for fragment in &fragments {
                    self.observer.on_text(fragment);
                }
            }
            if let Some(record) = chunk.usage {
                usage.add(&record);
                current = Some(record);
            }
        }

        let (text, tool_calls) = acc.finish()?;
        Ok(ModelTurn {
            text,
            tool_calls,
            usage: current,
        })
    }

    /// A blocking turn's text is forwarded whole, tool calls or not.
    fn consume_blocking(&self, result: ModelResult, usage: &mut UsageAccumulator) -> Result<ModelTurn> {
        if let Some(record) = &result.usage {
            usage.add(record);
        }
        for fragment in result.content.fragments() {
            if !fragment.is_empty() {
                self.observer.on_text(fragment);
            }
        }

        let tool_calls = result
            .tool_calls
            .into_iter()
            .map(RawToolCall::parse)
            .collect::<Result<Vec<_>>>()?;

        Ok(ModelTurn {
            text: result.content.concatenated(),
            tool_calls,
            usage: result.usage,
        })
    }

    /// Resolve and run one tool call.  Never fails: unknown tools and tool
    /// errors become error results.
    async fn dispatch(
        &self,
        run_id: Uuid,
        round: u32,
        call: &ToolCall,
        local: &HashMap<&str, &LocalTool>,
        remote: Option<&dyn RemoteToolSource>,
        remote_names: &HashSet<String>,
    ) -> ToolResult {
        let local_tool = local.get(call.name.as_str()).copied();
        let provider = local_tool.map(|t| t.provider.clone()).unwrap_or_default();

        self.observer.on_tool_call_start(&ToolCallStarted {
            run_id,
            round,
            tool_name: call.name.clone(),
            provider: provider.clone(),
        });
        let started = Instant::now();

        let result = match (local_tool, remote) {
            (Some(tool), _) => {
                let params = tool.invocation_parameters(&call.arguments);
                match self
                    .tools
                    .invoke(tool.provider_type, &tool.provider, &tool.name, params.clone())
                    .await
                {
                    Ok(messages) => ToolResult::success(call, params, render_tool_messages(&messages)),
                    Err(e) => ToolResult::failure(call, params, format!("tool invoke error: {e}")),
                }
            }
            (None, Some(remote)) if remote_names.contains(&call.name) => {
                match remote.execute(&call.name, &call.arguments).await {
                    Ok(text) => ToolResult::success(call, call.arguments.clone(), text),
                    Err(e) => ToolResult::failure(
                        call,
                        call.arguments.clone(),
                        format!("Error executing tool: {e}"),
                    ),
                }
            }
            _ => ToolResult::failure(
                call,
                Map::new(),
                format!("there is not a tool named {}", call.name),
            ),
        };

        self.observer.on_tool_call_finish(&ToolCallFinished {
            run_id,
            round,
            provider,
            result: result.clone(),
            elapsed: started.elapsed(),
        });
        result
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
