//! The turn orchestrator.
//!
//! One call to [`run_turn`] drives a full agent turn:
//! `load_state → recall → build_prompt → call_llm → (execute_tools →
//! call_llm)* → persist → extract`, streaming ordered
//! [`AgentEvent`]s to the caller. Exactly one terminal event (`Done`,
//! `Interrupt`, or `Error`) closes every stream.
//!
//! Counters (`iteration`, `tool_iteration`, `total_tokens`) are
//! per-turn; the message history accumulates across turns through the
//! checkpointer.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::stream::FuturesUnordered;
use futures_util::StreamExt;
use rand::Rng;
use tokio::sync::mpsc;

use axon_domain::config::AgentConfig;
use axon_domain::message::{Message, Role, ToolCall, ToolDefinition, ToolResult};
use axon_domain::{tokens, AgentEvent, Error, Result, TurnState};
use axon_providers::{ChatRequest, LlmResponse};
use axon_tools::{ToolContext, ToolGate};

use crate::cancel::CancelToken;
use crate::checkpoint::Checkpointer;
use crate::core::Core;
use crate::title::generate_title;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Inputs
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Hard limits on one turn.
#[derive(Debug, Clone)]
pub struct TurnLimits {
    pub max_tool_iterations: u32,
    pub total_timeout: Duration,
}

impl Default for TurnLimits {
    fn default() -> Self {
        Self {
            max_tool_iterations: 10,
            total_timeout: Duration::from_secs(300),
        }
    }
}

/// One user message entering the orchestrator.
#[derive(Debug, Clone)]
pub struct TurnInput {
    /// Existing session, or `None` to create a fresh one.
    pub session_id: Option<String>,
    pub user_id: String,
    pub message: String,
}

const EVENT_BUFFER: usize = 64;

const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant.";

const TOOL_GUIDANCE: &str = "\n\nTool usage guidance:\n\
    - Analyse the request carefully and call tools only when necessary\n\
    - After each tool result, decide whether further calls are needed\n\
    - Once the task is complete or you have enough information, answer \
    immediately instead of calling more tools\n\
    - If a tool call fails, try another approach or explain the situation";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Entry point
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Run one agent turn; events arrive on the returned channel in
/// emission order.
pub fn run_turn(
    core: Arc<Core>,
    config: AgentConfig,
    input: TurnInput,
) -> mpsc::Receiver<AgentEvent> {
    let (tx, rx) = mpsc::channel::<AgentEvent>(EVENT_BUFFER);

    tokio::spawn(async move {
        // ── Resolve the session before anything else ───────────────
        let (session_id, is_first_turn) = match resolve_session(&core, &input, &tx).await {
            Ok(resolved) => resolved,
            Err(e) => {
                let _ = tx.send(AgentEvent::error(e.to_string())).await;
                return;
            }
        };

        let token = core.cancel.register(&session_id);
        let started = Instant::now();

        let outcome = drive_turn(
            &core,
            &config,
            &input,
            &session_id,
            is_first_turn,
            &tx,
            &token,
            started,
        )
        .await;

        core.cancel.remove(&session_id);

        if let Err(e) = outcome {
            let message = match &e {
                Error::Cancelled => "cancelled".to_string(),
                Error::ExecutionTimeout(_) => "execution timed out".to_string(),
                other => other.to_string(),
            };
            tracing::warn!(session_id = %session_id, error = %e, "turn aborted");
            let _ = tx
                .send(AgentEvent::Error {
                    message,
                    session_id: Some(session_id),
                })
                .await;
        }
    });

    rx
}

async fn resolve_session(
    core: &Arc<Core>,
    input: &TurnInput,
    tx: &mpsc::Sender<AgentEvent>,
) -> Result<(String, bool)> {
    match &input.session_id {
        Some(id) => {
            let count = core.repository.count_messages(id).await?;
            Ok((id.clone(), count == 0))
        }
        None => {
            let session = core
                .repository
                .create_session(&input.user_id, None, None)
                .await?;
            let _ = tx
                .send(AgentEvent::SessionCreated {
                    session_id: session.id.clone(),
                })
                .await;
            Ok((session.id, true))
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// The state machine
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Drives the loop. `Ok(())` means a terminal event was already
/// emitted (`Done` or `Interrupt`); `Err` means the caller must emit
/// `Error`.
#[allow(clippy::too_many_arguments)]
async fn drive_turn(
    core: &Arc<Core>,
    config: &AgentConfig,
    input: &TurnInput,
    session_id: &str,
    is_first_turn: bool,
    tx: &mpsc::Sender<AgentEvent>,
    token: &CancelToken,
    started: Instant,
) -> Result<()> {
    let deadline = started + core.limits.total_timeout;

    // ── load_state ─────────────────────────────────────────────────
    let mut state = core
        .checkpointer
        .load(session_id)
        .await?
        .unwrap_or_else(|| TurnState::new(session_id, &input.user_id));
    // Counters are per-turn; the history carries over.
    state.iteration = 0;
    state.tool_iteration = 0;
    state.total_tokens = 0;
    state.pending_tool_calls.clear();

    state.messages.push(Message::user(&input.message));
    core.repository
        .add_message(
            session_id,
            Role::User,
            &input.message,
            None,
            Some(tokens::count(&input.message) as u32),
        )
        .await?;

    // ── recall ─────────────────────────────────────────────────────
    state.recalled_memories = match &core.simplemem {
        Some(simplemem) => {
            simplemem
                .adaptive_retrieve(session_id, &input.message, None)
                .await?
        }
        None => core.memory.search(session_id, &input.message, 5, None).await?,
    };

    let _ = tx.send(AgentEvent::thinking("processing", 1)).await;

    // Title generation runs concurrently with the turn; its event is
    // merged into the stream before the terminal event (a title that
    // lands later is still stored, just not announced this turn).
    let mut title_rx = is_first_turn.then(|| spawn_title_task(core, session_id, &input.message));

    let tool_defs = core.tools.to_openai_tools(&config.tools);
    let has_tools = !config.tools.is_empty() && !tool_defs.is_empty();

    let mut final_content = String::new();
    let mut final_reasoning: Option<String> = None;
    let mut termination: Option<String> = None;

    // ── call_llm / execute_tools loop ──────────────────────────────
    loop {
        check_deadline(deadline)?;
        check_cancelled(token)?;

        let prompt = build_prompt(core, config, &state, has_tools).await?;
        let response = call_llm_with_retry(
            core,
            config,
            prompt,
            if has_tools { tool_defs.clone() } else { Vec::new() },
            deadline,
            token,
        )
        .await?;

        state.iteration += 1;
        if let Some(usage) = &response.usage {
            state.total_tokens += usage.total_tokens;
        }
        let over_budget = state.total_tokens > u64::from(config.max_tokens);

        // An empty stop response is treated as empty text; reasoning
        // models may answer on the reasoning channel only.
        let content = response
            .content
            .clone()
            .or_else(|| response.reasoning_content.clone())
            .unwrap_or_default();

        if let Some(reasoning) = &response.reasoning_content {
            let _ = tx
                .send(AgentEvent::reasoning(state.iteration, reasoning.clone()))
                .await;
            final_reasoning = Some(reasoning.clone());
        }

        let tool_calls = response.tool_calls.clone();
        if tool_calls.is_empty() {
            state.messages.push(Message::assistant(&content));
            final_content = content;
            if over_budget {
                termination = Some("token_budget".into());
            }
            break;
        }

        // The model wants tools but a limit has been hit: stop here.
        if state.tool_iteration >= core.limits.max_tool_iterations {
            tracing::warn!(
                limit = core.limits.max_tool_iterations,
                "tool iteration limit reached, stopping tool execution"
            );
            state
                .messages
                .push(assistant_with_calls(&content, &tool_calls));
            final_content = content;
            termination = Some("tool_iteration_cap".into());
            break;
        }
        if over_budget {
            state
                .messages
                .push(assistant_with_calls(&content, &tool_calls));
            final_content = content;
            termination = Some("token_budget".into());
            break;
        }

        state.tool_iteration += 1;
        state
            .messages
            .push(assistant_with_calls(&content, &tool_calls));

        let ctx = ToolContext {
            user_id: Some(input.user_id.clone()),
            conversation_id: Some(session_id.to_string()),
            session_id: Some(session_id.to_string()),
        };

        // ── Approval gate ──────────────────────────────────────────
        // Calls ahead of the first gated one run (sequentially, in the
        // model's order); the gated call alone is checkpointed as
        // pending and the turn pauses. Calls after the gate stay
        // unexecuted until the approval decision resumes the turn.
        if let Some(gate_index) = tool_calls
            .iter()
            .position(|tc| needs_approval(core, config, tc))
        {
            for tc in &tool_calls[..gate_index] {
                let _ = tx
                    .send(AgentEvent::ToolCall {
                        id: tc.id.clone(),
                        name: tc.name.clone(),
                        args: tc.arguments.clone(),
                    })
                    .await;
                let result = execute_one_tool(core, &ctx, tc).await;
                let _ = tx
                    .send(AgentEvent::ToolResult {
                        tool_call_id: result.tool_call_id.clone(),
                        tool_name: result.tool_name.clone(),
                        success: result.success,
                        output: result.output.clone(),
                        error: result.error.clone(),
                        duration_ms: result.duration_ms,
                    })
                    .await;
                state
                    .messages
                    .push(Message::tool_result(&tc.id, result.message_content()));
            }

            let gated = tool_calls[gate_index].clone();
            state.pending_tool_calls = vec![gated.clone()];
            save_with_retry(core.checkpointer.as_ref(), session_id, &state).await?;
            let _ = tx
                .send(AgentEvent::Interrupt {
                    session_id: session_id.to_string(),
                    pending_tool_calls: vec![gated.clone()],
                    message: format!("Tool '{}' requires approval before execution", gated.name),
                })
                .await;
            return Ok(());
        }

        // ── Fan out: every ToolCall precedes its own ToolResult ────
        for tc in &tool_calls {
            let _ = tx
                .send(AgentEvent::ToolCall {
                    id: tc.id.clone(),
                    name: tc.name.clone(),
                    args: tc.arguments.clone(),
                })
                .await;
        }

        let mut in_flight: FuturesUnordered<_> = tool_calls
            .iter()
            .map(|tc| {
                let core = Arc::clone(core);
                let ctx = ctx.clone();
                let tc = tc.clone();
                async move { execute_one_tool(&core, &ctx, &tc).await }
            })
            .collect();

        let mut results: Vec<ToolResult> = Vec::with_capacity(tool_calls.len());
        while !in_flight.is_empty() {
            let remaining = deadline
                .checked_duration_since(Instant::now())
                .ok_or_else(|| Error::ExecutionTimeout("tool execution".into()))?;
            let result = match tokio::time::timeout(remaining, in_flight.next()).await {
                Ok(Some(result)) => result,
                Ok(None) => break,
                Err(_) => return Err(Error::ExecutionTimeout("tool execution".into())),
            };
            check_cancelled(token)?;
            let _ = tx
                .send(AgentEvent::ToolResult {
                    tool_call_id: result.tool_call_id.clone(),
                    tool_name: result.tool_name.clone(),
                    success: result.success,
                    output: result.output.clone(),
                    error: result.error.clone(),
                    duration_ms: result.duration_ms,
                })
                .await;
            results.push(result);
        }

        // Conversation order follows the model's call order even when
        // completion was interleaved.
        for tc in &tool_calls {
            if let Some(result) = results.iter().find(|r| r.tool_call_id == tc.id) {
                state
                    .messages
                    .push(Message::tool_result(&tc.id, result.message_content()));
            }
        }

        let _ = tx
            .send(AgentEvent::thinking("analyzing", state.iteration))
            .await;

        // Iteration-boundary checkpoint; best-effort, the pre-Done
        // save is the durable one.
        if config.checkpoint_enabled {
            if let Err(e) = core.checkpointer.save(session_id, &state).await {
                tracing::warn!(error = %e, "iteration checkpoint failed");
            }
        }
    }

    // ── persist (durable before Done) ──────────────────────────────
    save_with_retry(core.checkpointer.as_ref(), session_id, &state).await?;

    if let Err(e) = core
        .repository
        .add_message(
            session_id,
            Role::Assistant,
            &final_content,
            None,
            Some(tokens::count(&final_content) as u32),
        )
        .await
    {
        tracing::warn!(error = %e, "failed to persist assistant message");
    }

    if termination.is_none() || !final_content.is_empty() {
        let _ = tx
            .send(AgentEvent::Text {
                content: final_content.clone(),
            })
            .await;
    }

    if let Some(rx) = &mut title_rx {
        if let Ok(title) = rx.try_recv() {
            let _ = tx
                .send(AgentEvent::TitleUpdated {
                    session_id: session_id.to_string(),
                    title,
                })
                .await;
        }
    }

    let _ = tx
        .send(AgentEvent::Done {
            reasoning_content: final_reasoning.filter(|r| *r != final_content),
            content: final_content,
            iterations: state.iteration,
            tool_iterations: state.tool_iteration,
            total_tokens: state.total_tokens,
            termination,
        })
        .await;

    // ── extract (background, own handles, survives cancellation) ──
    spawn_extraction_task(core, input, session_id, &state);

    Ok(())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn check_deadline(deadline: Instant) -> Result<()> {
    if Instant::now() >= deadline {
        Err(Error::ExecutionTimeout("turn deadline exceeded".into()))
    } else {
        Ok(())
    }
}

fn check_cancelled(token: &CancelToken) -> Result<()> {
    if token.is_cancelled() {
        Err(Error::Cancelled)
    } else {
        Ok(())
    }
}

fn assistant_with_calls(content: &str, calls: &[ToolCall]) -> Message {
    Message::assistant_tool_calls(
        (!content.is_empty()).then(|| content.to_string()),
        calls.to_vec(),
    )
}

fn needs_approval(core: &Core, config: &AgentConfig, tc: &ToolCall) -> bool {
    if core.tools.gate(&tc.name, &tc.arguments) == ToolGate::NeedsApproval {
        return true;
    }
    config.hitl_enabled && config.hitl_operations.iter().any(|op| *op == tc.name)
}

/// Build the LLM prompt: system message (tool guidance, recalled
/// memories) plus the compressed history.
async fn build_prompt(
    core: &Core,
    config: &AgentConfig,
    state: &TurnState,
    has_tools: bool,
) -> Result<Vec<Message>> {
    let mut system = config
        .system_prompt
        .clone()
        .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string());
    if has_tools {
        system.push_str(TOOL_GUIDANCE);
    }
    if !state.recalled_memories.is_empty() {
        system.push_str("\n\nRelevant memories:\n");
        for memory in &state.recalled_memories {
            system.push_str("- ");
            system.push_str(&memory.content);
            system.push('\n');
        }
    }

    let recalled: Vec<String> = state
        .recalled_memories
        .iter()
        .map(|m| m.content.clone())
        .collect();
    let compressed = core.compressor.compress(&state.messages, None, &recalled).await?;

    let mut prompt = vec![Message::system(system)];
    prompt.extend(core.compressor.build_compressed_context(&compressed));
    Ok(prompt)
}

/// One LLM call with a single jittered retry on transient failures,
/// bounded by the turn deadline.
async fn call_llm_with_retry(
    core: &Core,
    config: &AgentConfig,
    messages: Vec<Message>,
    tools: Vec<ToolDefinition>,
    deadline: Instant,
    token: &CancelToken,
) -> Result<LlmResponse> {
    let request = ChatRequest {
        messages,
        model: Some(config.model.clone()),
        temperature: Some(config.temperature),
        max_tokens: Some(config.max_tokens),
        tools,
        ..Default::default()
    };

    let mut retried = false;
    loop {
        check_cancelled(token)?;
        let remaining = deadline
            .checked_duration_since(Instant::now())
            .ok_or_else(|| Error::ExecutionTimeout("llm call".into()))?;

        match tokio::time::timeout(remaining, core.gateway.chat(request.clone())).await {
            Err(_) => return Err(Error::ExecutionTimeout("llm call".into())),
            Ok(Ok(response)) => return Ok(response),
            Ok(Err(e)) if e.is_transient() && !retried => {
                retried = true;
                let backoff = 500 + rand::thread_rng().gen_range(0..250);
                tracing::warn!(error = %e, backoff_ms = backoff, "transient LLM failure, retrying");
                tokio::time::sleep(Duration::from_millis(backoff)).await;
            }
            Ok(Err(e)) => return Err(e),
        }
    }
}

/// Execute one tool call; never fails the turn. Policy rejections and
/// tool panics alike become failed results.
async fn execute_one_tool(core: &Core, ctx: &ToolContext, tc: &ToolCall) -> ToolResult {
    let started = Instant::now();
    match core
        .tools
        .execute(ctx, &tc.id, &tc.name, &tc.arguments)
        .await
    {
        Ok(result) => result,
        Err(e) => ToolResult::failure(
            &tc.id,
            &tc.name,
            e.to_string(),
            started.elapsed().as_millis() as u64,
        ),
    }
}

/// Save with one retry; the caller treats a double failure as fatal
/// (no `Done` is emitted, the next turn replays from the last good
/// checkpoint).
async fn save_with_retry(
    checkpointer: &dyn Checkpointer,
    session_id: &str,
    state: &TurnState,
) -> Result<()> {
    match checkpointer.save(session_id, state).await {
        Ok(()) => Ok(()),
        Err(first) => {
            tracing::warn!(error = %first, "checkpoint save failed, retrying");
            tokio::time::sleep(Duration::from_millis(200)).await;
            checkpointer
                .save(session_id, state)
                .await
                .map_err(|second| Error::Storage(format!("checkpoint save failed twice: {second}")))
        }
    }
}

/// Generate a title for an untitled session in the background. The
/// title is stored in the repository; the returned channel carries it
/// back so the turn can announce it before its terminal event.
fn spawn_title_task(
    core: &Arc<Core>,
    session_id: &str,
    first_message: &str,
) -> tokio::sync::oneshot::Receiver<String> {
    let (title_tx, title_rx) = tokio::sync::oneshot::channel();
    let repository = Arc::clone(&core.repository);
    let gateway = Arc::clone(&core.gateway);
    let session_id = session_id.to_string();
    let first_message = first_message.to_string();

    tokio::spawn(async move {
        let untitled = matches!(
            repository.get_session(&session_id).await,
            Ok(Some(session)) if session.title.is_none()
        );
        if !untitled {
            return;
        }
        match generate_title(&gateway, &first_message).await {
            Ok(title) if !title.is_empty() => {
                if let Err(e) = repository.update_title(&session_id, &title).await {
                    tracing::warn!(error = %e, "failed to store generated title");
                    return;
                }
                let _ = title_tx.send(title);
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "title generation failed"),
        }
    });

    title_rx
}

/// Fire-and-forget memory extraction with its own storage handles;
/// errors are logged, never surfaced.
fn spawn_extraction_task(core: &Arc<Core>, input: &TurnInput, session_id: &str, state: &TurnState) {
    if let Some(simplemem) = &core.simplemem {
        let simplemem = Arc::clone(simplemem);
        let messages = state.messages.clone();
        let user_id = input.user_id.clone();
        let session_id = session_id.to_string();
        tokio::spawn(async move {
            if let Err(e) = simplemem
                .process_and_store(&messages, &user_id, &session_id)
                .await
            {
                tracing::warn!(error = %e, "memory extraction failed");
            }
        });
    }
}
