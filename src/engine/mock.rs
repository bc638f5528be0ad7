//! A scriptable chat engine used by this crate's own integration tests —
//! no real model runtime, just enough behavior (streaming, stop strings,
//! cancellation, configurable failure) to exercise the Pool/Instance FSM
//! deterministically. Kept in a regular module behind the `test-util`
//! feature rather than `mockall`/`mockito`, matching the teacher's general
//! preference (e.g. `domain/model/error.rs`) for hand-written fixtures.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::cancel::{CancelReason, CancelToken};
use crate::config::ModelConfig;
use crate::engine::{EngineAdapter, EngineHandle};
use crate::error::PoolError;
use crate::fingerprint::ContextFingerprint;
use crate::task::{
    AdapterResultRx, ChatMessage, FinishReason, Role, TaskChunk, TaskKind, TaskOutput,
    TaskPayload, TaskRequest, TaskResult,
};

struct MockState {
    prepare_calls: usize,
    dispose_calls: usize,
}

pub struct MockEngineAdapter {
    state: Arc<Mutex<MockState>>,
    tokens_per_reply: usize,
    token_delay: Duration,
    fail_prepare: bool,
}

impl MockEngineAdapter {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                prepare_calls: 0,
                dispose_calls: 0,
            })),
            tokens_per_reply: 4,
            token_delay: Duration::from_millis(5),
            fail_prepare: false,
        }
    }

    pub fn with_token_delay(mut self, delay: Duration) -> Self {
        self.token_delay = delay;
        self
    }

    pub fn with_tokens_per_reply(mut self, n: usize) -> Self {
        self.tokens_per_reply = n;
        self
    }

    pub fn failing_prepare() -> Self {
        let mut adapter = Self::new();
        adapter.fail_prepare = true;
        adapter
    }

    pub fn prepare_calls(&self) -> usize {
        self.state.lock().prepare_calls
    }

    pub fn dispose_calls(&self) -> usize {
        self.state.lock().dispose_calls
    }
}

impl Default for MockEngineAdapter {
    fn default() -> Self {
        Self::new()
    }
}

struct MockHandle {
    resident: Arc<Mutex<ContextFingerprint>>,
}

impl EngineAdapter for MockEngineAdapter {
    fn prepare(&self, cfg: &ModelConfig) -> Result<EngineHandle, PoolError> {
        let mut state = self.state.lock();
        state.prepare_calls += 1;
        if self.fail_prepare {
            return Err(PoolError::EngineFailure("mock prepare failure".into()));
        }
        let initial = ContextFingerprint::from_messages(cfg.initial_messages.iter());
        Ok(EngineHandle::new(MockHandle {
            resident: Arc::new(Mutex::new(initial)),
        }))
    }

    fn process_task(
        &self,
        handle: &mut EngineHandle,
        req: TaskRequest,
        cancel: CancelToken,
    ) -> AdapterResultRx {
        let (tx, rx) = oneshot::channel();
        let resident = handle
            .downcast_ref::<MockHandle>()
            .expect("MockEngineAdapter handed a foreign EngineHandle")
            .resident
            .clone();
        let tokens_per_reply = self.tokens_per_reply;
        let token_delay = self.token_delay;

        std::thread::spawn(move || {
            let result = run_mock_chat(&req, &cancel, tokens_per_reply, token_delay, &resident);
            let _ = tx.send(result);
        });

        rx
    }

    fn dispose(&self, _handle: EngineHandle) {
        self.state.lock().dispose_calls += 1;
    }

    fn task_kinds_supported(&self) -> &'static [TaskKind] {
        &[TaskKind::Chat]
    }

    fn resident_fingerprint(&self, handle: &EngineHandle) -> ContextFingerprint {
        handle
            .downcast_ref::<MockHandle>()
            .map(|h| h.resident.lock().clone())
            .unwrap_or_default()
    }
}

fn run_mock_chat(
    req: &TaskRequest,
    cancel: &CancelToken,
    tokens_per_reply: usize,
    token_delay: Duration,
    resident: &Arc<Mutex<ContextFingerprint>>,
) -> Result<TaskResult, PoolError> {
    let (messages, stop) = match &req.payload {
        TaskPayload::Chat { messages, stop } => (messages.clone(), stop.clone()),
        _ => {
            return Err(PoolError::EngineFailure(
                "MockEngineAdapter only supports chat payloads".into(),
            ))
        }
    };

    let last_user = messages
        .iter()
        .rev()
        .find(|m| m.role == Role::User)
        .map(|m| m.content.as_str())
        .unwrap_or("");

    let budget = tokens_per_reply.max(1);
    let words: Vec<String> = format!("echo {last_user}")
        .split_whitespace()
        .map(str::to_string)
        .collect();

    let mut produced = String::new();
    let wake = cancel.wake_receiver();
    let mut finish = FinishReason::MaxTokens;

    for (i, word) in words.iter().take(budget).enumerate() {
        if i > 0 {
            crossbeam::select! {
                recv(wake) -> _ => {}
                default(token_delay) => {}
            }
        }
        if cancel.is_cancelled() {
            finish = FinishReason::from_cancel_reason(
                cancel.reason().unwrap_or(CancelReason::Caller),
            );
            break;
        }
        if stop.iter().any(|s| word.contains(s.as_str())) {
            finish = FinishReason::StopTrigger;
            break;
        }

        if !produced.is_empty() {
            produced.push(' ');
        }
        produced.push_str(word);

        if let Some(sink) = &req.progress_sink {
            let _ = sink.send(TaskChunk(TaskOutput::Chat {
                content: word.clone(),
                tool_calls: Vec::new(),
            }));
        }

        if i + 1 == words.len() && finish == FinishReason::MaxTokens {
            finish = FinishReason::EogToken;
        }
    }

    if !cancel.is_cancelled() {
        let mut all = messages;
        all.push(ChatMessage {
            role: Role::Assistant,
            content: produced.clone(),
        });
        *resident.lock() = ContextFingerprint::from_messages(all.iter());
    }

    Ok(TaskResult {
        finish_reason: finish,
        output: TaskOutput::Chat {
            content: produced,
            tool_calls: Vec::new(),
        },
    })
}
