//! Task Request/Handle data model (spec §3, §4.6).

use std::time::Duration;

use crossbeam::channel::Sender as CbSender;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::cancel::{CancelReason, CancelToken};
use crate::error::PoolError;
use crate::fingerprint::ContextFingerprint;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskKind {
    Chat,
    Completion,
    Embedding,
    ImageToText,
    TextToImage,
    ImageToImage,
    SpeechToText,
    TextToSpeech,
    ObjectDetection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Clone)]
pub enum TaskPayload {
    Chat {
        messages: Vec<ChatMessage>,
        stop: Vec<String>,
    },
    Completion {
        prompt: String,
    },
    Embedding {
        input: Vec<String>,
    },
    /// Task kinds this crate does not need to model in detail (image/audio
    /// generation parameters, etc.) — the engine adapter alone understands
    /// the shape, per the "opaque" requirement in §4.1.
    Other(serde_json::Value),
}

/// One unit of work submitted to the Pool. Carries everything `acquire`
/// needs for matching plus everything `execute` needs to actually run it.
#[derive(Clone)]
pub struct TaskRequest {
    pub kind: TaskKind,
    pub model_id: String,
    pub payload: TaskPayload,
    pub timeout: Option<Duration>,
    /// Caller-supplied cancel handle. If absent, the Pool creates one
    /// internally (only shutdown/timeout can then fire it).
    pub cancel: Option<CancelToken>,
    /// Where the engine adapter should push incremental chunks, if the
    /// caller wants streaming. The caller keeps the paired receiver.
    pub progress_sink: Option<CbSender<TaskChunk>>,
}

impl TaskRequest {
    pub fn new(kind: TaskKind, model_id: impl Into<String>, payload: TaskPayload) -> Self {
        Self {
            kind,
            model_id: model_id.into(),
            payload,
            timeout: None,
            cancel: None,
            progress_sink: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn with_progress_sink(mut self, sink: CbSender<TaskChunk>) -> Self {
        self.progress_sink = Some(sink);
        self
    }

    /// The fingerprint used by the Pool's matcher (spec §4.4.1 step 3).
    pub fn request_fingerprint(&self) -> ContextFingerprint {
        match &self.payload {
            TaskPayload::Chat { messages, .. } => ContextFingerprint::from_messages(messages.iter()),
            _ => ContextFingerprint::empty(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    EogToken,
    MaxTokens,
    StopTrigger,
    ToolCalls,
    Timeout,
    Cancel,
    Abort,
}

impl FinishReason {
    /// Spec §6's OpenAI `finish_reason` mapping table, as a pure function.
    pub fn to_openai_str(self) -> &'static str {
        match self {
            FinishReason::MaxTokens => "length",
            FinishReason::ToolCalls => "tool_calls",
            FinishReason::EogToken
            | FinishReason::StopTrigger
            | FinishReason::Timeout
            | FinishReason::Cancel
            | FinishReason::Abort => "stop",
        }
    }

    pub(crate) fn from_cancel_reason(reason: CancelReason) -> Self {
        match reason {
            CancelReason::Caller => FinishReason::Cancel,
            CancelReason::Shutdown => FinishReason::Abort,
            CancelReason::Timeout => FinishReason::Timeout,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ToolCall {
    pub name: String,
    pub arguments: serde_json::Value,
}

#[derive(Debug, Clone)]
pub enum TaskOutput {
    Chat {
        content: String,
        tool_calls: Vec<ToolCall>,
    },
    Completion {
        text: String,
    },
    Embedding {
        vectors: Vec<Vec<f32>>,
    },
    Raw(serde_json::Value),
}

#[derive(Debug, Clone)]
pub struct TaskResult {
    pub finish_reason: FinishReason,
    pub output: TaskOutput,
}

#[derive(Debug, Clone)]
pub struct TaskChunk(pub TaskOutput);

/// `{requestSeq, instanceUid, taskSeq}` per spec §4.6.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId {
    pub request_seq: u64,
    pub instance_uid: Uuid,
    pub task_seq: u64,
}

/// What `EngineAdapter::process_task` hands back to the Instance: a
/// one-shot result slot the adapter's own worker fulfils exactly once.
pub type AdapterResultRx = oneshot::Receiver<Result<TaskResult, PoolError>>;
pub type AdapterResultTx = oneshot::Sender<Result<TaskResult, PoolError>>;

/// The caller-facing handle for one in-flight (or already finished) task.
pub struct TaskHandle {
    id: TaskId,
    result_rx: Option<AdapterResultRx>,
    cancel: CancelToken,
}

impl TaskHandle {
    pub fn new(id: TaskId, result_rx: AdapterResultRx, cancel: CancelToken) -> Self {
        Self {
            id,
            result_rx: Some(result_rx),
            cancel,
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Idempotent by construction: firing an already-fired token is a
    /// no-op, so cancelling after the result has already been delivered
    /// has no observable effect.
    pub fn cancel(&self) {
        self.cancel.fire(CancelReason::Caller);
    }

    /// Awaits the terminal result. Resolves exactly once; a second call
    /// returns an error rather than panicking.
    pub async fn result(&mut self) -> Result<TaskResult, PoolError> {
        match self.result_rx.take() {
            Some(rx) => rx.await.unwrap_or_else(|_| {
                Err(PoolError::EngineFailure("worker dropped result sender".into()))
            }),
            None => Err(PoolError::EngineFailure("result already consumed".into())),
        }
    }

    /// Blocking variant for callers outside an async context. Must not be
    /// called from inside a Tokio runtime (the underlying oneshot panics
    /// if it is).
    pub fn result_blocking(&mut self) -> Result<TaskResult, PoolError> {
        match self.result_rx.take() {
            Some(rx) => rx.blocking_recv().unwrap_or_else(|_| {
                Err(PoolError::EngineFailure("worker dropped result sender".into()))
            }),
            None => Err(PoolError::EngineFailure("result already consumed".into())),
        }
    }
}
