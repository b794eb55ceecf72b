//! # rlm-core
//!
//! An orchestration engine for Recursive Language Model (RLM) execution:
//! given a query plus bulky auxiliary context, decide whether the model
//! reads the context directly or receives it as externalized variables
//! inside a sandboxed interpreter, then drives the resulting code-execution
//! loop to completion under an explicit compute budget.
//!
//! ## Core Components
//!
//! - **Budget Math**: information-theoretic primitives behind the
//!   hallucination detector.
//! - **Guarantees Ledger**: cost/tokens/calls/depth/time accounting.
//! - **Classifier**: two-stage task classification.
//! - **Compute Allocator**: difficulty-driven resource allocation.
//! - **Hallucination Detector**: claim extraction and budget-gap
//!   verification against a backend model.
//! - **Recovery Manager**: error classification and retry/degrade/give-up.
//! - **Checkpoint Manager**: durable session/task/RLM state snapshots.
//! - **Orchestrator**: top-level RLM execution state machine.

extern crate self as rlm_core;

pub mod allocator;
pub mod budget_math;
pub mod checkpoint;
pub mod classifier;
pub mod context;
pub mod error;
pub mod execution_loop;
pub mod guarantees;
pub mod hallucination;
pub mod interpreter;
pub mod llm;
pub mod memory;
pub mod mode_selector;
pub mod orchestrator;
pub mod recovery;
pub mod trajectory;

pub use allocator::{Allocation, ComputeAllocator, Difficulty};
pub use checkpoint::{Checkpoint, CheckpointManager, RlmState, ServiceStats, Summary, TaskState};
pub use classifier::{Classification, TaskClassifier, TaskType};
pub use error::{Error, Result};
pub use context::{ContextExternalizer, ContextSource, Manifest, SessionContext, SourceType, VariableInfo};
pub use execution_loop::{
    extract_python_code, flatten_conversation, looks_like_final_answer, ExecutionLoop,
    ExecutionLoopResult, PreparedPrompt, ProgressEvent, RlmConfig, TerminationReason,
};
pub use guarantees::{
    Axis, ComputeBudget, DegradationPlan, GuaranteesLedger, RemainingBudget, Severity, Usage,
    Violation,
};
pub use hallucination::{
    BudgetResult, Claim, ClaimCategory, ClaimExtractor, ClaimVerifier, GroundingStatus,
    TraceAudit, TraceStep, VerificationConfig, VerificationResult, VerificationStats,
    VerificationVerdict,
};
pub use interpreter::{ExecuteResult, FinalOutput, Interpreter, VarInfo, BUILTIN_NAMES};
pub use llm::{
    AnthropicClient, ChatMessage, ClientConfig, CompletionRequest, CompletionResponse, LLMClient,
    ModelSpec, Provider,
};
pub use memory::{Node, NodeId, NodeType, SqliteMemoryStore};
pub use mode_selector::{Mode, ModeDecision, ModeSelector, ModeSelectorConfig, Override};
pub use orchestrator::{
    Decision, DecomposeStrategy, ExecutionResult, ExecutionState, MetaController,
    ModelMetaController, Orchestrator, OrchestratorConfig, RecoveryMeta, SubCallResult,
};
pub use recovery::{
    ErrorRecord, RecoveryAction, RecoveryActionKind, RecoveryManager, RecoveryStats,
};
pub use trajectory::{TrajectoryEvent, TrajectoryEventType};
