//! Step registry: step type identifier to step implementation.
//!
//! The variant a step is registered under is its declared capability, and
//! fixes the execution mode every plan node of that step type must use.

use std::collections::HashMap;
use std::sync::Arc;

use ordo_types::plan::ExecutionMode;

use super::builtin;
use super::{
    AsyncExecutable, ChildChainExecutable, ChildExecutable, ChildrenExecutable, SyncExecutable,
    TaskChainExecutable, TaskExecutable,
};

/// A registered step implementation, tagged by capability.
#[derive(Clone)]
pub enum RegisteredStep {
    Sync(Arc<dyn SyncExecutable>),
    Async(Arc<dyn AsyncExecutable>),
    Task(Arc<dyn TaskExecutable>),
    TaskChain(Arc<dyn TaskChainExecutable>),
    Child(Arc<dyn ChildExecutable>),
    Children(Arc<dyn ChildrenExecutable>),
    ChildChain(Arc<dyn ChildChainExecutable>),
}

impl RegisteredStep {
    pub fn mode(&self) -> ExecutionMode {
        match self {
            RegisteredStep::Sync(_) => ExecutionMode::Sync,
            RegisteredStep::Async(_) => ExecutionMode::Async,
            RegisteredStep::Task(_) => ExecutionMode::Task,
            RegisteredStep::TaskChain(_) => ExecutionMode::TaskChain,
            RegisteredStep::Child(_) => ExecutionMode::Child,
            RegisteredStep::Children(_) => ExecutionMode::Children,
            RegisteredStep::ChildChain(_) => ExecutionMode::ChildChain,
        }
    }
}

impl std::fmt::Debug for RegisteredStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "RegisteredStep({})", self.mode())
    }
}

/// Registry of step implementations, indexed by step type.
#[derive(Debug, Clone, Default)]
pub struct StepRegistry {
    steps: HashMap<String, RegisteredStep>,
}

impl StepRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the structural steps plans are built from.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        builtin::register_builtins(&mut registry);
        registry
    }

    /// Register `step` under `step_type`, replacing any previous entry.
    pub fn register(&mut self, step_type: impl Into<String>, step: RegisteredStep) {
        self.steps.insert(step_type.into(), step);
    }

    pub fn register_sync(&mut self, step_type: impl Into<String>, step: impl SyncExecutable + 'static) {
        self.register(step_type, RegisteredStep::Sync(Arc::new(step)));
    }

    pub fn register_async(&mut self, step_type: impl Into<String>, step: impl AsyncExecutable + 'static) {
        self.register(step_type, RegisteredStep::Async(Arc::new(step)));
    }

    pub fn register_task(&mut self, step_type: impl Into<String>, step: impl TaskExecutable + 'static) {
        self.register(step_type, RegisteredStep::Task(Arc::new(step)));
    }

    pub fn register_task_chain(
        &mut self,
        step_type: impl Into<String>,
        step: impl TaskChainExecutable + 'static,
    ) {
        self.register(step_type, RegisteredStep::TaskChain(Arc::new(step)));
    }

    pub fn register_child(&mut self, step_type: impl Into<String>, step: impl ChildExecutable + 'static) {
        self.register(step_type, RegisteredStep::Child(Arc::new(step)));
    }

    pub fn register_children(
        &mut self,
        step_type: impl Into<String>,
        step: impl ChildrenExecutable + 'static,
    ) {
        self.register(step_type, RegisteredStep::Children(Arc::new(step)));
    }

    pub fn register_child_chain(
        &mut self,
        step_type: impl Into<String>,
        step: impl ChildChainExecutable + 'static,
    ) {
        self.register(step_type, RegisteredStep::ChildChain(Arc::new(step)));
    }

    /// Look up a step by type.
    pub fn get(&self, step_type: &str) -> Option<&RegisteredStep> {
        self.steps.get(step_type)
    }

    /// Execution mode of a registered step type.
    pub fn mode_of(&self, step_type: &str) -> Option<ExecutionMode> {
        self.steps.get(step_type).map(RegisteredStep::mode)
    }

    pub fn contains(&self, step_type: &str) -> bool {
        self.steps.contains_key(step_type)
    }

    /// All registered step types, sorted.
    pub fn step_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.steps.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }
}
