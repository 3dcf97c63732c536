//! Scripted command runner for tests
//!
//! Records every command it is asked to run and answers from prefix rules
//! matched against the command line. The most recently added matching rule
//! wins; a command no rule matches succeeds with empty output.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use crate::runner::{CommandOutput, CommandRunner, CommandSpec};

struct Rule {
    prefix: String,
    /// Answers handed out in order; the last one repeats
    outputs: VecDeque<CommandOutput>,
}

/// A [`CommandRunner`] that plays back canned outputs
#[derive(Default)]
pub struct ScriptedRunner {
    rules: Mutex<Vec<Rule>>,
    calls: Mutex<Vec<CommandSpec>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl ScriptedRunner {
    /// A runner where every command succeeds
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer commands starting with `prefix` with `output`, every time
    pub fn on(&self, prefix: impl Into<String>, output: CommandOutput) -> &Self {
        self.on_sequence(prefix, vec![output])
    }

    /// Answer commands starting with `prefix` with `outputs` in turn, repeating the last
    pub fn on_sequence(&self, prefix: impl Into<String>, outputs: Vec<CommandOutput>) -> &Self {
        lock(&self.rules).push(Rule {
            prefix: prefix.into(),
            outputs: outputs.into(),
        });
        self
    }

    /// Every command line run so far, in order
    pub fn calls(&self) -> Vec<String> {
        lock(&self.calls).iter().map(CommandSpec::command_line).collect()
    }

    /// Every spec run so far, in order
    pub fn specs(&self) -> Vec<CommandSpec> {
        lock(&self.calls).clone()
    }

    /// Command lines starting with `prefix`
    pub fn calls_matching(&self, prefix: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c.starts_with(prefix))
            .collect()
    }

    /// Number of command lines starting with `prefix`
    pub fn count(&self, prefix: &str) -> usize {
        self.calls_matching(prefix).len()
    }

    /// Index of the first command line starting with `prefix`
    pub fn position(&self, prefix: &str) -> Option<usize> {
        self.calls().iter().position(|c| c.starts_with(prefix))
    }

    fn answer(&self, line: &str) -> CommandOutput {
        let mut rules = lock(&self.rules);
        let Some(rule) = rules.iter_mut().rev().find(|r| line.starts_with(&r.prefix)) else {
            return CommandOutput::ok("");
        };
        if rule.outputs.len() > 1 {
            rule.outputs.pop_front().unwrap_or_else(|| CommandOutput::ok(""))
        } else {
            rule.outputs
                .front()
                .cloned()
                .unwrap_or_else(|| CommandOutput::ok(""))
        }
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(&self, spec: &CommandSpec) -> CommandOutput {
        lock(&self.calls).push(spec.clone());
        self.answer(&spec.command_line())
    }
}
