// Scripted `CommandRunner` for unit tests.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;

use super::{CommandOutput, CommandRunner};
use crate::error::CoreError;

type Handler = Arc<dyn Fn(&str, &[&str]) -> Option<CommandOutput> + Send + Sync>;

/// Answers commands from registered responses and records every call.
///
/// A response matches when the full command line starts with its prefix;
/// later registrations win. Unmatched commands succeed with empty output.
#[derive(Default)]
pub(crate) struct MockRunner {
    responses: Mutex<Vec<(String, CommandOutput)>>,
    handlers: Mutex<Vec<Handler>>,
    calls: Mutex<Vec<String>>,
}

impl MockRunner {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn on(&self, prefix: &str, output: CommandOutput) -> &Self {
        lock(&self.responses).push((prefix.to_owned(), output));
        self
    }

    /// Dynamic responder consulted before the static responses.
    pub(crate) fn with_handler(
        &self,
        handler: impl Fn(&str, &[&str]) -> Option<CommandOutput> + Send + Sync + 'static,
    ) -> &Self {
        lock(&self.handlers).push(Arc::new(handler));
        self
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        lock(&self.calls).clone()
    }

    /// Calls whose command line starts with `prefix`.
    pub(crate) fn calls_matching(&self, prefix: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c.starts_with(prefix))
            .collect()
    }

    pub(crate) fn clear_calls(&self) {
        lock(&self.calls).clear();
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

#[async_trait]
impl CommandRunner for MockRunner {
    async fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput, CoreError> {
        let line = std::iter::once(program)
            .chain(args.iter().copied())
            .collect::<Vec<_>>()
            .join(" ");
        lock(&self.calls).push(line.clone());

        let handlers = lock(&self.handlers).clone();
        for handler in handlers.iter().rev() {
            if let Some(output) = handler(program, args) {
                return Ok(output);
            }
        }

        let responses = lock(&self.responses);
        Ok(responses
            .iter()
            .rev()
            .find(|(prefix, _)| line.starts_with(prefix.as_str()))
            .map(|(_, output)| output.clone())
            .unwrap_or_default())
    }
}
