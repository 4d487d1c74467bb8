// ABOUTME: Scripted operator for tests: canned answers in, recorded interactions out.
// ABOUTME: Running out of answers is an operator error, so unexpected prompts fail loudly.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use tether::ssh::{Error, Operator, Result};
use zeroize::Zeroizing;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Interaction {
    Secret(String),
    Visible(String),
    Confirm(String),
    Message(String),
    Warning(String),
    Output(String),
}

#[derive(Default)]
pub struct ScriptedOperator {
    answers: Mutex<VecDeque<String>>,
    confirmations: Mutex<VecDeque<bool>>,
    log: Mutex<Vec<Interaction>>,
}

impl ScriptedOperator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue answers for secret and visible prompts, in order.
    pub fn with_answers<I, S>(self, answers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.answers
            .lock()
            .extend(answers.into_iter().map(Into::into));
        self
    }

    /// Queue yes/no answers, in order.
    pub fn with_confirmations(self, confirmations: impl IntoIterator<Item = bool>) -> Self {
        self.confirmations.lock().extend(confirmations);
        self
    }

    pub fn log(&self) -> Vec<Interaction> {
        self.log.lock().clone()
    }

    /// Number of prompts (secret, visible, or confirmation) shown.
    pub fn prompt_count(&self) -> usize {
        self.log
            .lock()
            .iter()
            .filter(|i| {
                matches!(
                    i,
                    Interaction::Secret(_) | Interaction::Visible(_) | Interaction::Confirm(_)
                )
            })
            .count()
    }

    pub fn messages(&self) -> Vec<String> {
        self.log
            .lock()
            .iter()
            .filter_map(|i| match i {
                Interaction::Message(text) => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn warnings(&self) -> Vec<String> {
        self.log
            .lock()
            .iter()
            .filter_map(|i| match i {
                Interaction::Warning(text) => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn output(&self) -> String {
        self.log
            .lock()
            .iter()
            .filter_map(|i| match i {
                Interaction::Output(text) => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    fn next_answer(&self, prompt: &str) -> Result<String> {
        self.answers
            .lock()
            .pop_front()
            .ok_or_else(|| Error::Operator(format!("no scripted answer for {prompt:?}")))
    }
}

#[async_trait]
impl Operator for ScriptedOperator {
    async fn prompt_secret(&self, prompt: &str) -> Result<Zeroizing<String>> {
        self.log.lock().push(Interaction::Secret(prompt.to_string()));
        self.next_answer(prompt).map(Zeroizing::new)
    }

    async fn prompt_visible(&self, prompt: &str) -> Result<String> {
        self.log.lock().push(Interaction::Visible(prompt.to_string()));
        self.next_answer(prompt)
    }

    async fn confirm(&self, question: &str) -> Result<bool> {
        self.log
            .lock()
            .push(Interaction::Confirm(question.to_string()));
        self.confirmations
            .lock()
            .pop_front()
            .ok_or_else(|| Error::Operator(format!("no scripted confirmation for {question:?}")))
    }

    fn message(&self, text: &str) {
        self.log.lock().push(Interaction::Message(text.to_string()));
    }

    fn warning(&self, text: &str) {
        self.log.lock().push(Interaction::Warning(text.to_string()));
    }

    fn output(&self, text: &str) {
        self.log.lock().push(Interaction::Output(text.to_string()));
    }
}
