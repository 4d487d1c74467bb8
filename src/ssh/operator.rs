// ABOUTME: Operator interaction capability used for prompts and console output.
// ABOUTME: ConsoleOperator talks to the terminal; tests substitute a scripted fake.

use super::error::{Error, Result};
use async_trait::async_trait;
use std::io::{BufRead, Write};
use zeroize::Zeroizing;

/// Everything the client may ask of, or tell, the person at the keyboard.
#[async_trait]
pub trait Operator: Send + Sync {
    /// Ask for a value without echoing it.
    async fn prompt_secret(&self, prompt: &str) -> Result<Zeroizing<String>>;

    /// Ask for a value that is echoed while typed.
    async fn prompt_visible(&self, prompt: &str) -> Result<String>;

    /// Ask a yes/no question.
    async fn confirm(&self, question: &str) -> Result<bool>;

    /// Informational text for the operator (banners, notices).
    fn message(&self, text: &str);

    /// Non-fatal problems the operator should see.
    fn warning(&self, text: &str);

    /// Raw remote command output, written as received.
    fn output(&self, text: &str);
}

/// Interprets an answer the way the classic ssh prompts do: anything starting with "yes".
pub fn is_affirmative(answer: &str) -> bool {
    answer
        .trim_start()
        .get(..3)
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case("yes"))
}

/// Terminal-backed operator.
///
/// Blocking reads run on the blocking pool so prompts never stall the runtime.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleOperator;

impl ConsoleOperator {
    pub fn new() -> Self {
        Self
    }

    fn read_line(prompt: String) -> std::io::Result<String> {
        let mut stdout = std::io::stdout().lock();
        write!(stdout, "{prompt}")?;
        stdout.flush()?;
        drop(stdout);

        let mut line = String::new();
        let read = std::io::stdin().lock().read_line(&mut line)?;
        if read == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "end of input",
            ));
        }
        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    }
}

async fn run_blocking<T, F>(f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> std::io::Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| Error::Operator(e.to_string()))?
        .map_err(|e| Error::Operator(e.to_string()))
}

#[async_trait]
impl Operator for ConsoleOperator {
    async fn prompt_secret(&self, prompt: &str) -> Result<Zeroizing<String>> {
        let prompt = prompt.to_string();
        run_blocking(move || rpassword::prompt_password(prompt).map(Zeroizing::new)).await
    }

    async fn prompt_visible(&self, prompt: &str) -> Result<String> {
        let prompt = prompt.to_string();
        run_blocking(move || Self::read_line(prompt)).await
    }

    async fn confirm(&self, question: &str) -> Result<bool> {
        let prompt = format!("{question} (yes|no) ");
        let answer = run_blocking(move || Self::read_line(prompt)).await?;
        Ok(is_affirmative(&answer))
    }

    fn message(&self, text: &str) {
        println!("{text}");
    }

    fn warning(&self, text: &str) {
        eprintln!("Warning: {text}");
    }

    fn output(&self, text: &str) {
        let mut stdout = std::io::stdout().lock();
        let _ = stdout.write_all(text.as_bytes());
        let _ = stdout.flush();
    }
}
