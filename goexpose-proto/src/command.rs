/// The `CommandSource` contract: a line-oriented stream of whitespace-split,
/// lowercased tokens (spec §6's command grammar: `pair <host>`, `unpair`,
/// `expose <port>`, `hide <port>`, `exit`).
use tokio::io::{AsyncBufReadExt, BufReader};

#[async_trait::async_trait]
pub trait CommandSource: Send {
    /// Yields the next parsed command line, or `None` at end of input.
    async fn next_command(&mut self) -> Option<Vec<String>>;
}

/// Reads commands from standard input, one line at a time.
pub struct StdinCommandSource {
    lines: tokio::io::Lines<BufReader<tokio::io::Stdin>>,
}

impl StdinCommandSource {
    pub fn new() -> Self {
        Self { lines: BufReader::new(tokio::io::stdin()).lines() }
    }
}

impl Default for StdinCommandSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl CommandSource for StdinCommandSource {
    async fn next_command(&mut self) -> Option<Vec<String>> {
        loop {
            let line = match self.lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) | Err(_) => return None,
            };
            let tokens = tokenize(&line);
            if !tokens.is_empty() {
                return Some(tokens);
            }
        }
    }
}

/// Lowercase, trim, and whitespace-split one input line into tokens.
pub fn tokenize(line: &str) -> Vec<String> {
    line.to_lowercase()
        .split_whitespace()
        .map(|s| s.to_string())
        .collect()
}
