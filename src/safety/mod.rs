//! Confirmation gate between the scan and the first batch write.
//!
//! The prompt runs after the scan so the user sees how many posts will be
//! deleted. It is skipped in dry-run mode, with `--force`, with JSON
//! logging, and when stdin/stdout are not a terminal.

use crate::config::Config;
use crate::types::error::BskyrmError;
use anyhow::{Result, anyhow};
use std::io::{BufRead, IsTerminal, Write};

/// Trait for handling user prompts, enabling testability.
pub trait PromptHandler: Send + Sync {
    /// Show `summary`, ask for confirmation and return the trimmed answer.
    fn read_confirmation(&self, summary: &str) -> Result<String>;

    /// Check if the current environment supports interactive prompts.
    fn is_interactive(&self) -> bool;
}

/// Default prompt handler using stdin/stdout.
pub struct StdioPromptHandler;

impl PromptHandler for StdioPromptHandler {
    fn read_confirmation(&self, summary: &str) -> Result<String> {
        println!("{summary}");
        print!("Type 'yes' to confirm deletion: ");
        std::io::stdout().flush()?;

        let mut input = String::new();
        std::io::stdin().lock().read_line(&mut input)?;
        Ok(input.trim().to_string())
    }

    fn is_interactive(&self) -> bool {
        std::io::stdin().is_terminal() && std::io::stdout().is_terminal()
    }
}

pub struct SafetyChecker {
    dry_run: bool,
    force: bool,
    json_logging: bool,
    prompt_handler: Box<dyn PromptHandler>,
}

impl SafetyChecker {
    pub fn new(config: &Config) -> Self {
        Self::with_prompt_handler(config, Box::new(StdioPromptHandler))
    }

    pub fn with_prompt_handler(config: &Config, prompt_handler: Box<dyn PromptHandler>) -> Self {
        let json_logging = config
            .tracing_config
            .map(|tc| tc.json_tracing)
            .unwrap_or(false);

        Self {
            dry_run: config.dry_run,
            force: config.force,
            json_logging,
            prompt_handler,
        }
    }

    /// `Ok(())` to proceed, [`BskyrmError::Cancelled`] if the user declined.
    pub fn check_before_deletion(&self, target_domain: &str, match_count: usize) -> Result<()> {
        if self.dry_run || self.force || self.should_skip_prompt() {
            return Ok(());
        }

        let summary = format!(
            "{match_count} post(s) linking to '{target_domain}' will be permanently deleted."
        );
        let input = self.prompt_handler.read_confirmation(&summary)?;
        if input != "yes" {
            return Err(anyhow!(BskyrmError::Cancelled));
        }

        Ok(())
    }

    fn should_skip_prompt(&self) -> bool {
        // Prompt text would corrupt structured output.
        if self.json_logging {
            return true;
        }

        !self.prompt_handler.is_interactive()
    }
}
