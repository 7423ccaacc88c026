//! Chat command handler.
//!
//! Reads questions from stdin, one per line, within a single session.

use std::io::Write;

use clap::Args;
use enclave_core::{config::AppConfig, AppError, AppResult};
use enclave_router::HistoryStore;
use tokio::io::{AsyncBufReadExt, BufReader};

use super::ask::print_answer;
use super::runtime::Runtime;

/// Interactive conversation (`/clear` forgets the session, `/exit` quits)
#[derive(Args, Debug)]
pub struct ChatCommand {
    /// Identity to answer for (omit for anonymous access)
    #[arg(short, long, env = "ENCLAVE_USER")]
    pub user: Option<String>,

    /// Resume a named session instead of starting a new one
    #[arg(short, long)]
    pub session: Option<String>,
}

impl ChatCommand {
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        let runtime = Runtime::build(config).await?;
        let session = self
            .session
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        tracing::info!(session = %session, user = self.user.as_deref().unwrap_or("anonymous"), "chat started");

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            eprint!("> ");
            std::io::stderr().flush().ok();

            let Some(line) = lines.next_line().await? else {
                break;
            };
            let line = line.trim();
            match line {
                "" => continue,
                "/exit" | "/quit" => break,
                "/clear" => {
                    runtime.history.clear(&session).await?;
                    eprintln!("(conversation cleared)");
                    continue;
                }
                _ => {}
            }

            let routed = match runtime
                .pipeline
                .run(line, self.user.as_deref(), Some(session.as_str()))
                .await
            {
                Ok(routed) => routed,
                Err(AppError::Validation(msg)) => {
                    eprintln!("{}", msg);
                    continue;
                }
                Err(e) => return Err(e),
            };

            if let Err(e) = print_answer(routed, true).await {
                tracing::warn!(error = %e, "answer interrupted");
                eprintln!("(the answer was interrupted; please try again)");
            }
        }

        let turns = runtime.history.messages(&session).await?.len();
        tracing::info!(session = %session, turns, "chat ended");
        Ok(())
    }
}
