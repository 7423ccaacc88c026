//! Ask command handler.
//!
//! Runs one question through the pipeline and prints the answer.

use std::io::Write;

use clap::Args;
use futures::StreamExt;
use enclave_core::{config::AppConfig, AppResult};
use enclave_router::RoutedQuery;

use super::runtime::Runtime;

/// Ask a question against the documents your identity can read
#[derive(Args, Debug)]
pub struct AskCommand {
    /// The question to ask
    pub question: String,

    /// Identity to answer for (omit for anonymous access)
    #[arg(short, long, env = "ENCLAVE_USER")]
    pub user: Option<String>,

    /// Conversation session; answers are remembered within it
    #[arg(short, long)]
    pub session: Option<String>,

    /// Print the answer once it is complete
    #[arg(long)]
    pub no_stream: bool,

    /// Output as JSON (answer, mode, confidence and the routing context)
    #[arg(long)]
    pub json: bool,
}

impl AskCommand {
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        tracing::debug!(options = ?self, "executing ask command");

        let runtime = Runtime::build(config).await?;
        let routed = runtime
            .pipeline
            .run(&self.question, self.user.as_deref(), self.session.as_deref())
            .await?;

        if self.json {
            print_json(routed).await
        } else {
            print_answer(routed, !self.no_stream).await
        }
    }
}

/// Write the answer to stdout, piece by piece when `stream` is set.
pub async fn print_answer(routed: RoutedQuery, stream: bool) -> AppResult<()> {
    tracing::debug!(
        mode = routed.mode.as_str(),
        confidence = routed.confidence,
        "answer ready"
    );

    if !stream {
        let text = routed.answer.collect().await?;
        println!("{}", text);
        return Ok(());
    }

    let pieces = routed.answer.into_stream();
    futures::pin_mut!(pieces);
    let mut stdout = std::io::stdout();
    while let Some(piece) = pieces.next().await {
        let piece = piece?;
        print!("{}", piece);
        stdout.flush().ok();
    }
    println!();
    Ok(())
}

async fn print_json(routed: RoutedQuery) -> AppResult<()> {
    let RoutedQuery {
        context,
        mode,
        confidence,
        answer,
    } = routed;
    let text = answer.collect().await?;

    let output = serde_json::json!({
        "answer": text,
        "mode": mode.as_str(),
        "confidence": confidence,
        "sources": context.candidates.iter().map(|c| serde_json::json!({
            "documentId": c.document_id,
            "title": c.title,
            "scope": c.scope,
            "score": c.score,
        })).collect::<Vec<_>>(),
        "context": context,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
