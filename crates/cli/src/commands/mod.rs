//! Command handlers for the Enclave CLI.

pub mod ask;
pub mod chat;
mod runtime;
pub mod scopes;

pub use ask::AskCommand;
pub use chat::ChatCommand;
pub use scopes::ScopesCommand;
