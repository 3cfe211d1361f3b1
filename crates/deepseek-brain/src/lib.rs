//! DeepSeek chat-completion client and prompt assembly.
//!
//! This crate owns everything between the stored conversation history and
//! the upstream model: the consultation system prompts, the message-list
//! assembly for first and follow-up turns, and a streaming client that
//! decodes the vendor's SSE chunk frames into plain text fragments.
//!
//! # Example
//!
//! ```no_run
//! use deepseek_brain::{DeepSeekBrain, prompt};
//!
//! # async fn example() -> Result<(), deepseek_brain::BrainError> {
//! let brain = DeepSeekBrain::from_env()?;
//! let messages = prompt::chat_messages(None, &[], "今年财运如何？");
//!
//! let mut stream = brain.chat_stream(messages).await?;
//! while let Some(fragment) = stream.next_delta().await? {
//!     print!("{}", fragment);
//! }
//! # Ok(())
//! # }
//! ```

pub mod api_types;
pub mod brain;
pub mod config;
pub mod error;
pub mod prompt;

pub use api_types::ChatMessage;
pub use brain::{ChatStream, DeepSeekBrain};
pub use config::DeepSeekConfig;
pub use error::BrainError;
pub use prompt::SeekerProfile;
