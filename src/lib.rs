//! referee - language-model judgments for deduction games
//!
//! A player types a free-form statement; the referee asks a chat-completion
//! model which scripted arguments the statement supports, then decides which
//! graph nodes unlock by evaluating authored prerequisite expressions.
//!
//! # Pipeline
//!
//! ```text
//! player text + active phase
//!         │
//!         ▼
//!   prompt::ContextBuilder ──► client::ProtocolClient ──► dispatch::ConfidenceDispatcher
//!                                                             │
//!                                         ┌───────────────────┴──────────────┐
//!                                         ▼                                  ▼
//!                               progress::Progress                  other subscribers
//!                                         │
//!                                         ▼
//!                          condition::Expression::evaluate
//! ```
//!
//! [`session::Session`] wires these pieces together for one level.

pub mod client;
pub mod condition;
pub mod config;
pub mod dispatch;
pub mod level;
pub mod model;
pub mod progress;
pub mod prompt;
pub mod session;
pub mod trace;

pub use client::{ClientError, ProtocolClient};
pub use condition::{EvaluationInputError, Expression, StatusLookup};
pub use config::{ClientConfig, Config};
pub use dispatch::{ConfidenceDispatcher, DispatchReport, SubscriptionId};
pub use level::{Level, LevelError};
pub use model::{
    Confidence, DiscoveryResult, EntityRecord, EntityRegistry, NodeRecord, NodeRegistry,
    RefereeResult,
};
pub use progress::{ArgumentStore, Progress, ProgressReport};
pub use prompt::{ContextBuilder, Prompt};
pub use session::{Outcome, Session};
