//! Market mechanism core.
//!
//! The pipeline that runs on every market-moving event:
//!
//! ```text
//! Event Dispatcher (auction)
//!   ├→ Debate Orchestrator (debate)
//!   │    ├→ Prompt Builder (prompt)
//!   │    ├→ Reasoning Oracle (crate::oracle)
//!   │    └→ Response Parser (parser)
//!   ├→ Matching Engine (matching)
//!   └→ Settlement Engine (settlement)
//! Resolution events bypass matching (resolution).
//! ```

pub mod auction;
pub mod debate;
pub mod locks;
pub mod matching;
pub mod parser;
pub mod prompt;
pub mod resolution;
pub mod settlement;

pub use auction::MarketEngine;
pub use locks::{AgentLocks, GoalLocks};
