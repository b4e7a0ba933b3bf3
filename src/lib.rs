//! # ptrmemo
//!
//! Memoization engine for indirect-call dispatch.
//!
//! Interpreters and binary translators that dispatch small register-ALU handlers through a
//! table of function pointers tend to call them with the same few argument values over and
//! over. `ptrmemo` records the post-state (register writes and next program counter) of each
//! handler per calling context and replays it instead of re-running the handler, while
//! sampling replays against the real handler to catch handlers that are not actually pure.
//!
//! ```
//! use ptrmemo::memo::{MemoEngine, PostState, Slot};
//! use ptrmemo::MemoConfig;
//!
//! let engine = MemoEngine::new(MemoConfig::default())?;
//! let add7 = engine.register_call_site(0x1000u64, [Slot(10)])?;
//!
//! let post = engine.dispatch(&add7, &[5], |input| {
//!     Ok::<_, std::convert::Infallible>(PostState::new(0x2000).with_write(10, input[0] + 7))
//! })?;
//! assert_eq!(post.value_of(10), Some(12));
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod cli;
pub mod config;
pub mod error;
pub mod memo;

pub use config::MemoConfig;
pub use error::{ConfigurationError, DispatchError};
pub use memo::{CallSite, MemoEngine, PostState};
