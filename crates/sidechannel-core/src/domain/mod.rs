//! Domain models for sidechannel.
//!
//! Canonical definitions for the core entities:
//! - `Message`: an advisory posted into a thread mailbox
//! - `NewMessage`: a send candidate, validated at the store boundary
//! - `Advisory`: handler output before thread/step/sender are filled in
//! - `StepSnapshot`: the driving loop's record of one step

pub mod error;
pub mod message;
pub mod snapshot;

pub use error::{Result, SidechannelError, ValidationError};
pub use message::{
    fingerprint_text, validate_confidence, Advisory, Message, MessageCategory, NewMessage,
};
pub use snapshot::StepSnapshot;
