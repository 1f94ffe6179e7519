mod core;
pub mod models;

pub use core::{
    ChatSession, RATE_LIMIT_APOLOGY, RATE_LIMIT_NOTICE, SessionError, SubmitOutcome, TurnEvent,
    TurnState,
};
pub use models::{INTRODUCTION_TRIGGER, Message, Role, Transcript};
