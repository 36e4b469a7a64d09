//! Jira webhook intake: signature check, payload parsing, eligibility.

pub mod events;
pub mod handler;
pub mod signature;
