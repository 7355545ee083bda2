//! foundationsctl - terminal front end for Identity Foundations
//!
//! Takes the assessment through the shared session core, shows history,
//! generates insights and administers prompts against `foundationsd`.

pub mod auth;
pub mod client;
pub mod commands;
pub mod display;
pub mod draft;
pub mod errors;
pub mod wizard;
