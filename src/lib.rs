//! vibecode: a coding agent that plans, edits and runs project code.
//!
//! A chat message goes to the [`agent::Orchestrator`], which either answers
//! directly or runs a reasoning chain. Steps call tools through the
//! [`tools::Dispatcher`]; file tools stay inside the project's
//! [`workspace::Workspace`] and code runs in a per-project container managed
//! by [`sandbox::SandboxDriver`]. Progress is published on
//! [`notify::NotificationHub`] and every session, step and chat message is
//! kept in a [`store::RecordStore`].

pub mod agent;
pub mod config;
pub mod diff;
pub mod error;
pub mod llm;
pub mod notify;
pub mod sandbox;
pub mod store;
pub mod tools;
pub mod workspace;
