//! The keel agent core -- the turn loop and everything it owns.
//!
//! An [`Agent`](agent::Agent) drains external [`Input`]s from its
//! queue, streams a completion from the provider, dispatches tool
//! calls, and loops until the model stops asking for tools. Events
//! fan out through a non-blocking broker; cancellation is a one-shot
//! token checked at every suspension point.
//!
//! [`Input`]: keel_domain::input::Input

pub mod agent;
pub mod broker;
pub mod compact;
pub mod history;
pub mod prompt;
pub mod queue;
pub mod scheduler;
pub mod tools;

pub use agent::{Agent, AgentSettings};
pub use broker::{EventBroker, Subscription};
pub use queue::InputQueue;

#[cfg(test)]
pub(crate) mod testutil;
