//! Explicit state machines for the long-running device cycles.
//!
//! | Machine                         | States                                                    |
//! |---------------------------------|-----------------------------------------------------------|
//! | [`feeding::FeedState`]          | Idle · Dispensing(n) · Retrying(n) · Confirmed · Exhausted |
//! | [`publish::PublishPhase`]       | Idle · Publishing · AwaitingNetwork(link) · ConnectingBroker |
//!
//! Transitions are plain functions over the state enums so they can be
//! tested without threads; the controllers wrap them with the ports and
//! the event coordinator.

pub mod feeding;
pub mod publish;
