//! Shared data-model types for the Driftchat delivery layer.

pub mod message;
