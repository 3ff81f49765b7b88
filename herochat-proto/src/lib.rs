//! Shared protocol definitions for the `HeroChat` wire format.

pub mod api;
pub mod codec;
pub mod event;
pub mod message;
pub mod presence;
