//! `HeroChat`: delivery-status tracking client library for HabitHero chat.

pub mod config;
pub mod net;
pub mod tracker;
pub mod transport;
