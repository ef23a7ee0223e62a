//! Background Spotify listening-activity synchronization.
//!
//! This crate watches what a user is playing on Spotify and mirrors it
//! into an application backend: one listen event per track change, a live
//! activity flag, and locally projected playback progress between polls.
//! It authorizes against the accounts service with a stored refresh
//! token and keeps the token pair in an encrypted on-disk store.
//!
//! [`engine::Engine`] is the entry point. The embedding application
//! provides the seams in [`backend`] and receives observations over
//! broadcast and watch channels.
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

#[macro_use]
extern crate log;

pub mod activity;
pub mod backend;
pub mod bootstrap;
pub mod config;
pub mod credentials;
pub mod engine;
pub mod error;
pub mod http;
pub mod poller;
pub mod progress;
pub mod protocol;
pub mod recorder;
pub mod secrets;
pub mod signal;
pub mod snapshot;
pub mod spotify;
pub mod status;
pub mod store;
pub mod tokens;
