//! Eco-action scan verification service.
//!
//! Actors submit photos of sustainable actions. Each submission becomes a
//! background job that scores the photo with Cloudflare Workers AI, may issue
//! a partner voucher, and credits the actor's running total on a leaderboard.

pub mod app_state;
pub mod client;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod routes;
pub mod services;
