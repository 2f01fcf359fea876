pub mod auth;
pub mod billing;
pub mod calendar;
pub mod config;
pub mod error;
pub mod feedback;
pub mod geo;
pub mod integrations;
pub mod memories;
pub mod messaging;
pub mod middleware;
pub mod phone;
pub mod plans;
pub mod rate_limit;
pub mod routes;
pub mod session;
pub mod state;
pub mod stripe;
pub mod user;
pub mod views;
pub mod webhook;

#[cfg(test)]
pub(crate) mod test_support;
