//! Cadastre selection service.
//!
//! ARCHITECTURE
//! ============
//! A map client searches cadastral parcels, keeps the results in tabs, and
//! selects some of them. This crate keeps that selection and turns every
//! change into a full, styled overlay upsert for the host map:
//!
//! ```text
//!   client frame ─▶ routes::ws ─▶ reaction::ReactionEngine ─▶ delivery ─▶ overlay / viewport frames
//!                          │             │
//!                          │             ├─ selection (tabs, selected ids)
//!                          │             └─ projection (styled features, bbox)
//!                          └─▶ request::EligibilityGate ─▶ eligibility (HTTP)
//! ```
//!
//! Each websocket connection owns one `session::Session`.

pub mod config;
pub mod delivery;
pub mod eligibility;
pub mod frame;
pub mod plots;
pub mod projection;
pub mod reaction;
pub mod request;
pub mod routes;
pub mod selection;
pub mod session;
pub mod state;
