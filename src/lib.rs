//! Tourguard - safety monitoring and alerting for tourists in remote regions.
//!
//! # Overview
//!
//! Tourists register and receive a digital identity. Their devices report
//! positions, panic signals and check-ins. Tourguard tests every position
//! against a catalog of geofence zones, derives a safety status per tourist
//! (`safe`, `warning`, `emergency`), raises deduplicated alerts, and lets
//! authorities resolve alerts or escalate critical ones into incident
//! reports (E-FIRs).
//!
//! # Privacy
//!
//! Names, passport numbers and phone numbers are stored for the authorities
//! but never logged. Logs identify tourists by their issued identity id.
//!
//! # Modules
//!
//! - [`geometry`]: Point-in-polygon and great-circle distance
//! - [`identity`]: Identity issuance and the scannable credential
//! - [`zones`]: The geofence catalog and zone evaluation
//! - [`status`]: Status resolution
//! - [`alerts`]: The alert engine and its lifecycle
//! - [`incident`]: Incident report generation
//! - [`monitor`]: The service tying the above together
//! - [`storage`]: SQLite persistence
//! - [`retry`]: Timeouts and backoff for external calls
//! - [`api`]: HTTP API handlers
//!
//! # API Endpoints
//!
//! - `POST /tourists` - Register a tourist
//! - `GET /tourists`, `GET /tourists/:id` - Roster
//! - `POST /tourists/:id/position` - Location feed
//! - `POST /tourists/:id/panic` - Panic signal
//! - `POST /tourists/:id/check-in` - Check-in
//! - `GET /zones` - Geofence catalog
//! - `GET /alerts` - Alerts, filterable by tourist, type and open state
//! - `POST /alerts/:id/resolve`, `POST /alerts/:id/escalate` - Operator actions
//! - `GET /incidents`, `GET /incidents/:id` - Incident reports
//! - `GET /stats` - Dashboard counters
//! - `GET /health` - Health check

pub mod alerts;
pub mod api;
pub mod config;
pub mod error;
pub mod geometry;
pub mod identity;
pub mod incident;
pub mod model;
pub mod monitor;
pub mod retry;
pub mod status;
pub mod storage;
pub mod zones;
