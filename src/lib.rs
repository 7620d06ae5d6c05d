//! A monitoring engine for fleets of MikroTik RouterOS devices.
//!
//! Each router is polled on its own schedule by a [`supervisor::RouterSupervisor`],
//! speaking whichever of its three protocol tiers (native API, REST, SNMP) last
//! worked, falling back through the others on failure. Counter deltas become
//! bits-per-second via [`deriver::RateDeriver`], land in the [`timeseries`] store, and
//! feed the debounced [`alert`] engine. Operators wanting sub-minute visibility
//! subscribe through the [`fanout`] hub instead of waiting on the scheduled cadence.
//! A single [`scheduler::Scheduler`] owns every Supervisor and real-time poller's
//! lifecycle; [`engine::MonitoringEngine`] is the query/control façade an outer HTTP
//! layer calls.
//!
//! This crate is the engine only: it consumes routers, ports, and alerts as rows
//! owned by an external CRUD surface (see [`state::StateStore`]) and has no opinion
//! on authentication, HTTP routing, or the operator UI.

pub mod adapter;
pub mod alert;
pub mod config;
pub mod deriver;
pub mod domain;
pub mod engine;
pub mod error;
pub mod fanout;
pub mod scheduler;
pub mod state;
pub mod stats;
pub mod supervisor;
pub mod timeseries;
