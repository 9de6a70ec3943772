//! Analysis Request API Library
//!
//! Customers ask for analyses of companies, analysts are assigned at random to
//! approved requests, and the resulting scores flow back into the company.
//!
//! # Modules
//!
//! - `api`: Route table, role gates and HTTP layers.
//! - `access`: Bearer-token authentication middleware.
//! - `accounts`: Profile and company registration.
//! - `assignment`: Random analyst selection.
//! - `auth`: Passwords, token pairs and refresh-token rotation.
//! - `config`: Configuration management.
//! - `db`: Database connection and migrations.
//! - `db_storage`: Postgres implementation of the store.
//! - `errors`: Error handling types.
//! - `handlers`: HTTP request handlers.
//! - `lifecycle`: Analysis-request state machine.
//! - `memory_store`: In-process store for tests and local runs.
//! - `models`: Core data models and wire payloads.
//! - `pagination`: Page/limit handling.
//! - `scoring`: Score updates and company score propagation.
//! - `store`: Persistence boundary.

pub mod access;
pub mod accounts;
pub mod api;
pub mod assignment;
pub mod auth;
pub mod config;
pub mod db;
pub mod db_storage;
pub mod errors;
pub mod handlers;
pub mod lifecycle;
pub mod memory_store;
pub mod models;
pub mod pagination;
pub mod scoring;
pub mod store;
