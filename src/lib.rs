/*!
 * RxFlow Engine - Library Interface
 *
 * This module exposes the engine's internal modules for use in
 * integration tests and by transport layers embedding the engine.
 *
 * The administrative CLI entry point is in main.rs.
 */

// Public module declarations
pub mod config;
pub mod models;
pub mod ports;
pub mod services;
pub mod store;
pub mod utils;
