//! mapcore - map-server simulation core
//!
//! The timer scheduler, entity directory and monster AI engine of a
//! tick-driven MMORPG map server.

// ============================================
// Core Modules
// ============================================

/// Server configuration
pub mod config;
/// Server run-state and console input
pub mod core;
/// Tick source, timer heap and registry, scheduler pump
pub mod timer;
/// Cold-load of templates, spawn lists, maps and castles
pub mod database;
/// Entity directory, units and the mob engine
pub mod game;
/// Server process loops
pub mod servers;
