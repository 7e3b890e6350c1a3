//! Game world simulation.
//!
//! [`world::MapWorld`] ties the pieces together; [`mob`] holds the monster
//! engine. Everything here runs on one thread, driven by the timer pump.

pub mod hooks;
pub mod item;
pub mod map;
pub mod mob;
pub mod npc;
pub mod path;
pub mod pc;
pub mod types;
pub mod unit;
pub mod world;
