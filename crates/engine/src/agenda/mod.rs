//! Agenda scheduling and per-meeting generation recipes.

pub mod recipes;
pub mod scheduler;

pub use recipes::{MAX_ITEMS, agenda_for};
pub use scheduler::{AgendaScheduler, CarriedItem};
