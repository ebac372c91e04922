//! Utils module - shared helpers

pub mod logging;
