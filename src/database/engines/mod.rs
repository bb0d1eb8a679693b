//! Concrete database engines

pub mod memory;
pub mod mongodb;
