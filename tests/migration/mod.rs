//! Scenario, step, and fixture modules for migration behaviour tests.

pub mod bdd_steps;
pub mod scenarios;
pub mod test_helpers;
