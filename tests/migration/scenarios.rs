//! BDD scenarios for the migration coordination flows.

use rstest_bdd_macros::scenario;

use super::test_helpers::{MigrationContext, migration_context};

#[scenario(
    path = "tests/features/migration.feature",
    name = "A migration runs to completion"
)]
fn scenario_migration_completes(migration_context: MigrationContext) {
    let _ = migration_context;
}

#[scenario(
    path = "tests/features/migration.feature",
    name = "A failed migration surfaces the worker errors"
)]
fn scenario_failure_surfaces_worker_errors(migration_context: MigrationContext) {
    let _ = migration_context;
}

#[scenario(
    path = "tests/features/migration.feature",
    name = "Cancelling when nothing is running sends no request"
)]
fn scenario_cancel_without_migration(migration_context: MigrationContext) {
    let _ = migration_context;
}

#[scenario(
    path = "tests/features/migration.feature",
    name = "Cancelling the running migration is acknowledged"
)]
fn scenario_cancel_is_acknowledged(migration_context: MigrationContext) {
    let _ = migration_context;
}
