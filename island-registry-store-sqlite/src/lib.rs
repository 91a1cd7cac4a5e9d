// island-registry-store-sqlite/src/lib.rs
// ============================================================================
// Module: Island Registry SQLite Store
// Description: Durable RegistryStore backed by SQLite WAL.
// Purpose: Persist packages, versions, distributions, owners, and tokens.
// Dependencies: island-registry-core, rusqlite, serde_json, thiserror
// ============================================================================

//! ## Overview
//! A durable [`island_registry_core::RegistryStore`] over `SQLite`. Every
//! publish commits inside one transaction; unique primary keys on the package
//! name and on `(package, version)` make concurrent claims and duplicate
//! publishes lose deterministically at commit time.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod store;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use store::SqliteRegistryStore;
pub use store::SqliteStoreConfig;
pub use store::SqliteStoreError;
pub use store::SqliteStoreMode;
pub use store::SqliteSyncMode;
