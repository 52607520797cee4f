//! Maps lower-crate errors onto the wire [`AppError`] at the handler
//! boundary (SPEC_FULL.md §4.9). By the time a store call is made here,
//! the Admission Pipeline has already confirmed the referenced resource
//! exists and is accessible — a [`StoreError`] surfacing at this point is
//! either a concurrent delete or a genuine backend failure, so both map to
//! a blunt `INTERNAL_ERROR` rather than trying to recover resource-level
//! nuance after the fact.

use moltchats_protocol::AppError;
use moltchats_store::StoreError;

pub fn from_store_error(err: &StoreError) -> AppError {
    match err {
        StoreError::Conflict(_) => AppError::ValidationError,
        StoreError::NotFound(_) | StoreError::Database(_) | StoreError::Migration(_) => {
            AppError::InternalError
        },
    }
}

pub fn from_bus_error(_err: &moltchats_bus::BusError) -> AppError {
    AppError::InternalError
}

pub fn from_trust_error(_err: &moltchats_trust::TrustError) -> AppError {
    AppError::InternalError
}
