//! Export/import of portable bundles
//!
//! A bundle is a JSON snapshot of tool stores and preferences. Export reads
//! through the facade; import validates the bundle as a whole, then writes
//! store by store in replace or merge mode.

mod bundle;
mod errors;
mod service;

pub use bundle::{
    read_bundle_file, validate, Bundle, BundleEntry, BundleMetadata, ValidatedBundle, BUNDLE_VERSION,
    EXPORT_FORMAT,
};
pub use errors::{TransferError, TransferResult};
pub use service::{ExportImportService, ImportMode, ImportReport};
