//! Post-processing of completed downloads.
//!
//! Files found in finished downloads or in the drop folder are identified
//! from their own metadata (zip archives are unpacked first), moved into the library under a naming template
//! and recorded against the wanted item they turned out to be.

mod config;
mod detect;
mod extract;
mod placer;
mod reconciler;
mod template;
mod types;
mod unpack;

pub use config::{LibraryConfig, ReconcilerConfig};
pub use detect::{detect, extension, FileKind};
pub use extract::{FileMetadataExtractor, MetadataExtractor};
pub use placer::{ChecksumType, FilePlacer, Placement, PlacerConfig, PlacerError};
pub use reconciler::Reconciler;
pub use template::{render, render_path, safe_filename, TemplateValues};
pub use types::{PartialMetadata, ProcessError, ReconcileError, ReconcileSummary};
pub use unpack::{can_unpack, unpack_dir, unpack_zip, UnpackError};
