/*!
# PET OSEM reconstruction core

Ordered-subsets expectation-maximization image reconstruction for PET
sinograms: scanner and volume geometry, Siddon ray tracing, forward
and backward projection, and the two OSEM iteration drivers (plain and
resolution-recovery).

The core never touches storage. Headers are plain structs an external
collaborator parses from whatever parameter file format a deployment
uses; intermediate volumes are handed to the caller through a
checkpoint callback rather than written here directly.
*/

pub mod config;
pub mod error;
pub mod geom_types;
pub mod lor_cache;
pub mod operations;
pub mod proj_data;
pub mod proj_geom;
pub mod projectors;
pub mod recon;
pub mod scanner;
pub mod siddon;
pub mod vol;

pub use config::OsemConfig;
pub use error::{PetError, Result};
pub use geom_types::{Axis, Coord3, PathElement, VolOffset, VolSize, VoxelExtent};
pub use lor_cache::LorCache;
pub use proj_data::ProjData;
pub use proj_geom::{ProjGeometry, ProjHeader, ProjLayout};
pub use recon::{osem, osem_reso_reco};
pub use scanner::{Scanner, ScannerGeometry, ScannerHeader};
pub use siddon::Siddon;
pub use vol::{VolData, VolGeometry, VolHeader};
