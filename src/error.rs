use thiserror::Error;

/// Errors surfaced at the boundary of the reconstruction core.
///
/// Numerical edge cases (zero sensitivity, empty Siddon path, a
/// near-zero line estimate) are never surfaced here: they are handled
/// in place by epsilon-guarded arithmetic and `LorCache::disable`.
///
/// There is no "unallocated volume/projection" variant: `VolData` and
/// `ProjData` cannot exist in an unallocated state in the first place
/// (construction is fallible and returns `Config`/`VolumeMismatch`
/// before a value is ever produced), so that invariant is enforced by
/// the type system rather than by a runtime error path.
#[derive(Debug, Error)]
pub enum PetError {
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("volume headers do not match: {0}")]
    VolumeMismatch(String),
    #[error("projection headers do not match: {0}")]
    ProjectionMismatch(String),
    #[error("external resource unavailable: {0}")]
    Resource(String),
}

pub type Result<T> = std::result::Result<T, PetError>;
