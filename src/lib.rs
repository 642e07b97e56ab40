pub mod args;
pub(crate) mod callback;
pub mod device;
pub mod error;
pub mod fastboot;
pub mod filesync;
pub mod fs;
pub mod protocol;
pub mod signer;
pub mod transport;
pub mod tree;

/// Catch-all result alias for the CLI and filesystem-walking layers, which
/// lean on `chainerror` to annotate whatever underlying error bubbled up
/// with the call site that saw it.
pub type CResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync + 'static>>;

/// Alias matching the teacher's original naming in `fs`/`tree`.
pub type Result<T> = CResult<T>;
