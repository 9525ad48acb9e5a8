//! Stage orchestration.
//!
//! Each stage is one `async fn` that resolves its paths, checks its inputs
//! before creating anything, hands the work to an engine and returns a
//! result record. Engine errors are returned unchanged.

mod analyse;
mod extract;
mod package;

pub use analyse::{analyse, analyse_from_env};
pub use extract::extract;
pub use package::package;
