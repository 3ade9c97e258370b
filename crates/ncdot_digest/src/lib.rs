pub mod digest;

pub use digest::{build_digest, DigestPaths};
