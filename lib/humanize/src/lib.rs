//! Vendored offline copy of the `humanize` crate used by `sluice`.
//!
//! Upstream is `https://github.com/f1shl3gs/humanize`, pinned by git rev in the
//! crate's original `Cargo.toml`. That host is not reachable in this build
//! environment, so the byte/duration parsing logic (taken verbatim from the
//! upstream sources shipped in the reference pack) is vendored here together
//! with the `serde`/`serde_option` adapter modules referenced via
//! `#[serde(with = "...")]` in `sluice`.

pub mod bytes;
pub mod duration;
