//! Built-in packs.
//!
//! `meta` is assembled by the registry itself; `iam` is the credential and
//! verification surface hosts enable alongside their own domain packs.

pub mod iam;
pub mod meta;

pub use iam::IamPack;
