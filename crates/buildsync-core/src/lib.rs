//! Core domain types and traits for buildsync.
//!
//! This crate contains:
//! - Identifiers for tests, platforms, repositories, commit sets and build requests
//! - The build request, commit set and related domain objects
//! - Lookup traits the loader and synchronizers are given
//! - An in-memory catalog backed by a JSON snapshot

pub mod catalog;
pub mod domain;
pub mod error;
pub mod id;

pub use catalog::{BuildRequestLookup, BuildRequestSource, Catalog, InMemoryCatalog};
pub use domain::{
    BuildRequest, BuildRequestStatus, CommitSet, CommitSetItem, Platform, Repository, Test,
    UploadedFile,
};
pub use error::{Error, Result};
pub use id::{
    BuildRequestId, CommitSetId, PlatformId, RepositoryId, TestGroupId, TestId, UploadedFileId,
};
