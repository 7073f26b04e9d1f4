//! Authority integration tests
//!
//! Directory mutations and the sync scheduling that follows them, bulk import,
//! and the authority's HTTP surface.

mod http;
