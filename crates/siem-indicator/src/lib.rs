//! IoC CRUD, APT-attribution tag derivation, and the IoC dashboard
//! aggregations. The service depends only on [`DocumentClient`] and
//! [`AptLookup`], narrow interfaces wired up once at startup, so it can
//! be unit tested without a live document store or APT-group service.
//!
//! [`DocumentClient`]: siem_store::DocumentClient

pub mod apt_lookup;
pub mod service;
pub mod source_fetch;

pub use apt_lookup::{AptLookup, RepositoryAptLookup};
pub use service::{IndicatorService, NewIoc, INDEX_PREFIX};
pub use source_fetch::{parse_feed, FeedEntry, FeedIoc, FetchError, FetchSummary, SourceFetchService};
