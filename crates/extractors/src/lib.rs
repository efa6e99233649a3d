//! Site extractor framework for the polarity workspace.
//!
//! An extractor turns a reference (site URL or content identifier) into a
//! populated content tree with streams attached to every leaf. The
//! framework provides the shared HTTP handle with cookie management, the
//! capability descriptors, the host-regex registry, the filter grammar and
//! the generic extraction driver; each site module under [`sites`]
//! implements the [`VideoExtractor`] contract.

pub mod cookies;
pub mod driver;
pub mod error;
pub mod extractor;
pub mod filters;
pub mod registry;
pub mod sites;
mod utils;

pub use cookies::{CookieJar, CookieRecord};
pub use driver::{ExtractionDriver, MediaSink, SearchResult};
pub use error::ExtractorError;
pub use extractor::{Capabilities, Extractor, SiteOptions, VideoExtractor};
pub use filters::{FilterSet, MatchFilter, NumberFilter};
pub use registry::{SiteEntry, find_by_name, find_for_url, registered_sites};
