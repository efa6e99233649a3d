//! Content tree and naming primitives shared across the polarity workspace.
//!
//! Extractors build [`Series`] → [`Season`] → [`Media`] trees with
//! [`Stream`]s attached to the leaves; the downloader consumes them
//! read-only. Also hosts the content-identifier syntax, per-OS filename
//! sanitization and output-path templating.

pub mod ident;
pub mod media;
pub mod naming;
pub mod sanitize;
pub mod stream;

pub use ident::{ContentIdent, ContentKind, IdentError};
pub use media::{Lineage, Media, MediaKind, Season, Series};
pub use naming::{NameFields, format_name};
pub use sanitize::{TargetOs, sanitize_path};
pub use stream::{ContentKey, KeyMethod, Stream, TrackKind};
