//! sitebinder: crawl a collection of linked pages with a site profile and bind them into an EPUB.

pub mod assemble;
pub mod cli;
pub mod collect;
pub mod config;
pub mod epub;
pub mod fragment;
pub mod images;
pub mod model;
pub mod profile;

// Re-exports for CLI and consumers.
pub use assemble::{assemble, order_pages, AssembleError, AssemblyReport, OrderingPolicy};
pub use collect::{
    discover_links, extract_pages, CollectError, ImageDownloader, PageFetcher, PoliteClient,
    PoliteClientBuilder,
};
pub use epub::{BookWriter, EpubBuilder, EpubError, SectionId};
pub use fragment::{Fragment, FragmentError};
pub use images::HttpImageDownloader;
pub use model::{DiscoveredLink, Discovery, ExtractedPage};
pub use profile::{resolve_profile, Profile, ProfileError};
