//! Database access layer. One repository struct per aggregate, each owning a
//! `PgPool` clone.

pub mod catalog;
pub mod episode;
pub mod stream_key;

pub use catalog::CatalogRepository;
pub use episode::EpisodeRepository;
pub use stream_key::StreamKeyRepository;
