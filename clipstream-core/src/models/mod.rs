pub mod catalog;
pub mod episode;
pub mod id;
pub mod upload;

pub use catalog::{CatalogEntry, RegisterAsset, StreamKeyMapping};
pub use episode::EpisodeEntry;
pub use id::{StreamKey, UploadId, UserId};
pub use upload::{Upload, UploadMetadata};
