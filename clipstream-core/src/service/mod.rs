pub mod catalog_writer;
pub mod queue;
pub mod upload_metadata;

pub use catalog_writer::CatalogWriter;
pub use queue::{QueuePublisher, StreamProcessedEvent, StreamStartEvent, StreamStopEvent};
pub use upload_metadata::MetadataStore;
