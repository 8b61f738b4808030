//! Media toolchain: probing, HLS segmenting, master playlists and thumbnail
//! extraction, all by shelling out to ffmpeg/ffprobe.

pub mod error;
pub mod playlist;
pub mod probe;
pub mod rendition;
pub mod segmenter;
pub mod thumbnail;

pub use error::MediaError;
pub use playlist::build_master_playlist;
pub use probe::{probe_file, MediaInfo, Orientation};
pub use rendition::{RenditionSpec, LADDER};
pub use segmenter::{SegmentRequest, Segmenter};
pub use thumbnail::{extract_thumbnail, wait_for_stable_size};
