mod blob_store_port;
mod byte_source_port;
mod codec_port;
mod display_port;
mod space_probe_port;

pub use blob_store_port::{BlobEditor, BlobStore, Snapshot, StoreResult};
pub use byte_source_port::{ByteSource, ByteStream};
pub use codec_port::ImageCodec;
pub use display_port::DisplaySurface;
pub use space_probe_port::SpaceProbe;
