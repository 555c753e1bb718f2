pub mod fingerprint;
pub mod ingest;
pub mod metrics;
pub mod repository;
pub mod spool;

pub use ingest::{IngestService, UploadMetadata};
pub use repository::FileRepository;
pub use spool::{SpooledUpload, Spooler};
