pub mod ask;
pub mod images;
pub mod ingest;
pub mod stats;
pub mod topics;
