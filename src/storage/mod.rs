//! Glue around a finished task: staging its input files before the run and
//! archiving its results after a success.

pub mod staging;
pub mod uploader;

pub use staging::FileStager;
pub use uploader::{LocalArchiveUploader, ResultUploader, UploadReport, UploadRequest};
