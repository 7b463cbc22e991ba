//! # s3up
//!
//! Command-line front end for [`s3up_client`].
//!
//! - **upload**: copy a file or directory into `bucket[/prefix]`, using a
//!   single PUT for small files and a parallel multipart upload otherwise
//! - **tmpwatch**: delete objects under a prefix older than a number of days

pub mod batch;
pub mod config;
pub mod error;
pub mod shutdown;
pub mod tmpwatch;

pub use batch::{BatchReport, BatchUploader, FileOutcome, FileReport};
pub use config::{parse_size, Target, UploadSettings};
pub use error::CliError;
pub use shutdown::ShutdownSignal;
pub use tmpwatch::{cutoff, tmpwatch, TmpwatchReport};
