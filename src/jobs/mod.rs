//! Training jobs: admission, trainer supervision and weight upload.

pub mod archive;
pub mod progress;
pub mod supervisor;
pub mod types;

pub use archive::pack_directory;
pub use progress::{parse_progress, timestamp_line, JobLog};
pub use supervisor::{JobPaths, JobSupervisor, INTERRUPTED_MESSAGE, LOG_FILE_NAME};
pub use types::{Device, TrainRequest, TrainerCommand};
