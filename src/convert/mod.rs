//! Bag-to-dataset conversion: the work a conversion worker process performs.

pub mod lerobot;
pub mod runner;

pub use lerobot::{feature_name, write_dataset, LeRobotSummary};
pub use runner::{
    rotate_existing_output, run_conversion, ConversionOptions, ConversionReport, DEFAULT_FPS,
    FRAMES_DIR, LEROBOT_DIR, RAW_JSON_NAME,
};
