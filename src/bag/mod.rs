//! ROS 2 bag access: CDR decoding, message types, `.db3` logs and topic classification.

pub mod cdr;
pub mod messages;
pub mod reader;
pub mod topics;
pub mod writer;

pub use cdr::{CdrReader, CdrWriter};
pub use messages::{
    CompressedImage, Header, JointState, RawImage, COMPRESSED_IMAGE_TYPE, IMAGE_TYPE,
    JOINT_STATE_TYPE,
};
pub use reader::{discover_episodes, storage_files, Db3Log, MessageLog, RawMessage, TopicInfo};
pub use topics::{classify, CameraEncoding, CameraTopic, TopicClassification};
pub use writer::Db3Writer;
