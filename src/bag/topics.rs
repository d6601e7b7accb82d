//! Topic classification for a dataset's first episode.

use crate::bag::messages::{COMPRESSED_IMAGE_TYPE, IMAGE_TYPE, JOINT_STATE_TYPE};
use crate::bag::reader::TopicInfo;
use crate::error::BagError;

/// How a camera topic encodes its frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CameraEncoding {
    Raw,
    Compressed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraTopic {
    pub name: String,
    pub encoding: CameraEncoding,
}

/// Joint-state and camera topics selected for extraction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicClassification {
    pub joint_topic: String,
    /// Camera topics with data, in order of first appearance.
    pub cameras: Vec<CameraTopic>,
}

impl TopicClassification {
    pub fn camera(&self, topic: &str) -> Option<&CameraTopic> {
        self.cameras.iter().find(|c| c.name == topic)
    }

    pub fn camera_names(&self) -> Vec<String> {
        self.cameras.iter().map(|c| c.name.clone()).collect()
    }
}

/// Classifies declared topics.
///
/// Exactly one joint-state topic is required. Camera topics are restricted to
/// those present in `active` (topics that carry data), keeping `active`'s order.
pub fn classify(topics: &[TopicInfo], active: &[String]) -> Result<TopicClassification, BagError> {
    let joints: Vec<&TopicInfo> = topics
        .iter()
        .filter(|t| t.msg_type == JOINT_STATE_TYPE)
        .collect();

    let joint_topic = match joints.as_slice() {
        [] => {
            return Err(BagError::Configuration(
                "JointState topic not found in bag".to_string(),
            ))
        }
        [only] => only.name.clone(),
        many => {
            let names: Vec<&str> = many.iter().map(|t| t.name.as_str()).collect();
            return Err(BagError::Configuration(format!(
                "ambiguous JointState topics: {}",
                names.join(", ")
            )));
        }
    };

    let cameras = active
        .iter()
        .filter_map(|name| {
            let info = topics.iter().find(|t| &t.name == name)?;
            let encoding = match info.msg_type.as_str() {
                IMAGE_TYPE => CameraEncoding::Raw,
                COMPRESSED_IMAGE_TYPE => CameraEncoding::Compressed,
                _ => return None,
            };
            Some(CameraTopic {
                name: name.clone(),
                encoding,
            })
        })
        .collect();

    Ok(TopicClassification {
        joint_topic,
        cameras,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn topic(name: &str, msg_type: &str) -> TopicInfo {
        TopicInfo {
            name: name.to_string(),
            msg_type: msg_type.to_string(),
            serialization_format: "cdr".to_string(),
        }
    }

    #[test]
    fn test_cameras_follow_activity_order() {
        let topics = vec![
            topic("/joint_states", JOINT_STATE_TYPE),
            topic("/cam/color", IMAGE_TYPE),
            topic("/cam/depth", IMAGE_TYPE),
            topic("/cam/wrist", COMPRESSED_IMAGE_TYPE),
            topic("/tf", "tf2_msgs/msg/TFMessage"),
        ];
        let active = vec![
            "/tf".to_string(),
            "/cam/wrist".to_string(),
            "/joint_states".to_string(),
            "/cam/color".to_string(),
        ];

        let c = classify(&topics, &active).unwrap();
        assert_eq!(c.joint_topic, "/joint_states");
        assert_eq!(c.camera_names(), vec!["/cam/wrist", "/cam/color"]);
        assert_eq!(c.camera("/cam/wrist").unwrap().encoding, CameraEncoding::Compressed);
        assert!(c.camera("/cam/depth").is_none());
    }

    #[test]
    fn test_missing_joint_topic_is_configuration_error() {
        let topics = vec![topic("/cam", IMAGE_TYPE)];
        let err = classify(&topics, &["/cam".to_string()]).unwrap_err();
        assert!(matches!(err, BagError::Configuration(msg) if msg.contains("not found")));
    }

    #[test]
    fn test_two_joint_topics_are_ambiguous() {
        let topics = vec![
            topic("/left/joint_states", JOINT_STATE_TYPE),
            topic("/right/joint_states", JOINT_STATE_TYPE),
        ];
        let err = classify(&topics, &[]).unwrap_err();
        assert!(matches!(err, BagError::Configuration(msg) if msg.contains("ambiguous")));
    }
}
