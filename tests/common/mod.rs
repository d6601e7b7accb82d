//! Fixture bags shared by the integration tests.

#![allow(dead_code)]

use std::path::Path;

use episode_forge::bag::{
    Db3Writer, Header, JointState, RawImage, IMAGE_TYPE, JOINT_STATE_TYPE,
};

pub const JOINT_TOPIC: &str = "/joint_states";
pub const FRONT_CAMERA: &str = "/cam/front/image_raw";
pub const WRIST_CAMERA: &str = "/cam/wrist/image_raw";

/// Camera period: 10 Hz.
pub const FRAME_PERIOD_NS: i64 = 100_000_000;
/// Joint-state period: 50 Hz.
pub const JOINT_PERIOD_NS: i64 = 20_000_000;

fn joint_state(ts: i64, step: usize) -> Vec<u8> {
    let x = step as f64 * 0.01;
    JointState {
        header: Header::at(ts, "base_link"),
        name: vec!["shoulder".into(), "elbow".into(), "wrist".into()],
        position: vec![x, x * 2.0, x * 3.0],
        velocity: vec![0.1, 0.2, 0.3],
        effort: vec![1.0, 1.0, 1.0],
    }
    .encode(true)
}

fn bgr_frame(ts: i64, shade: u8) -> Vec<u8> {
    let (width, height) = (4u32, 3u32);
    RawImage {
        header: Header::at(ts, "camera"),
        height,
        width,
        encoding: "bgr8".into(),
        is_bigendian: 0,
        step: width * 3,
        data: vec![shade; (width * height * 3) as usize],
    }
    .encode(true)
}

/// Writes one episode: 3 joints at 50 Hz and `frames` frames per camera at 10 Hz.
pub async fn write_episode(dir: &Path, cameras: &[&str], frames: usize) {
    let start: i64 = 1_700_000_000_000_000_000;
    let mut writer = Db3Writer::create(&dir.join("data_0.db3")).await.unwrap();
    writer.add_topic(JOINT_TOPIC, JOINT_STATE_TYPE).await.unwrap();
    for cam in cameras {
        writer.add_topic(cam, IMAGE_TYPE).await.unwrap();
    }

    let span = frames as i64 * FRAME_PERIOD_NS;
    let mut step = 0;
    let mut t = start;
    while t < start + span {
        writer
            .write(JOINT_TOPIC, t, &joint_state(t, step))
            .await
            .unwrap();
        step += 1;
        t += JOINT_PERIOD_NS;
    }

    for i in 0..frames {
        for (c, cam) in cameras.iter().enumerate() {
            // Cameras are slightly staggered so frames never share a timestamp.
            let ts = start + i as i64 * FRAME_PERIOD_NS + 5_000_000 + c as i64 * 1_000_000;
            writer
                .write(cam, ts, &bgr_frame(ts, (i * 10) as u8))
                .await
                .unwrap();
        }
    }

    writer.finish().await;
}

/// Writes `episodes` episode directories under `root`.
pub async fn write_bag_root(root: &Path, episodes: usize, cameras: &[&str], frames: usize) {
    for e in 0..episodes {
        write_episode(&root.join(format!("episode_{}", e)), cameras, frames).await;
    }
}
