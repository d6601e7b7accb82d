//! Decoders for the `sensor_msgs` message types the extractor consumes.

use crate::bag::cdr::{CdrReader, CdrWriter};
use crate::error::DecodeError;

pub const JOINT_STATE_TYPE: &str = "sensor_msgs/msg/JointState";
pub const IMAGE_TYPE: &str = "sensor_msgs/msg/Image";
pub const COMPRESSED_IMAGE_TYPE: &str = "sensor_msgs/msg/CompressedImage";

/// `std_msgs/msg/Header`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Header {
    pub sec: i32,
    pub nanosec: u32,
    pub frame_id: String,
}

impl Header {
    fn decode(r: &mut CdrReader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            sec: r.read_i32()?,
            nanosec: r.read_u32()?,
            frame_id: r.read_string()?,
        })
    }

    fn encode(&self, w: &mut CdrWriter) {
        w.write_i32(self.sec)
            .write_u32(self.nanosec)
            .write_string(&self.frame_id);
    }

    /// Builds a header stamped at `timestamp_ns`.
    pub fn at(timestamp_ns: i64, frame_id: impl Into<String>) -> Self {
        Self {
            sec: (timestamp_ns.div_euclid(1_000_000_000)) as i32,
            nanosec: (timestamp_ns.rem_euclid(1_000_000_000)) as u32,
            frame_id: frame_id.into(),
        }
    }
}

/// `sensor_msgs/msg/JointState`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JointState {
    pub header: Header,
    pub name: Vec<String>,
    pub position: Vec<f64>,
    pub velocity: Vec<f64>,
    pub effort: Vec<f64>,
}

impl JointState {
    pub fn decode(payload: &[u8]) -> Result<Self, DecodeError> {
        let mut r = CdrReader::new(payload)?;
        Ok(Self {
            header: Header::decode(&mut r)?,
            name: r.read_string_seq()?,
            position: r.read_f64_seq()?,
            velocity: r.read_f64_seq()?,
            effort: r.read_f64_seq()?,
        })
    }

    pub fn encode(&self, little_endian: bool) -> Vec<u8> {
        let mut w = CdrWriter::new(little_endian);
        self.header.encode(&mut w);
        w.write_string_seq(&self.name)
            .write_f64_seq(&self.position)
            .write_f64_seq(&self.velocity)
            .write_f64_seq(&self.effort);
        w.finish()
    }
}

/// `sensor_msgs/msg/Image`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawImage {
    pub header: Header,
    pub height: u32,
    pub width: u32,
    pub encoding: String,
    pub is_bigendian: u8,
    pub step: u32,
    pub data: Vec<u8>,
}

impl RawImage {
    pub fn decode(payload: &[u8]) -> Result<Self, DecodeError> {
        let mut r = CdrReader::new(payload)?;
        Ok(Self {
            header: Header::decode(&mut r)?,
            height: r.read_u32()?,
            width: r.read_u32()?,
            encoding: r.read_string()?,
            is_bigendian: r.read_u8()?,
            step: r.read_u32()?,
            data: r.read_bytes()?,
        })
    }

    pub fn encode(&self, little_endian: bool) -> Vec<u8> {
        let mut w = CdrWriter::new(little_endian);
        self.header.encode(&mut w);
        w.write_u32(self.height)
            .write_u32(self.width)
            .write_string(&self.encoding)
            .write_u8(self.is_bigendian)
            .write_u32(self.step)
            .write_bytes(&self.data);
        w.finish()
    }
}

/// `sensor_msgs/msg/CompressedImage`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompressedImage {
    pub header: Header,
    pub format: String,
    pub data: Vec<u8>,
}

impl CompressedImage {
    pub fn decode(payload: &[u8]) -> Result<Self, DecodeError> {
        let mut r = CdrReader::new(payload)?;
        Ok(Self {
            header: Header::decode(&mut r)?,
            format: r.read_string()?,
            data: r.read_bytes()?,
        })
    }

    pub fn encode(&self, little_endian: bool) -> Vec<u8> {
        let mut w = CdrWriter::new(little_endian);
        self.header.encode(&mut w);
        w.write_string(&self.format).write_bytes(&self.data);
        w.finish()
    }
}
