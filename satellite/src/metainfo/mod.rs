//! Segment metadata: pointer types, the segment loop, and the metainfo service
//! and endpoint.

pub mod endpoint;
pub mod segment_loop;
pub mod service;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::RsConfig;
use crate::error::SatelliteError;
use crate::identity::NodeId;
use crate::time::unix_now;

pub use endpoint::Endpoint;
pub use segment_loop::{Observer, SegmentLoop};
pub use service::MetainfoService;

/// A piece of a remote segment stored on one storage node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Piece {
    pub number: u16,
    pub node_id: NodeId,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Segment {
    Inline { data: Vec<u8> },
    Remote { redundancy: RsConfig, pieces: Vec<Piece> },
}

/// Metadata of one stored segment.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Pointer {
    pub segment: Segment,
    pub size: u64,
    pub created_at: u64,
    pub expires_at: Option<u64>,
    #[serde(default)]
    pub metadata: Vec<u8>,
}

impl Pointer {
    pub fn inline(data: Vec<u8>, expires_at: Option<u64>) -> Self {
        Self {
            size: data.len() as u64,
            segment: Segment::Inline { data },
            created_at: unix_now(),
            expires_at,
            metadata: Vec::new(),
        }
    }

    pub fn remote(
        redundancy: RsConfig,
        pieces: Vec<Piece>,
        size: u64,
        expires_at: Option<u64>,
    ) -> Self {
        Self {
            segment: Segment::Remote { redundancy, pieces },
            size,
            created_at: unix_now(),
            expires_at,
            metadata: Vec::new(),
        }
    }

    pub fn is_remote(&self) -> bool {
        matches!(self.segment, Segment::Remote { .. })
    }

    /// Pieces of a remote segment; empty for inline segments.
    pub fn pieces(&self) -> &[Piece] {
        match &self.segment {
            Segment::Remote { pieces, .. } => pieces,
            Segment::Inline { .. } => &[],
        }
    }

    pub fn redundancy(&self) -> Option<&RsConfig> {
        match &self.segment {
            Segment::Remote { redundancy, .. } => Some(redundancy),
            Segment::Inline { .. } => None,
        }
    }

    pub fn is_expired(&self, now: u64) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    pub fn inline_size(&self) -> u64 {
        match &self.segment {
            Segment::Inline { data } => data.len() as u64,
            Segment::Remote { .. } => 0,
        }
    }

    pub fn remote_size(&self) -> u64 {
        if self.is_remote() { self.size } else { 0 }
    }
}

/// Position of a segment within its object. The last segment also carries the
/// object metadata.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SegmentIndex {
    Last,
    Index(u64),
}

impl fmt::Display for SegmentIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SegmentIndex::Last => f.write_str("l"),
            SegmentIndex::Index(i) => write!(f, "s{i}"),
        }
    }
}

impl FromStr for SegmentIndex {
    type Err = SatelliteError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "l" {
            return Ok(SegmentIndex::Last);
        }
        s.strip_prefix('s')
            .and_then(|n| n.parse().ok())
            .map(SegmentIndex::Index)
            .ok_or_else(|| SatelliteError::InvalidArgument(format!("invalid segment index {s:?}")))
    }
}

/// `<project>/<segment>/<bucket>/<object key>`. The object key may contain `/`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SegmentPath {
    pub project_id: Uuid,
    pub segment: SegmentIndex,
    pub bucket: String,
    pub object: String,
}

impl SegmentPath {
    pub fn new(
        project_id: Uuid,
        segment: SegmentIndex,
        bucket: impl Into<String>,
        object: impl Into<String>,
    ) -> Self {
        Self {
            project_id,
            segment,
            bucket: bucket.into(),
            object: object.into(),
        }
    }

    pub fn is_last(&self) -> bool {
        self.segment == SegmentIndex::Last
    }
}

impl fmt::Display for SegmentPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}",
            self.project_id, self.segment, self.bucket, self.object
        )
    }
}

impl FromStr for SegmentPath {
    type Err = SatelliteError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(4, '/');
        let (Some(project), Some(segment), Some(bucket), Some(object)) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(SatelliteError::InvalidArgument(format!(
                "invalid segment path {s:?}"
            )));
        };
        let project_id = Uuid::parse_str(project)
            .map_err(|e| SatelliteError::InvalidArgument(format!("invalid project id: {e}")))?;
        if bucket.is_empty() {
            return Err(SatelliteError::InvalidArgument(
                "segment path without bucket".to_string(),
            ));
        }
        Ok(Self {
            project_id,
            segment: segment.parse()?,
            bucket: bucket.to_string(),
            object: object.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segment_path_parses_keys_with_slashes() {
        let project = Uuid::new_v4();
        let path: SegmentPath = format!("{project}/s3/photos/2020/01/a.jpg").parse().unwrap();
        assert_eq!(path.project_id, project);
        assert_eq!(path.segment, SegmentIndex::Index(3));
        assert_eq!(path.bucket, "photos");
        assert_eq!(path.object, "2020/01/a.jpg");
        assert_eq!(path.to_string(), format!("{project}/s3/photos/2020/01/a.jpg"));
    }

    #[test]
    fn test_segment_path_rejects_garbage() {
        assert!("nope".parse::<SegmentPath>().is_err());
        assert!(format!("{}/x/b/o", Uuid::new_v4()).parse::<SegmentPath>().is_err());
        assert!(format!("{}/l//o", Uuid::new_v4()).parse::<SegmentPath>().is_err());
    }

    #[test]
    fn test_pointer_sizes_by_kind() {
        let inline = Pointer::inline(vec![0; 10], None);
        assert_eq!((inline.inline_size(), inline.remote_size()), (10, 0));

        let remote = Pointer::remote(RsConfig::default(), Vec::new(), 4096, Some(5));
        assert_eq!((remote.inline_size(), remote.remote_size()), (0, 4096));
        assert!(remote.is_expired(5));
        assert!(!remote.is_expired(4));
    }
}
