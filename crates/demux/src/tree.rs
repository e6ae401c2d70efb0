//! Hierarchical box tree over an in-memory container buffer.
//!
//! [`ContainerParser::parse`] walks the whole buffer once and records, for
//! every box, its type, offset and size. Container boxes are descended
//! into; leaf payloads stay in the buffer and are borrowed on demand.

use rc_common::{DemuxError, DemuxResult};
use tracing::{debug, trace};

use crate::boxes::*;

/// Nesting depth beyond which the input is treated as hostile.
const MAX_DEPTH: usize = 32;

/// One box in the tree.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BoxNode {
    pub header: BoxHeader,
    pub children: Vec<BoxNode>,
}

impl BoxNode {
    pub fn box_type(&self) -> u32 {
        self.header.box_type
    }

    pub fn offset(&self) -> u64 {
        self.header.offset
    }

    /// First direct child of the given type.
    pub fn child(&self, box_type: u32) -> Option<&BoxNode> {
        self.children.iter().find(|c| c.box_type() == box_type)
    }

    /// All direct children of the given type, in file order.
    pub fn children_of(&self, box_type: u32) -> impl Iterator<Item = &BoxNode> {
        self.children
            .iter()
            .filter(move |c| c.box_type() == box_type)
    }

    /// Descend through direct children along `path`. An empty path
    /// returns `self`.
    pub fn find(&self, path: &[u32]) -> DemuxResult<&BoxNode> {
        let mut node = self;
        for (depth, &box_type) in path.iter().enumerate() {
            node = node.child(box_type).ok_or_else(|| DemuxError::NotFound {
                path: format!(
                    "{}/{}",
                    fourcc_to_string(self.box_type()),
                    path_to_string(&path[..=depth])
                ),
            })?;
        }
        Ok(node)
    }
}

/// Parsed box hierarchy borrowing the container buffer.
#[derive(Debug)]
pub struct BoxTree<'a> {
    data: &'a [u8],
    roots: Vec<BoxNode>,
}

impl<'a> BoxTree<'a> {
    pub fn roots(&self) -> &[BoxNode] {
        &self.roots
    }

    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    /// Resolve a path from the top level, e.g. `[MOOV, TRAK, MDIA]`.
    /// The first match at each level is taken.
    pub fn find(&self, path: &[u32]) -> DemuxResult<&BoxNode> {
        let not_found = || DemuxError::NotFound {
            path: path_to_string(path),
        };
        let (&first, rest) = path.split_first().ok_or_else(not_found)?;
        let root = self
            .roots
            .iter()
            .find(|n| n.box_type() == first)
            .ok_or_else(not_found)?;
        let mut node = root;
        for &box_type in rest {
            node = node.child(box_type).ok_or_else(not_found)?;
        }
        Ok(node)
    }

    /// Top-level boxes of a type, in file order.
    pub fn top_level(&self, box_type: u32) -> impl Iterator<Item = &BoxNode> {
        self.roots.iter().filter(move |n| n.box_type() == box_type)
    }

    /// Payload bytes of a node (header stripped).
    pub fn payload(&self, node: &BoxNode) -> &'a [u8] {
        let start = node.header.content_offset() as usize;
        let end = node.header.end_offset() as usize;
        &self.data[start..end]
    }

    /// The whole box including its header.
    pub fn bytes(&self, node: &BoxNode) -> &'a [u8] {
        &self.data[node.header.offset as usize..node.header.end_offset() as usize]
    }
}

/// Builds a [`BoxTree`] from a complete container buffer.
pub struct ContainerParser;

impl ContainerParser {
    /// Parse the whole buffer. Fails with `MalformedContainer` when a
    /// declared length runs past its parent, or when there is no `moov`.
    pub fn parse(data: &[u8]) -> DemuxResult<BoxTree<'_>> {
        let roots = parse_children(data, 0, data.len() as u64, 0, 0)?;

        if !roots.iter().any(|n| n.box_type() == MOOV) {
            return Err(DemuxError::malformed(0, "no 'moov' box at top level"));
        }

        debug!(
            "Parsed container: {} bytes, top-level boxes [{}]",
            data.len(),
            roots
                .iter()
                .map(|n| fourcc_to_string(n.box_type()))
                .collect::<Vec<_>>()
                .join(", ")
        );

        Ok(BoxTree { data, roots })
    }
}

/// Bytes of fixed fields that precede child boxes, for container types.
fn child_start(box_type: u32) -> Option<u64> {
    match box_type {
        MOOV | TRAK | EDTS | MDIA | MINF | DINF | STBL | MVEX | MOOF | TRAF | UDTA => Some(0),
        // version/flags + entry_count
        STSD => Some(8),
        AVC1 | AVC3 | HVC1 | HEV1 => Some(VISUAL_SAMPLE_ENTRY_SIZE as u64),
        _ => None,
    }
}

fn parse_children(
    data: &[u8],
    start: u64,
    end: u64,
    depth: usize,
    parent: u32,
) -> DemuxResult<Vec<BoxNode>> {
    if depth > MAX_DEPTH {
        return Err(DemuxError::malformed(start, "box nesting too deep"));
    }

    let mut nodes = Vec::new();
    let mut pos = start;
    while pos < end {
        // QuickTime user data may end with a 32-bit zero terminator.
        if parent == UDTA
            && end - pos < 8
            && data[pos as usize..end as usize].iter().all(|&b| b == 0)
        {
            break;
        }
        let header = read_box_header(data, pos, end)?;
        let children = match child_start(header.box_type) {
            Some(skip) if header.content_size() >= skip => parse_children(
                data,
                header.content_offset() + skip,
                header.end_offset(),
                depth + 1,
                header.box_type,
            )?,
            Some(skip) => {
                return Err(DemuxError::malformed(
                    header.offset,
                    format!(
                        "'{}' is {} bytes, too short for its {skip}-byte preamble",
                        fourcc_to_string(header.box_type),
                        header.size
                    ),
                ))
            }
            None => Vec::new(),
        };
        trace!(
            "{:indent$}{} @{} ({} children)",
            "",
            fourcc_to_string(header.box_type),
            header.offset,
            children.len(),
            indent = depth * 2
        );
        pos = header.end_offset();
        nodes.push(BoxNode { header, children });
    }
    Ok(nodes)
}
