//! VIZPLY: binary PLY vertex files for classified point clouds.
//!
//! - One fixed 16-byte record per vertex, little-endian.
//! - Positions are f32 (callers re-centre large coordinates before export).
//! - Colour is the class colour, not the scanned colour.
//!
//! File layout:
//!   ASCII header, one field per line, terminated by "end_header\n":
//!     ply
//!     format binary_little_endian 1.0
//!     comment <text>                  (one on write, zero or more on read)
//!     element vertex <N>
//!     property float x
//!     property float y
//!     property float z
//!     property uchar red
//!     property uchar green
//!     property uchar blue
//!     property uchar classification
//!     end_header
//!   then N records:
//!     00 : f32 x
//!     04 : f32 y
//!     08 : f32 z
//!     0C : u8 red, u8 green, u8 blue, u8 classification

use bytemuck::{Pod, Zeroable};
use std::fs::File;
use std::io::{self, BufWriter, ErrorKind, Write};
use std::path::Path;

pub const PLY_MAGIC: &str = "ply";
pub const PLY_FORMAT: &str = "format binary_little_endian 1.0";
pub const END_HEADER: &str = "end_header";
pub const RECORD_SIZE: usize = 16;

/// Property lines in record order. Readers must see exactly this list.
pub const VERTEX_PROPERTIES: [&str; 7] = [
    "property float x",
    "property float y",
    "property float z",
    "property uchar red",
    "property uchar green",
    "property uchar blue",
    "property uchar classification",
];

/// One exported point.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub color: [u8; 3],
    pub classification: u8,
}

impl Vertex {
    #[inline]
    pub fn to_le_bytes(&self) -> [u8; RECORD_SIZE] {
        let mut out = [0u8; RECORD_SIZE];
        out[0..4].copy_from_slice(&self.position[0].to_le_bytes());
        out[4..8].copy_from_slice(&self.position[1].to_le_bytes());
        out[8..12].copy_from_slice(&self.position[2].to_le_bytes());
        out[12..15].copy_from_slice(&self.color);
        out[15] = self.classification;
        out
    }

    #[inline]
    pub fn from_le_bytes(b: &[u8; RECORD_SIZE]) -> Self {
        Self {
            position: [
                f32::from_le_bytes([b[0], b[1], b[2], b[3]]),
                f32::from_le_bytes([b[4], b[5], b[6], b[7]]),
                f32::from_le_bytes([b[8], b[9], b[10], b[11]]),
            ],
            color: [b[12], b[13], b[14]],
            classification: b[15],
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct VertexCloud {
    pub comments: Vec<String>,
    pub vertices: Vec<Vertex>,
}

#[cold]
fn bad(msg: &str) -> io::Error {
    io::Error::new(ErrorKind::InvalidData, msg)
}

/// Render the ASCII header for `count` vertices.
///
/// The comment line is always present, even when `comment` is empty. Line
/// breaks inside it are folded into spaces so it stays a single header line.
pub fn header_bytes(count: u64, comment: &str) -> Vec<u8> {
    let comment: String = comment
        .chars()
        .map(|c| if c == '\n' || c == '\r' { ' ' } else { c })
        .collect();

    let mut out = String::with_capacity(256);
    out.push_str(PLY_MAGIC);
    out.push('\n');
    out.push_str(PLY_FORMAT);
    out.push('\n');

    out.push_str("comment ");
    out.push_str(&comment);
    out.push('\n');

    out.push_str(&format!("element vertex {}\n", count));

    for property in VERTEX_PROPERTIES {
        out.push_str(property);
        out.push('\n');
    }

    out.push_str(END_HEADER);
    out.push('\n');

    out.into_bytes()
}

/// Streaming writer: header first, then vertices in as many batches as the
/// caller likes. `finish` fails unless exactly the declared count was written.
pub struct VertexWriter<W: Write> {
    inner: W,
    declared: u64,
    written: u64,
}

impl<W: Write> VertexWriter<W> {
    pub fn new(mut inner: W, count: u64, comment: &str) -> io::Result<Self> {
        inner.write_all(&header_bytes(count, comment))?;

        Ok(Self {
            inner,
            declared: count,
            written: 0,
        })
    }

    pub fn write_vertices(&mut self, vertices: &[Vertex]) -> io::Result<()> {
        let batch = vertices.len() as u64;
        if self.written + batch > self.declared {
            return Err(bad("more vertices than declared in header"));
        }

        #[cfg(target_endian = "little")]
        {
            // Vertex is repr(C) with no padding; in-memory layout is the record layout.
            self.inner.write_all(bytemuck::cast_slice(vertices))?;
        }

        #[cfg(not(target_endian = "little"))]
        {
            for vertex in vertices {
                self.inner.write_all(&vertex.to_le_bytes())?;
            }
        }

        self.written += batch;
        Ok(())
    }

    #[inline]
    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn finish(mut self) -> io::Result<W> {
        if self.written != self.declared {
            return Err(bad("fewer vertices than declared in header"));
        }

        self.inner.flush()?;
        Ok(self.inner)
    }
}

fn next_line<'a>(buf: &mut &'a [u8]) -> io::Result<&'a str> {
    let end = buf
        .iter()
        .position(|&b| b == b'\n')
        .ok_or_else(|| io::Error::new(ErrorKind::UnexpectedEof, "truncated PLY header"))?;

    let (line, tail) = buf.split_at(end);
    *buf = &tail[1..];

    std::str::from_utf8(line).map_err(|_| bad("PLY header is not ASCII"))
}

/// Parse a whole file held in memory. This is the single source of truth for parsing.
pub fn parse_ply_bytes(mut p: &[u8]) -> io::Result<VertexCloud> {
    if next_line(&mut p)? != PLY_MAGIC {
        return Err(bad("bad PLY magic"));
    }

    if next_line(&mut p)? != PLY_FORMAT {
        return Err(bad("unsupported PLY format line"));
    }

    let mut comments = Vec::new();
    let count = loop {
        let line = next_line(&mut p)?;

        if let Some(comment) = line.strip_prefix("comment ") {
            comments.push(comment.to_owned());
            continue;
        }
        if line == "comment" {
            comments.push(String::new());
            continue;
        }

        let count = line
            .strip_prefix("element vertex ")
            .ok_or_else(|| bad("expected vertex element"))?;

        break count
            .trim()
            .parse::<u64>()
            .map_err(|_| bad("bad vertex count"))?;
    };

    for expected in VERTEX_PROPERTIES {
        if next_line(&mut p)? != expected {
            return Err(bad("unexpected vertex property layout"));
        }
    }

    if next_line(&mut p)? != END_HEADER {
        return Err(bad("expected end_header"));
    }

    let body = usize::try_from(count)
        .ok()
        .and_then(|n| n.checked_mul(RECORD_SIZE))
        .ok_or_else(|| bad("vertex count overflow"))?;

    if p.len() < body {
        return Err(io::Error::new(ErrorKind::UnexpectedEof, "truncated PLY body"));
    }

    if p.len() > body {
        return Err(bad("trailing bytes after PLY body"));
    }

    // Header length is arbitrary, so the body is not guaranteed to be aligned.
    let vertices = p
        .chunks_exact(RECORD_SIZE)
        .map(|record| {
            let mut b = [0u8; RECORD_SIZE];
            b.copy_from_slice(record);
            Vertex::from_le_bytes(&b)
        })
        .collect();

    Ok(VertexCloud { comments, vertices })
}

/// Fast path: prefer mmap; fall back to a single read.
#[cfg(feature = "mmap")]
pub fn read_file<P: AsRef<Path>>(path: P) -> io::Result<VertexCloud> {
    let file = File::open(path)?;
    let map = unsafe { memmap2::MmapOptions::new().map(&file)? };
    parse_ply_bytes(&map)
}

#[cfg(not(feature = "mmap"))]
pub fn read_file<P: AsRef<Path>>(path: P) -> io::Result<VertexCloud> {
    let bytes = std::fs::read(path)?;
    parse_ply_bytes(&bytes)
}

/// Write a complete cloud in one go.
pub fn write_file<P: AsRef<Path>>(path: P, vertices: &[Vertex], comment: &str) -> io::Result<()> {
    let file = BufWriter::new(File::create(path)?);
    let mut writer = VertexWriter::new(file, vertices.len() as u64, comment)?;

    writer.write_vertices(vertices)?;
    writer.finish()?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<Vertex> {
        vec![
            Vertex {
                position: [1.0, -2.5, 3.25],
                color: [139, 69, 19],
                classification: 2,
            },
            Vertex {
                position: [10.0, 20.0, 30.0],
                color: [70, 130, 180],
                classification: 6,
            },
        ]
    }

    #[test]
    fn test_record_is_sixteen_bytes() {
        assert_eq!(std::mem::size_of::<Vertex>(), RECORD_SIZE);
    }

    #[test]
    fn test_header_layout() {
        let header = String::from_utf8(header_bytes(2, "classified")).unwrap();
        let lines: Vec<&str> = header.lines().collect();

        assert_eq!(lines[0], "ply");
        assert_eq!(lines[1], "format binary_little_endian 1.0");
        assert_eq!(lines[2], "comment classified");
        assert_eq!(lines[3], "element vertex 2");
        assert_eq!(&lines[4..11], &VERTEX_PROPERTIES[..]);
        assert_eq!(lines[11], "end_header");
        assert!(header.ends_with("end_header\n"));
    }

    #[test]
    fn test_comment_stays_on_one_line() {
        let header = String::from_utf8(header_bytes(0, "a\nb")).unwrap();
        assert!(header.contains("comment a b\n"));
    }

    #[test]
    fn test_empty_comment_keeps_its_line() {
        let header = String::from_utf8(header_bytes(0, "")).unwrap();
        let lines: Vec<&str> = header.lines().collect();
        assert_eq!(lines[2], "comment ");
        assert_eq!(lines[3], "element vertex 0");

        let bytes = VertexWriter::new(Vec::new(), 0, "").unwrap().finish().unwrap();
        let cloud = parse_ply_bytes(&bytes).unwrap();
        assert_eq!(cloud.comments, vec![String::new()]);

        let bare = b"ply\nformat binary_little_endian 1.0\ncomment\nelement vertex 0\n";
        let mut bare = bare.to_vec();
        for property in VERTEX_PROPERTIES {
            bare.extend_from_slice(property.as_bytes());
            bare.push(b'\n');
        }
        bare.extend_from_slice(b"end_header\n");
        assert_eq!(parse_ply_bytes(&bare).unwrap().comments, vec![String::new()]);
    }

    #[test]
    fn test_writer_output_parses() {
        let mut writer = VertexWriter::new(Vec::new(), 2, "test").unwrap();
        let vertices = sample();
        writer.write_vertices(&vertices[..1]).unwrap();
        writer.write_vertices(&vertices[1..]).unwrap();
        let bytes = writer.finish().unwrap();

        let header_len = header_bytes(2, "test").len();
        assert_eq!(bytes.len(), header_len + 2 * RECORD_SIZE);
        assert_eq!(&bytes[header_len + 12..header_len + 16], &[139, 69, 19, 2]);

        let cloud = parse_ply_bytes(&bytes).unwrap();
        assert_eq!(cloud.comments, vec!["test".to_string()]);
        assert_eq!(cloud.vertices, vertices);
    }

    #[test]
    fn test_writer_rejects_count_mismatch() {
        let mut writer = VertexWriter::new(Vec::new(), 1, "").unwrap();
        assert!(writer.write_vertices(&sample()).is_err());

        let writer = VertexWriter::new(Vec::new(), 3, "").unwrap();
        assert_eq!(writer.finish().unwrap_err().kind(), ErrorKind::InvalidData);
    }

    #[test]
    fn test_parse_rejects_truncated_body() {
        let mut writer = VertexWriter::new(Vec::new(), 2, "").unwrap();
        writer.write_vertices(&sample()).unwrap();
        let mut bytes = writer.finish().unwrap();
        bytes.pop();

        let err = parse_ply_bytes(&bytes).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_parse_rejects_foreign_layout() {
        let text = b"ply\nformat ascii 1.0\nelement vertex 0\nend_header\n";
        assert!(parse_ply_bytes(text).is_err());
    }
}
