//! The optional IoStore directory index: the TOC's human-readable path
//! table.

use tracing::debug;

use crate::error::{ArchiveError, Result};
use crate::reader::ByteReader;

/// Sentinel for "no node" in the directory tree.
const NONE: u32 = u32::MAX;

#[derive(Debug, Clone, Copy)]
struct DirectoryEntry {
    name: u32,
    first_child: u32,
    next_sibling: u32,
    first_file: u32,
}

#[derive(Debug, Clone, Copy)]
struct FileIndexEntry {
    name: u32,
    next_file: u32,
    /// TOC entry index of the chunk backing this file
    user_data: u32,
}

/// Decoded directory index: mount point plus `(path, toc index)`
/// pairs for every file.
#[derive(Debug)]
pub struct DirectoryIndex {
    /// Mount-point prefix for every path
    pub mount_point: String,
    /// Full paths (mount point included) with their TOC entry indices
    pub files: Vec<(String, u32)>,
}

impl DirectoryIndex {
    /// Decode a (decrypted) directory-index blob.
    ///
    /// Layout: mount point, directory nodes
    /// `(name, first_child, next_sibling, first_file)`, file nodes
    /// `(name, next_file, user_data)`, then the string table the name
    /// fields index into.
    pub fn parse(blob: &[u8]) -> Result<Self> {
        let mut reader = ByteReader::new(blob);
        let mount_point = reader.read_unreal_string()?;

        let dir_count = reader.read_u32()? as usize;
        let mut directories = Vec::with_capacity(dir_count);
        for _ in 0..dir_count {
            directories.push(DirectoryEntry {
                name: reader.read_u32()?,
                first_child: reader.read_u32()?,
                next_sibling: reader.read_u32()?,
                first_file: reader.read_u32()?,
            });
        }

        let file_count = reader.read_u32()? as usize;
        let mut file_entries = Vec::with_capacity(file_count);
        for _ in 0..file_count {
            file_entries.push(FileIndexEntry {
                name: reader.read_u32()?,
                next_file: reader.read_u32()?,
                user_data: reader.read_u32()?,
            });
        }

        let string_count = reader.read_u32()? as usize;
        let mut strings = Vec::with_capacity(string_count);
        for _ in 0..string_count {
            strings.push(reader.read_unreal_string()?);
        }

        // Depth-first walk from the root node, tracking each visited
        // directory's accumulated path prefix.
        let mut files = Vec::with_capacity(file_count);
        if !directories.is_empty() {
            let mut stack: Vec<(u32, String)> = vec![(0, mount_point.clone())];
            let mut visited = 0usize;
            while let Some((dir_index, parent_prefix)) = stack.pop() {
                visited += 1;
                if visited > directories.len() {
                    return Err(ArchiveError::corrupt("directory index tree has a cycle"));
                }
                let dir = directories
                    .get(dir_index as usize)
                    .ok_or_else(|| ArchiveError::corrupt("directory node out of range"))?;

                let prefix = if dir.name == NONE {
                    parent_prefix.clone()
                } else {
                    format!("{parent_prefix}{}/", name_of(&strings, dir.name)?)
                };

                let mut file_index = dir.first_file;
                while file_index != NONE {
                    let file = file_entries
                        .get(file_index as usize)
                        .ok_or_else(|| ArchiveError::corrupt("file node out of range"))?;
                    files.push((
                        format!("{prefix}{}", name_of(&strings, file.name)?),
                        file.user_data,
                    ));
                    file_index = file.next_file;
                }

                // Siblings share the parent prefix; children extend
                // this node's.
                if dir.next_sibling != NONE {
                    stack.push((dir.next_sibling, parent_prefix));
                }
                if dir.first_child != NONE {
                    stack.push((dir.first_child, prefix));
                }
            }
        }

        debug!(
            "Directory index: {} files under {:?}",
            files.len(),
            mount_point
        );
        Ok(Self { mount_point, files })
    }
}

fn name_of<'a>(strings: &'a [String], index: u32) -> Result<&'a str> {
    strings
        .get(index as usize)
        .map(String::as_str)
        .ok_or_else(|| ArchiveError::corrupt("directory index name out of range"))
}
