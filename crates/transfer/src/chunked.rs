use crate::TransferError;

/// One chunk's place within a file. Derived on demand, never persisted:
/// the file itself is the durable source for chunk bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkDescriptor {
    /// Zero-based chunk index.
    pub index: u32,
    /// Byte offset within the file.
    pub offset: u64,
    /// Length in bytes. Only the last chunk may be shorter than the
    /// configured chunk size.
    pub len: usize,
}

impl ChunkDescriptor {
    /// The byte range this chunk covers.
    pub fn range(&self) -> std::ops::Range<usize> {
        let start = self.offset as usize;
        start..start + self.len
    }
}

/// Number of chunks a file of `file_len` bytes splits into.
pub fn chunk_count(file_len: u64, chunk_size: u64) -> u32 {
    if chunk_size == 0 {
        return 0;
    }
    file_len.div_ceil(chunk_size) as u32
}

/// Describes chunk `index` of a `file_len`-byte file.
pub fn chunk_descriptor(
    index: u32,
    file_len: u64,
    chunk_size: u64,
) -> Result<ChunkDescriptor, TransferError> {
    let total = chunk_count(file_len, chunk_size);
    if index >= total {
        return Err(TransferError::IndexOutOfRange { index, total });
    }
    let offset = u64::from(index) * chunk_size;
    let len = chunk_size.min(file_len - offset) as usize;
    Ok(ChunkDescriptor { index, offset, len })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn count_exact_multiple() {
        assert_eq!(chunk_count(20, 5), 4);
    }

    #[test]
    fn count_with_remainder() {
        // 12 MiB at 5 MiB per chunk -> 3 chunks.
        assert_eq!(chunk_count(12 * 1024 * 1024, 5 * 1024 * 1024), 3);
    }

    #[test]
    fn count_empty_file() {
        assert_eq!(chunk_count(0, 5), 0);
    }

    #[test]
    fn descriptor_covers_file_exactly() {
        let file_len = 11u64;
        let chunk_size = 4u64;
        let descriptors: Vec<_> = (0..chunk_count(file_len, chunk_size))
            .map(|i| chunk_descriptor(i, file_len, chunk_size).unwrap())
            .collect();

        assert_eq!(descriptors.len(), 3);
        assert_eq!(descriptors[0].range(), 0..4);
        assert_eq!(descriptors[1].range(), 4..8);
        // Last chunk is short.
        assert_eq!(descriptors[2].range(), 8..11);
    }

    #[test]
    fn descriptor_out_of_range() {
        let err = chunk_descriptor(3, 11, 4).unwrap_err();
        assert!(matches!(
            err,
            TransferError::IndexOutOfRange { index: 3, total: 3 }
        ));
    }
}
