use crate::error::StorageError;

/// Byte-addressed non-volatile memory with an explicit commit step.
///
/// Writes may be buffered until [`Storage::commit`]; nothing about a
/// sequence of writes is atomic.
pub trait Storage {
    fn capacity(&self) -> usize;

    fn read(&self, offset: usize, buf: &mut [u8]) -> Result<(), StorageError>;

    fn write(&mut self, offset: usize, data: &[u8]) -> Result<(), StorageError>;

    fn commit(&mut self) -> Result<(), StorageError>;
}

/// RAM-backed storage, erased to `0xFF` like a fresh flash sector.
#[derive(Debug, Clone)]
pub struct MemoryStorage {
    bytes: Vec<u8>,
    commits: usize,
}

impl MemoryStorage {
    pub fn new(capacity: usize) -> Self {
        Self {
            bytes: vec![0xFF; capacity],
            commits: 0,
        }
    }

    /// Wraps an existing image, padding or truncating it to `capacity`.
    pub fn from_bytes(mut bytes: Vec<u8>, capacity: usize) -> Self {
        bytes.resize(capacity, 0xFF);
        Self { bytes, commits: 0 }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    pub fn commit_count(&self) -> usize {
        self.commits
    }

    fn check_range(&self, offset: usize, len: usize) -> Result<(), StorageError> {
        match offset.checked_add(len) {
            Some(end) if end <= self.bytes.len() => Ok(()),
            _ => Err(StorageError::OutOfBounds {
                offset,
                len,
                capacity: self.bytes.len(),
            }),
        }
    }
}

impl Storage for MemoryStorage {
    fn capacity(&self) -> usize {
        self.bytes.len()
    }

    fn read(&self, offset: usize, buf: &mut [u8]) -> Result<(), StorageError> {
        self.check_range(offset, buf.len())?;
        buf.copy_from_slice(&self.bytes[offset..offset + buf.len()]);
        Ok(())
    }

    fn write(&mut self, offset: usize, data: &[u8]) -> Result<(), StorageError> {
        self.check_range(offset, data.len())?;
        self.bytes[offset..offset + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn commit(&mut self) -> Result<(), StorageError> {
        self.commits += 1;
        Ok(())
    }
}
