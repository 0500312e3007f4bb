use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use chunkferry_protocol::{AssembledFile, FileDescriptor};

/// Server-side bookkeeping for one registered file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssemblyRecord {
    pub file_id: String,
    pub file_name: String,
    pub file_size: u64,
    pub chunk_size: u64,
    pub total_chunks: u32,
    /// Stored chunk index -> storage location.
    #[serde(default)]
    pub received: BTreeMap<u32, String>,
    /// Set exactly once, when reassembly succeeds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assembled: Option<AssembledFile>,
}

impl AssemblyRecord {
    pub fn new(descriptor: &FileDescriptor) -> Self {
        Self {
            file_id: descriptor.file_id.clone(),
            file_name: descriptor.file_name.clone(),
            file_size: descriptor.file_size,
            chunk_size: descriptor.chunk_size,
            total_chunks: descriptor.total_chunks,
            received: BTreeMap::new(),
            assembled: None,
        }
    }

    pub fn descriptor(&self) -> FileDescriptor {
        FileDescriptor {
            file_id: self.file_id.clone(),
            file_name: self.file_name.clone(),
            file_size: self.file_size,
            chunk_size: self.chunk_size,
            total_chunks: self.total_chunks,
        }
    }

    /// Returns `true` if `other` describes the same file as this record.
    pub fn matches(&self, other: &FileDescriptor) -> bool {
        self.descriptor() == *other
    }

    pub fn is_received(&self, index: u32) -> bool {
        self.received.contains_key(&index)
    }

    pub fn received_count(&self) -> u32 {
        self.received.len() as u32
    }

    /// Received indexes, ascending. An assembled file reports every index.
    pub fn received_indexes(&self) -> Vec<u32> {
        if self.assembled.is_some() {
            return (0..self.total_chunks).collect();
        }
        self.received.keys().copied().collect()
    }

    /// `{0..totalChunks} \ received`, ascending.
    pub fn missing(&self) -> Vec<u32> {
        if self.assembled.is_some() {
            return Vec::new();
        }
        (0..self.total_chunks)
            .filter(|i| !self.received.contains_key(i))
            .collect()
    }

    pub fn is_covered(&self) -> bool {
        self.received_count() == self.total_chunks
    }

    pub fn from_json(data: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(data)
    }

    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor() -> FileDescriptor {
        FileDescriptor {
            file_id: "f1".into(),
            file_name: "a.bin".into(),
            file_size: 10,
            chunk_size: 4,
            total_chunks: 3,
        }
    }

    #[test]
    fn missing_lists_gaps() {
        let mut r = AssemblyRecord::new(&descriptor());
        r.received.insert(0, "p0".into());
        r.received.insert(2, "p2".into());
        assert_eq!(r.missing(), vec![1]);
        assert!(!r.is_covered());
        r.received.insert(1, "p1".into());
        assert!(r.missing().is_empty());
        assert!(r.is_covered());
    }

    #[test]
    fn matches_compares_all_fields() {
        let r = AssemblyRecord::new(&descriptor());
        assert!(r.matches(&descriptor()));
        let mut other = descriptor();
        other.file_size = 11;
        assert!(!r.matches(&other));
    }

    #[test]
    fn assembled_record_reports_every_index() {
        let mut r = AssemblyRecord::new(&descriptor());
        r.assembled = Some(AssembledFile {
            file_id: "f1".into(),
            file_name: "a.bin".into(),
            file_size: 10,
            total_chunks: 3,
            sha256: "00".into(),
            path: "/x".into(),
        });
        assert_eq!(r.received_indexes(), vec![0, 1, 2]);
        assert!(r.missing().is_empty());
    }

    #[test]
    fn record_json_keeps_integer_keys() {
        let mut r = AssemblyRecord::new(&descriptor());
        r.received.insert(2, "chunks/f1/chunk_2".into());

        let json = r.to_json().unwrap();
        let text = String::from_utf8(json.clone()).unwrap();
        assert!(text.contains("\"2\": \"chunks/f1/chunk_2\""));
        assert_eq!(AssemblyRecord::from_json(&json).unwrap(), r);
    }
}
