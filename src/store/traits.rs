//! Data store client abstraction

use async_trait::async_trait;
use mongodb::bson::{doc, Bson, Document};

use crate::error::{HarnessError, Result};
use crate::topology::ConnectionDescriptor;

/// One document written by the generator
///
/// `number` is assigned by the generator; everything else in the document
/// (including `_id`) is carried in `metadata`.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteRecord {
    pub number: i64,
    pub metadata: Document,
}

impl WriteRecord {
    pub fn new(number: i64) -> Self {
        WriteRecord {
            number,
            metadata: Document::new(),
        }
    }

    /// Decode a stored document; `number` may be stored as int32 or int64
    pub fn from_document(mut document: Document) -> Result<Self> {
        let number = match document.remove("number") {
            Some(Bson::Int64(n)) => n,
            Some(Bson::Int32(n)) => i64::from(n),
            Some(other) => {
                return Err(HarnessError::Connectivity(format!(
                    "record has non-integer number: {}",
                    other
                )))
            }
            None => {
                return Err(HarnessError::Connectivity(
                    "record without a number field".to_string(),
                ))
            }
        };
        Ok(WriteRecord {
            number,
            metadata: document,
        })
    }

    pub fn to_document(&self) -> Document {
        let mut document = doc! { "number": self.number };
        for (key, value) in &self.metadata {
            document.insert(key.clone(), value.clone());
        }
        document
    }
}

/// Operations the harness performs against the workload database
#[async_trait]
pub trait DataStore: Send + Sync {
    /// Number of documents in `collection`, counted by walking a cursor over
    /// every document. Never uses a server-side count.
    async fn count_by_scan(&self, collection: &str) -> Result<u64>;

    /// Document with the highest `number`, or `None` for an empty/missing collection
    async fn find_max_number(&self, collection: &str) -> Result<Option<WriteRecord>>;

    /// Insert one record and wait for acknowledgement
    async fn insert(&self, collection: &str, record: &WriteRecord) -> Result<()>;

    /// Drop `collection`; dropping a missing collection succeeds
    async fn drop_collection(&self, collection: &str) -> Result<()>;

    /// Recent lines of the connected member's server log
    async fn log_lines(&self) -> Result<Vec<String>>;
}

/// Opens [`DataStore`] handles for a descriptor
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
        descriptor: &ConnectionDescriptor,
        database: &str,
    ) -> Result<Box<dyn DataStore>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_from_int32_document() {
        let record = WriteRecord::from_document(doc! { "_id": 7, "number": 42_i32 }).unwrap();
        assert_eq!(record.number, 42);
        assert_eq!(record.metadata.get_i32("_id").unwrap(), 7);
    }

    #[test]
    fn test_record_rejects_missing_number() {
        assert!(WriteRecord::from_document(doc! { "value": "x" }).is_err());
        assert!(WriteRecord::from_document(doc! { "number": "x" }).is_err());
    }

    #[test]
    fn test_record_document_keeps_metadata() {
        let mut record = WriteRecord::new(3);
        record.metadata.insert("writer", "host-a");
        let document = record.to_document();
        assert_eq!(document.get_i64("number").unwrap(), 3);
        assert_eq!(document.get_str("writer").unwrap(), "host-a");
    }
}
