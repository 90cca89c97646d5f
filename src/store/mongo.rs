//! MongoDB implementation of the store traits

use std::time::Duration;

use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::bson::{doc, Bson, Document};
use mongodb::error::{Error as MongoError, ErrorKind};
use mongodb::options::{ClientOptions, FindOneOptions, FindOptions};
use mongodb::{Client, Database};
use tracing::debug;

use super::traits::{Connector, DataStore, WriteRecord};
use crate::error::{HarnessError, Result};
use crate::topology::ConnectionDescriptor;

/// Server error code for a missing namespace
const NAMESPACE_NOT_FOUND: i32 = 26;

fn map_err(e: MongoError) -> HarnessError {
    match e.kind.as_ref() {
        ErrorKind::Authentication { message, .. } => HarnessError::AuthResolution(message.clone()),
        _ => HarnessError::Connectivity(e.to_string()),
    }
}

fn is_namespace_not_found(e: &MongoError) -> bool {
    matches!(e.kind.as_ref(), ErrorKind::Command(cmd) if cmd.code == NAMESPACE_NOT_FOUND)
}

/// Opens MongoDB clients from connection descriptors
#[derive(Debug, Clone)]
pub struct MongoConnector {
    server_selection_timeout: Duration,
}

impl MongoConnector {
    pub fn new() -> Self {
        MongoConnector {
            server_selection_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_server_selection_timeout(mut self, timeout: Duration) -> Self {
        self.server_selection_timeout = timeout;
        self
    }
}

impl Default for MongoConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl MongoConnector {
    /// Open `database` through a raw connection string. `label` is what gets
    /// logged in place of the string, which may carry a password.
    pub async fn connect_uri(&self, uri: &str, label: &str, database: &str) -> Result<MongoStore> {
        let mut options = ClientOptions::parse(uri)
            .await
            .map_err(|e| HarnessError::Connectivity(format!("{}: {}", label, e)))?;
        options.server_selection_timeout = Some(self.server_selection_timeout);
        options.app_name = Some("ha-harness".to_string());

        let client = Client::with_options(options).map_err(map_err)?;
        debug!(uri = %label, database, "opened client");
        Ok(MongoStore {
            database: client.database(database),
            client,
        })
    }
}

#[async_trait]
impl Connector for MongoConnector {
    async fn connect(
        &self,
        descriptor: &ConnectionDescriptor,
        database: &str,
    ) -> Result<Box<dyn DataStore>> {
        let store = self
            .connect_uri(&descriptor.uri(), &descriptor.redacted_uri(), database)
            .await?;
        Ok(Box::new(store))
    }
}

/// Handle on the workload database of one cluster
pub struct MongoStore {
    client: Client,
    database: Database,
}

#[async_trait]
impl DataStore for MongoStore {
    async fn count_by_scan(&self, collection: &str) -> Result<u64> {
        let options = FindOptions::builder().projection(doc! { "_id": 1 }).build();
        let mut cursor = self
            .database
            .collection::<Document>(collection)
            .find(None, options)
            .await
            .map_err(map_err)?;

        let mut count = 0u64;
        while cursor.try_next().await.map_err(map_err)?.is_some() {
            count += 1;
        }
        Ok(count)
    }

    async fn find_max_number(&self, collection: &str) -> Result<Option<WriteRecord>> {
        let options = FindOneOptions::builder().sort(doc! { "number": -1 }).build();
        let found = self
            .database
            .collection::<Document>(collection)
            .find_one(None, options)
            .await
            .map_err(map_err)?;
        found.map(WriteRecord::from_document).transpose()
    }

    async fn insert(&self, collection: &str, record: &WriteRecord) -> Result<()> {
        self.database
            .collection::<Document>(collection)
            .insert_one(record.to_document(), None)
            .await
            .map_err(map_err)?;
        Ok(())
    }

    async fn drop_collection(&self, collection: &str) -> Result<()> {
        match self.database.collection::<Document>(collection).drop(None).await {
            Ok(()) => Ok(()),
            Err(e) if is_namespace_not_found(&e) => Ok(()),
            Err(e) => Err(map_err(e)),
        }
    }

    async fn log_lines(&self) -> Result<Vec<String>> {
        let reply = self
            .client
            .database("admin")
            .run_command(doc! { "getLog": "global" }, None)
            .await
            .map_err(map_err)?;

        let lines = match reply.get("log") {
            Some(Bson::Array(entries)) => entries
                .iter()
                .filter_map(|entry| entry.as_str().map(str::to_string))
                .collect(),
            _ => Vec::new(),
        };
        Ok(lines)
    }
}
