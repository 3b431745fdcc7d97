//! Directory clients resolved from a [`DirectoryConfig`].

use crate::config::{ConfigError, DirectoryConfig, DirectoryService};
use crate::connection::{Connection, Connections};
use crate::grpc::GrpcDirectory;

/// Connections to each directory service; `None` where no section applies.
#[derive(Debug, Clone, Default)]
pub struct Directory {
    pub reader: Option<Connection>,
    pub writer: Option<Connection>,
    pub importer: Option<Connection>,
    pub exporter: Option<Connection>,
    pub model: Option<Connection>,
}

impl Directory {
    /// Relation-check client on the reader connection.
    #[must_use]
    pub fn reader_client(&self) -> Option<GrpcDirectory> {
        self.reader.clone().map(GrpcDirectory::new)
    }
}

impl DirectoryConfig {
    /// Connect every configured service through `conns`; services whose
    /// effective settings are identical share one channel.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::EmptyDirectory`] or the first connection error.
    pub fn connect(&self, conns: &Connections) -> Result<Directory, ConfigError> {
        self.validate()?;

        let get = |service| {
            self.section(service)
                .map(|config| conns.get(config))
                .transpose()
        };

        Ok(Directory {
            reader: get(DirectoryService::Reader)?,
            writer: get(DirectoryService::Writer)?,
            importer: get(DirectoryService::Importer)?,
            exporter: get(DirectoryService::Exporter)?,
            model: get(DirectoryService::Model)?,
        })
    }
}
