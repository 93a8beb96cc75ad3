//! SFTP-backed storage broker.
//!
//! libssh2 is a blocking API, so each batch runs on the blocking thread
//! pool over a single connection. Authentication goes through the local
//! ssh-agent for the user named by `FLOODGATE_SFTP_USER` (falling back to
//! `USER`).

use async_trait::async_trait;
use ssh2::{RenameFlags, Session, Sftp};
use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use super::{BrokerError, StorageBroker, StoreMode, SuccessFlag};
use crate::file::{FileCollection, PipelineFile, RemoteFileMeta};

pub struct SftpBroker {
    host: String,
    port: u16,
    prefix: PathBuf,
}

impl SftpBroker {
    pub fn new(host: impl Into<String>, prefix: impl Into<PathBuf>) -> Self {
        let host = host.into();
        let (host, port) = match host.split_once(':') {
            Some((h, p)) => (h.to_string(), p.parse().unwrap_or(22)),
            None => (host, 22),
        };
        Self {
            host,
            port,
            prefix: prefix.into(),
        }
    }

    fn connect(host: &str, port: u16) -> Result<Sftp, BrokerError> {
        let user = std::env::var("FLOODGATE_SFTP_USER")
            .or_else(|_| std::env::var("USER"))
            .map_err(|_| BrokerError::Credentials("FLOODGATE_SFTP_USER"))?;
        let tcp = std::net::TcpStream::connect((host, port))?;
        let mut session = Session::new().map_err(|e| BrokerError::Query(e.to_string()))?;
        session.set_tcp_stream(tcp);
        session
            .handshake()
            .map_err(|e| BrokerError::Query(format!("ssh handshake: {}", e)))?;
        session
            .userauth_agent(&user)
            .map_err(|e| BrokerError::Query(format!("ssh auth for '{}': {}", user, e)))?;
        session
            .sftp()
            .map_err(|e| BrokerError::Query(format!("sftp channel: {}", e)))
    }

    fn mkdir_recursive(sftp: &Sftp, dir: &Path) {
        let mut current = PathBuf::new();
        for component in dir.components() {
            current.push(component);
            // Errors here are either "already exists" or will resurface as
            // an open failure with better context.
            let _ = sftp.mkdir(&current, 0o755);
        }
    }

    fn upload_one(sftp: &Sftp, src: &Path, dest: &Path) -> Result<(), String> {
        if let Some(parent) = dest.parent() {
            Self::mkdir_recursive(sftp, parent);
        }
        let file_name = dest
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "upload".to_string());
        let partial = dest.with_file_name(format!(".{}.part", file_name));

        let mut local = std::fs::File::open(src).map_err(|e| e.to_string())?;
        let mut remote = sftp.create(&partial).map_err(|e| e.to_string())?;
        let mut buf = [0u8; 64 * 1024];
        loop {
            let n = local.read(&mut buf).map_err(|e| e.to_string())?;
            if n == 0 {
                break;
            }
            remote.write_all(&buf[..n]).map_err(|e| e.to_string())?;
        }
        drop(remote);
        sftp.rename(&partial, dest, Some(RenameFlags::OVERWRITE))
            .map_err(|e| e.to_string())
    }

    async fn run_batch<T, F>(&self, op: F) -> Result<T, BrokerError>
    where
        T: Send + 'static,
        F: FnOnce(Sftp) -> Result<T, BrokerError> + Send + 'static,
    {
        let host = self.host.clone();
        let port = self.port;
        tokio::task::spawn_blocking(move || {
            let sftp = Self::connect(&host, port)?;
            op(sftp)
        })
        .await
        .map_err(|e| BrokerError::Query(format!("sftp task: {}", e)))?
    }
}

#[async_trait]
impl StorageBroker for SftpBroker {
    fn name(&self) -> &str {
        "sftp"
    }

    async fn upload(
        &self,
        files: &FileCollection,
        mode: StoreMode,
        flag: SuccessFlag,
    ) -> Result<(), BrokerError> {
        let batch: Vec<Arc<PipelineFile>> = files.iter().cloned().collect();
        let prefix = self.prefix.clone();
        self.run_batch(move |sftp| {
            for file in &batch {
                let rel_path = mode.dest_of(file)?;
                let src = file
                    .require_src_path()
                    .map_err(|_| BrokerError::NoSourcePath(file.name().to_string()))?;
                let dest = prefix.join(&rel_path);
                Self::upload_one(&sftp, src, &dest).map_err(|reason| {
                    BrokerError::UploadFailed {
                        dest_path: rel_path.clone(),
                        reason,
                    }
                })?;
                debug!("uploaded '{}' -> '{}'", file.name(), dest.display());
                flag.apply(file);
            }
            Ok(())
        })
        .await
    }

    async fn delete(
        &self,
        files: &FileCollection,
        mode: StoreMode,
        flag: SuccessFlag,
    ) -> Result<(), BrokerError> {
        let batch: Vec<Arc<PipelineFile>> = files.iter().cloned().collect();
        let prefix = self.prefix.clone();
        self.run_batch(move |sftp| {
            for file in &batch {
                let rel_path = mode.dest_of(file)?;
                let dest = prefix.join(&rel_path);
                // Absent files count as deleted, matching the other
                // backends.
                if sftp.stat(&dest).is_ok() {
                    sftp.unlink(&dest).map_err(|e| BrokerError::DeleteFailed {
                        dest_path: rel_path.clone(),
                        reason: e.to_string(),
                    })?;
                }
                debug!("deleted '{}'", dest.display());
                flag.apply(file);
            }
            Ok(())
        })
        .await
    }

    async fn query(&self, _prefix: &str) -> Result<BTreeMap<String, RemoteFileMeta>, BrokerError> {
        // Listing over SFTP would need a full remote walk per previous-run
        // lookup. No pipeline uses it today, so make the gap loud.
        Err(BrokerError::Unsupported("sftp query"))
    }

    async fn exists(&self, dest_path: &str) -> Result<bool, BrokerError> {
        let dest = self.prefix.join(dest_path);
        self.run_batch(move |sftp| Ok(sftp.stat(&dest).is_ok())).await
    }
}
