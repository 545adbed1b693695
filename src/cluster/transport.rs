//! Inter-Node Transport
//!
//! The core treats messaging as a narrow collaborator: "send this request
//! line to a named job on a named node and give me the response within a
//! timeout", plus "deliver this file into a directory on that node". The
//! `MessageSender` trait is that boundary; `HttpMessageSender` is the
//! production implementation, with the same bounded retry + jitter policy
//! used everywhere else in the cluster.

use crate::cluster::topology::ClusterTopology;
use crate::error::{ClusterJobError, Result};
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Default round-trip timeout for a single request attempt.
pub const REQUEST_TIMEOUT: Duration = Duration::from_millis(500);
/// Attempts per logical send before the failure is surfaced to the caller.
pub const REQUEST_ATTEMPTS: usize = 3;

#[async_trait]
pub trait MessageSender: Send + Sync {
    /// Sends a raw protocol line to the job with the given local id on the
    /// named node, returning the plain-text response.
    async fn send_request(&self, node: &str, job_id: u64, line: &str) -> Result<String>;

    /// Delivers a file's bytes into a directory on the named node.
    async fn deliver_file(
        &self,
        node: &str,
        remote_dir: &Path,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> Result<()>;
}

pub struct HttpMessageSender {
    topology: Arc<ClusterTopology>,
    http_client: reqwest::Client,
}

impl HttpMessageSender {
    pub fn new(topology: Arc<ClusterTopology>) -> Self {
        Self {
            topology,
            http_client: reqwest::Client::new(),
        }
    }

    fn addr_of(&self, node: &str) -> Result<std::net::SocketAddr> {
        self.topology
            .node(node)
            .map(|entry| entry.http_addr)
            .ok_or_else(|| ClusterJobError::UnknownNode(node.to_string()))
    }

    async fn post_with_retry(
        &self,
        url: String,
        body: Vec<u8>,
        timeout: Duration,
        attempts: usize,
    ) -> Result<reqwest::Response> {
        let mut delay_ms = 150u64;

        for attempt in 0..attempts {
            let response = self
                .http_client
                .post(url.clone())
                .body(body.clone())
                .timeout(timeout)
                .send()
                .await;

            match response {
                Ok(resp) => return Ok(resp),
                Err(e) => {
                    if attempt + 1 == attempts {
                        return Err(ClusterJobError::Transport(e.to_string()));
                    }
                    // Simple jitter to prevent thundering herd
                    let jitter = rand::random::<u64>() % 50;
                    tokio::time::sleep(Duration::from_millis(delay_ms + jitter)).await;
                    delay_ms = (delay_ms * 2).min(1200);
                }
            }
        }

        Err(ClusterJobError::Transport(
            "retry attempts exhausted".to_string(),
        ))
    }
}

#[async_trait]
impl MessageSender for HttpMessageSender {
    async fn send_request(&self, node: &str, job_id: u64, line: &str) -> Result<String> {
        let addr = self.addr_of(node)?;
        let url = format!("http://{}/work/request/{}", addr, job_id);

        let response = self
            .post_with_retry(
                url,
                line.as_bytes().to_vec(),
                REQUEST_TIMEOUT,
                REQUEST_ATTEMPTS,
            )
            .await?;

        if !response.status().is_success() {
            return Err(ClusterJobError::Transport(format!(
                "work request to {} failed: {}",
                node,
                response.status()
            )));
        }

        response
            .text()
            .await
            .map_err(|e| ClusterJobError::Transport(e.to_string()))
    }

    async fn deliver_file(
        &self,
        node: &str,
        remote_dir: &Path,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> Result<()> {
        let addr = self.addr_of(node)?;
        let url = format!(
            "http://{}/internal/deliver_file?dir={}&name={}",
            addr,
            remote_dir.display(),
            file_name
        );

        // File payloads can be large; give delivery a wider window than the
        // command round-trip.
        let response = self
            .post_with_retry(url, bytes, Duration::from_secs(10), REQUEST_ATTEMPTS)
            .await?;

        if !response.status().is_success() {
            return Err(ClusterJobError::Transport(format!(
                "file delivery to {} failed: {}",
                node,
                response.status()
            )));
        }

        tracing::debug!("Delivered {} to {} ({})", file_name, node, remote_dir.display());

        Ok(())
    }
}
