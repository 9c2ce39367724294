//! Forwarding to upstream relay peers.
//!
//! A [`NetworkStore`] resolves its target statically (`remote_host` /
//! `remote_port`, optionally through a `zk://` coordination path) or through
//! the service-discovery collaborator, then sends batches over either a
//! process-wide reference-counted connection pool or its own long-lived
//! connection.
//!
//! # Wire Format
//!
//! A batch is one length-delimited frame:
//!
//! ```text
//! [u32: entry count] ([u32: category len][category][u32: message len][message])*
//! ```
//!
//! All integers little-endian.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{BufMut, BytesMut};
use chrono::Local;
use chute_config::StoreConfig;
use chute_protocol::LogBatch;
use dashmap::DashMap;
use socket2::{SockRef, TcpKeepalive};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;

const DEFAULT_SOCKET_TIMEOUT_MS: i64 = 5000;
const DEFAULT_SERVICE_CACHE_TIMEOUT: u64 = 300;
const TCP_KEEPALIVE_TIME: Duration = Duration::from_secs(30);

use crate::store::{Store, StoreContext, StoreCore};

/// A resolved upstream endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostPort {
    pub host: String,
    pub port: u16,
}

impl HostPort {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl std::fmt::Display for HostPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Service-discovery collaborator consumed by network stores.
///
/// The daemon hands one shared instance to every store; tests substitute
/// fixed maps.
#[async_trait]
pub trait ServiceDiscovery: Send + Sync {
    /// Servers currently registered for a named service.
    async fn resolve(&self, service: &str, options: &str) -> Option<Vec<HostPort>>;

    /// Resolve a coordination znode path to a single endpoint.
    async fn resolve_znode(&self, znode: &str) -> Option<HostPort>;
}

/// Discovery backed by a fixed map; the default collaborator.
#[derive(Debug, Default)]
pub struct StaticDiscovery {
    services: HashMap<String, Vec<HostPort>>,
    znodes: HashMap<String, HostPort>,
}

impl StaticDiscovery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_service(&mut self, service: impl Into<String>, servers: Vec<HostPort>) {
        self.services.insert(service.into(), servers);
    }

    pub fn add_znode(&mut self, znode: impl Into<String>, server: HostPort) {
        self.znodes.insert(znode.into(), server);
    }
}

#[async_trait]
impl ServiceDiscovery for StaticDiscovery {
    async fn resolve(&self, service: &str, _options: &str) -> Option<Vec<HostPort>> {
        self.services.get(service).cloned()
    }

    async fn resolve_znode(&self, znode: &str) -> Option<HostPort> {
        self.znodes.get(znode).cloned()
    }
}

/// One long-lived upstream connection.
pub struct RelayConn {
    targets: Vec<HostPort>,
    timeout: Duration,
    stream: Option<TcpStream>,
    remote: String,
}

impl RelayConn {
    pub fn new(targets: Vec<HostPort>, timeout: Duration) -> Self {
        Self {
            targets,
            timeout,
            stream: None,
            remote: String::new(),
        }
    }

    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    /// Try each target in order until one accepts the connection.
    pub async fn open(&mut self) -> bool {
        for target in self.targets.clone() {
            let address = target.to_string();
            match timeout(self.timeout, TcpStream::connect(&address)).await {
                Ok(Ok(stream)) => {
                    if let Err(e) = stream.set_nodelay(true) {
                        tracing::debug!(remote = %address, error = %e, "failed to set nodelay");
                    }
                    let keepalive = TcpKeepalive::new().with_time(TCP_KEEPALIVE_TIME);
                    if let Err(e) = SockRef::from(&stream).set_tcp_keepalive(&keepalive) {
                        tracing::debug!(remote = %address, error = %e, "failed to set keepalive");
                    }

                    tracing::info!(remote = %address, "opened connection");
                    self.remote = address;
                    self.stream = Some(stream);
                    return true;
                }
                Ok(Err(e)) => {
                    tracing::warn!(remote = %address, error = %e, "failed to connect");
                }
                Err(_) => {
                    tracing::warn!(remote = %address, "connection attempt timed out");
                }
            }
        }
        false
    }

    pub fn close(&mut self) {
        if self.stream.take().is_some() {
            tracing::info!(remote = %self.remote, "closed connection");
        }
    }

    /// Send one batch frame. Any error tears the connection down.
    pub async fn send(&mut self, batch: &LogBatch) -> bool {
        let Some(stream) = self.stream.as_mut() else {
            return false;
        };

        let mut frame = BytesMut::with_capacity(64 + batch.iter().map(|e| e.message.len()).sum::<usize>());
        frame.put_u32_le(batch.len() as u32);
        for entry in batch {
            frame.put_u32_le(entry.category.len() as u32);
            frame.extend_from_slice(entry.category.as_bytes());
            frame.put_u32_le(entry.message.len() as u32);
            frame.extend_from_slice(&entry.message);
        }

        match timeout(self.timeout, stream.write_all(&frame)).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                tracing::warn!(remote = %self.remote, error = %e, "send failed, closing connection");
                self.close();
                false
            }
            Err(_) => {
                tracing::warn!(remote = %self.remote, "send timed out, closing connection");
                self.close();
                false
            }
        }
    }
}

struct PooledConn {
    conn: RelayConn,
    refcount: usize,
}

/// Process-wide pool of upstream connections, keyed by service name or
/// `host:port`. Entries are reference counted so copies of a store can
/// share one connection and close it exactly once.
#[derive(Default)]
pub struct ConnPool {
    conns: DashMap<String, Arc<Mutex<PooledConn>>>,
}

impl ConnPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire (and open if necessary) the pooled connection for `key`.
    pub async fn open(&self, key: &str, targets: &[HostPort], conn_timeout: Duration) -> bool {
        let cell = {
            let entry = self.conns.entry(key.to_string()).or_insert_with(|| {
                Arc::new(Mutex::new(PooledConn {
                    conn: RelayConn::new(targets.to_vec(), conn_timeout),
                    refcount: 0,
                }))
            });
            Arc::clone(&entry)
        };

        let mut pooled = cell.lock().await;
        if !pooled.conn.is_open() && !pooled.conn.open().await {
            return false;
        }
        pooled.refcount += 1;
        true
    }

    /// Release one reference; the connection closes when the last holder
    /// lets go.
    pub async fn close(&self, key: &str) {
        let Some(cell) = self.conns.get(key).map(|entry| Arc::clone(&entry)) else {
            return;
        };
        let mut pooled = cell.lock().await;
        pooled.refcount = pooled.refcount.saturating_sub(1);
        if pooled.refcount == 0 {
            pooled.conn.close();
        }
    }

    /// Send a batch over the pooled connection for `key`.
    pub async fn send(&self, key: &str, batch: &LogBatch) -> bool {
        let Some(cell) = self.conns.get(key).map(|entry| Arc::clone(&entry)) else {
            tracing::error!(key, "no pooled connection for key");
            return false;
        };
        let mut pooled = cell.lock().await;
        pooled.conn.send(batch).await
    }

    /// Reference count for a key; zero when absent. Test support.
    pub async fn refcount(&self, key: &str) -> usize {
        match self.conns.get(key).map(|entry| Arc::clone(&entry)) {
            Some(cell) => cell.lock().await.refcount,
            None => 0,
        }
    }
}

/// Store that forwards batches to an upstream relay.
pub struct NetworkStore {
    core: StoreCore,

    use_conn_pool: bool,
    service_based: bool,
    remote_host: String,
    remote_port: u16,
    service_name: String,
    service_options: String,
    service_cache_timeout: u64,
    timeout_ms: i64,

    last_service_check: i64,
    servers: Vec<HostPort>,
    /// Guards pool refcounts against duplicate close calls.
    opened: bool,
    unpooled: Option<RelayConn>,
}

impl NetworkStore {
    pub fn new(ctx: StoreContext, category: &str, multi_category: bool) -> Self {
        Self {
            core: StoreCore::new(ctx, category, multi_category),
            use_conn_pool: false,
            service_based: false,
            remote_host: String::new(),
            remote_port: 0,
            service_name: String::new(),
            service_options: String::new(),
            service_cache_timeout: DEFAULT_SERVICE_CACHE_TIMEOUT,
            timeout_ms: DEFAULT_SOCKET_TIMEOUT_MS,
            last_service_check: 0,
            servers: Vec::new(),
            opened: false,
            unpooled: None,
        }
    }

    fn socket_timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.max(0) as u64)
    }

    fn pool_key(&self) -> String {
        if self.service_based {
            self.service_name.clone()
        } else {
            format!("{}:{}", self.remote_host, self.remote_port)
        }
    }

    /// Resolve a `zk://` host through the discovery collaborator. Runs at
    /// open time so configure stays I/O-free.
    async fn resolve_coordination_path(&mut self) -> bool {
        let Some(znode) = self.remote_host.strip_prefix("zk://").map(str::to_string) else {
            return true;
        };
        match self.core.ctx.discovery.resolve_znode(&znode).await {
            Some(endpoint) => {
                tracing::info!(
                    category = %self.core.category,
                    znode = %znode,
                    remote = %endpoint,
                    "resolved coordination path"
                );
                self.remote_host = endpoint.host;
                self.remote_port = endpoint.port;
                true
            }
            None => {
                tracing::error!(
                    category = %self.core.category,
                    znode = %znode,
                    "failed to resolve coordination path"
                );
                self.core.set_status("Could not resolve remote host");
                false
            }
        }
    }
}

#[async_trait]
impl Store for NetworkStore {
    fn category(&self) -> &str {
        &self.core.category
    }

    fn store_type(&self) -> &'static str {
        "network"
    }

    fn status(&self) -> String {
        self.core.status()
    }

    fn configure(&mut self, config: &StoreConfig) {
        // Error checking happens in open(); a service name takes precedence
        // over host + port.
        if let Some(service) = config.get_string("smc_service") {
            self.service_based = true;
            self.service_name = service.to_string();
            if let Some(options) = config.get_string("service_options") {
                self.service_options = options.to_string();
            }
            if let Some(timeout) = config.get_unsigned("service_cache_timeout") {
                self.service_cache_timeout = timeout;
            }
        } else {
            self.service_based = false;
            if let Some(host) = config.get_string("remote_host") {
                self.remote_host = host.to_string();
            }
            if let Some(port) = config.get_unsigned("remote_port") {
                self.remote_port = port as u16;
            }
        }

        if let Some(timeout) = config.get_int("timeout") {
            self.timeout_ms = timeout;
        }
        if config.get_flag("use_conn_pool") == Some(true) {
            self.use_conn_pool = true;
        }
    }

    async fn open(&mut self) -> bool {
        if self.service_based {
            let now = Local::now().timestamp();

            // Only fetch the server list when the cache has gone stale.
            if self.last_service_check <= now - self.service_cache_timeout as i64 {
                self.last_service_check = now;
                match self
                    .core
                    .ctx
                    .discovery
                    .resolve(&self.service_name, &self.service_options)
                    .await
                {
                    Some(servers) => self.servers = servers,
                    None => self.servers.clear(),
                }
            }

            if self.servers.is_empty() {
                tracing::error!(
                    category = %self.core.category,
                    service = %self.service_name,
                    "failed to get servers from service discovery"
                );
                self.core
                    .set_status("Could not get list of servers from service discovery");
                return false;
            }
        } else {
            if !self.resolve_coordination_path().await {
                return false;
            }
            if self.remote_port == 0 || self.remote_host.is_empty() {
                tracing::error!(
                    category = %self.core.category,
                    remote_host = %self.remote_host,
                    remote_port = self.remote_port,
                    "won't attempt to connect to invalid remote server"
                );
                self.core
                    .set_status("Bad config - invalid location for remote server");
                return false;
            }
        }

        let targets = if self.service_based {
            self.servers.clone()
        } else {
            vec![HostPort::new(self.remote_host.clone(), self.remote_port)]
        };

        if self.use_conn_pool {
            self.opened = self
                .core
                .ctx
                .conn_pool
                .open(&self.pool_key(), &targets, self.socket_timeout())
                .await;
        } else {
            let conn_timeout = self.socket_timeout();
            let conn = self
                .unpooled
                .get_or_insert_with(|| RelayConn::new(targets, conn_timeout));
            self.opened = conn.is_open() || conn.open().await;
        }

        if self.opened {
            self.core.set_status("");
        } else {
            self.core.set_status("Failed to connect");
        }
        self.opened
    }

    fn is_open(&self) -> bool {
        self.opened
    }

    async fn close(&mut self) {
        if !self.opened {
            return;
        }
        self.opened = false;
        if self.use_conn_pool {
            self.core.ctx.conn_pool.close(&self.pool_key()).await;
        } else if let Some(conn) = self.unpooled.as_mut() {
            conn.close();
        }
    }

    async fn flush(&mut self) {}

    async fn handle_messages(&mut self, batch: &mut LogBatch) -> bool {
        if !self.is_open() {
            tracing::error!(
                category = %self.core.category,
                "logic error: handle_messages called on closed network store"
            );
            return false;
        }

        let sent = if self.use_conn_pool {
            self.core.ctx.conn_pool.send(&self.pool_key(), batch).await
        } else {
            match self.unpooled.as_mut() {
                Some(conn) => conn.send(batch).await,
                None => {
                    tracing::error!(
                        category = %self.core.category,
                        "logic error: unpooled connection missing"
                    );
                    false
                }
            }
        };

        if sent {
            batch.clear();
            true
        } else {
            self.core.set_status("Network write error");
            false
        }
    }

    fn copy(&self, category: &str) -> Box<dyn Store> {
        let mut store = NetworkStore::new(self.core.ctx.clone(), category, self.core.multi_category);
        store.use_conn_pool = self.use_conn_pool;
        store.service_based = self.service_based;
        store.timeout_ms = self.timeout_ms;
        store.remote_host = self.remote_host.clone();
        store.remote_port = self.remote_port;
        store.service_name = self.service_name.clone();
        store.service_options = self.service_options.clone();
        store.service_cache_timeout = self.service_cache_timeout;
        Box::new(store)
    }
}

#[cfg(test)]
#[path = "network_test.rs"]
mod network_test;
