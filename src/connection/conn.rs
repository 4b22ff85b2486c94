// src/connection/conn.rs

//! Defines `Connection`, the session state that wraps one channel.

use super::Channel;
use crate::client::ConnectionUrl;
use crate::core::invoke::InvokeFuture;
use crate::core::metrics;
use crate::core::protocol::Protocol;
use crate::core::{Command, InvokeId, ProtocolCode, ProtocolVersion, RemotingError};
use bytes::BytesMut;
use dashmap::mapref::entry::Entry;
use dashmap::{DashMap, DashSet};
use std::any::Any;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, Ordering};
use tracing::{debug, info, warn};

/// A free-form value stored in a connection's attribute table.
pub type Attribute = Arc<dyn Any + Send + Sync>;

/// One logical connection: a channel bound to a single protocol and version,
/// plus the table of invocations still waiting for a response on it.
///
/// # Lifecycle
///
/// A connection starts fine and becomes permanently unusable after `close`.
/// Closing drains the invoke-future table exactly once: every outstanding call
/// is failed with a connection-closed result and its callback is dispatched
/// off the calling task.
pub struct Connection {
    channel: Arc<dyn Channel>,
    protocol: Arc<dyn Protocol>,
    protocol_version: ProtocolVersion,
    url: Option<ConnectionUrl>,
    pool_keys: DashSet<String>,
    id_to_pool_key: DashMap<InvokeId, String>,
    invoke_futures: DashMap<InvokeId, Arc<InvokeFuture>>,
    attributes: DashMap<String, Attribute>,
    closed: AtomicBool,
    drained: AtomicBool,
    ref_count: AtomicI32,
    heartbeat_enabled: AtomicBool,
    heartbeat_failures: AtomicU32,
}

impl Connection {
    pub fn new(
        channel: Arc<dyn Channel>,
        protocol: Arc<dyn Protocol>,
        protocol_version: ProtocolVersion,
    ) -> Self {
        Self {
            channel,
            protocol,
            protocol_version,
            url: None,
            pool_keys: DashSet::new(),
            id_to_pool_key: DashMap::new(),
            invoke_futures: DashMap::new(),
            attributes: DashMap::new(),
            closed: AtomicBool::new(false),
            drained: AtomicBool::new(false),
            ref_count: AtomicI32::new(0),
            heartbeat_enabled: AtomicBool::new(true),
            heartbeat_failures: AtomicU32::new(0),
        }
    }

    /// A client connection created for `url`; the url's unique key becomes a pool key.
    pub fn with_url(
        channel: Arc<dyn Channel>,
        protocol: Arc<dyn Protocol>,
        protocol_version: ProtocolVersion,
        url: ConnectionUrl,
    ) -> Self {
        let mut conn = Self::new(channel, protocol, protocol_version);
        conn.pool_keys.insert(url.unique_key());
        conn.url = Some(url);
        conn
    }

    /// True while the connection is open and its channel active.
    pub fn is_fine(&self) -> bool {
        !self.closed.load(Ordering::Acquire) && self.channel.is_active()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn channel(&self) -> &Arc<dyn Channel> {
        &self.channel
    }

    pub fn protocol(&self) -> &Arc<dyn Protocol> {
        &self.protocol
    }

    pub fn protocol_code(&self) -> ProtocolCode {
        self.protocol.code()
    }

    pub fn protocol_version(&self) -> ProtocolVersion {
        self.protocol_version
    }

    pub fn url(&self) -> Option<&ConnectionUrl> {
        self.url.as_ref()
    }

    // --- Reference counting ---

    pub fn increase_ref(&self) {
        self.ref_count.fetch_add(1, Ordering::AcqRel);
    }

    pub fn decrease_ref(&self) {
        self.ref_count.fetch_sub(1, Ordering::AcqRel);
    }

    pub fn no_reference(&self) -> bool {
        self.ref_count.load(Ordering::Acquire) == 0
    }

    pub fn ref_count(&self) -> i32 {
        self.ref_count.load(Ordering::Acquire)
    }

    // --- Attributes ---

    pub fn get_attribute(&self, key: &str) -> Option<Attribute> {
        self.attributes.get(key).map(|entry| entry.value().clone())
    }

    /// Returns the attribute downcast to `T`, or `None` if absent or of another type.
    pub fn get_attribute_as<T: Any + Send + Sync>(&self, key: &str) -> Option<Arc<T>> {
        self.get_attribute(key)
            .and_then(|value| value.downcast::<T>().ok())
    }

    pub fn set_attribute(&self, key: impl Into<String>, value: Attribute) {
        self.attributes.insert(key.into(), value);
    }

    /// Stores `value` only if `key` is absent. Returns the existing value otherwise.
    pub fn set_attribute_if_absent(&self, key: impl Into<String>, value: Attribute) -> Option<Attribute> {
        match self.attributes.entry(key.into()) {
            Entry::Occupied(existing) => Some(existing.get().clone()),
            Entry::Vacant(slot) => {
                slot.insert(value);
                None
            }
        }
    }

    pub fn remove_attribute(&self, key: &str) -> Option<Attribute> {
        self.attributes.remove(key).map(|(_, value)| value)
    }

    pub fn clear_attributes(&self) {
        self.attributes.clear();
    }

    pub fn attribute_keys(&self) -> Vec<String> {
        self.attributes.iter().map(|entry| entry.key().clone()).collect()
    }

    // --- Pool keys ---

    pub fn add_pool_key(&self, key: impl Into<String>) {
        self.pool_keys.insert(key.into());
    }

    pub fn remove_pool_key(&self, key: &str) -> bool {
        self.pool_keys.remove(key).is_some()
    }

    /// A snapshot of the pool keys; later changes are not reflected.
    pub fn pool_keys(&self) -> Vec<String> {
        self.pool_keys.iter().map(|key| key.key().clone()).collect()
    }

    pub fn add_id_pool_key_mapping(&self, id: InvokeId, pool_key: impl Into<String>) {
        self.id_to_pool_key.insert(id, pool_key.into());
    }

    pub fn remove_id_pool_key_mapping(&self, id: InvokeId) -> Option<String> {
        self.id_to_pool_key.remove(&id).map(|(_, key)| key)
    }

    // --- Invoke futures ---

    /// Registers `future` unless its id is already taken. Returns the future
    /// already registered under that id, leaving it in place.
    pub fn add_invoke_future(&self, future: Arc<InvokeFuture>) -> Option<Arc<InvokeFuture>> {
        match self.invoke_futures.entry(future.invoke_id()) {
            Entry::Occupied(existing) => Some(existing.get().clone()),
            Entry::Vacant(slot) => {
                slot.insert(future);
                None
            }
        }
    }

    pub fn get_invoke_future(&self, id: InvokeId) -> Option<Arc<InvokeFuture>> {
        self.invoke_futures.get(&id).map(|entry| entry.value().clone())
    }

    /// Removes and returns the future for `id`. Whoever gets `Some` owns its completion.
    pub fn remove_invoke_future(&self, id: InvokeId) -> Option<Arc<InvokeFuture>> {
        self.invoke_futures.remove(&id).map(|(_, future)| future)
    }

    pub fn is_invoke_future_table_empty(&self) -> bool {
        self.invoke_futures.is_empty()
    }

    pub fn invoke_future_count(&self) -> usize {
        self.invoke_futures.len()
    }

    // --- Heartbeat ---

    pub fn is_heartbeat_enabled(&self) -> bool {
        self.heartbeat_enabled.load(Ordering::Acquire)
    }

    pub fn set_heartbeat_enabled(&self, enabled: bool) {
        self.heartbeat_enabled.store(enabled, Ordering::Release);
    }

    pub fn heartbeat_failures(&self) -> u32 {
        self.heartbeat_failures.load(Ordering::Acquire)
    }

    pub fn increase_heartbeat_failures(&self) -> u32 {
        self.heartbeat_failures.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn reset_heartbeat_failures(&self) {
        self.heartbeat_failures.store(0, Ordering::Release);
    }

    // --- Lifecycle ---

    /// Fails every outstanding invocation with a connection-closed result.
    ///
    /// Runs at most once. A future registered after the drain started is left
    /// to its own timeout.
    pub fn on_close(&self) {
        if self.drained.swap(true, Ordering::AcqRel) {
            return;
        }
        let ids: Vec<InvokeId> = self.invoke_futures.iter().map(|entry| *entry.key()).collect();
        let remote = self.remote_addr();
        let mut drained = 0;
        for id in ids {
            if let Some(future) = self.remove_invoke_future(id) {
                future.cancel_timeout();
                future.put_response(future.create_connection_closed_response(remote));
                future.try_async_execute_invoke_callback_abnormally();
                drained += 1;
            }
        }
        if drained > 0 {
            metrics::DRAINED_FUTURES_TOTAL.inc_by(drained as f64);
            debug!("Drained {} invoke futures of connection {}", drained, self.remote_string());
        }
    }

    /// Closes the connection. Only the first call has any effect.
    pub fn close(&self) {
        if self
            .closed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        self.on_close();
        match self.channel.close() {
            Ok(()) => info!(
                "Close the connection to remote address={}, result=true",
                self.remote_string()
            ),
            Err(e) => warn!(
                "Close the connection to remote address={}, result=false, cause={}",
                self.remote_string(),
                e
            ),
        }
    }

    /// Encodes `command` with this connection's protocol and queues it on the channel.
    pub fn send(&self, command: &Command) -> Result<(), RemotingError> {
        let mut buf = BytesMut::new();
        self.protocol.encoder().encode(command, &mut buf)?;
        self.channel.write(buf.freeze())
    }

    // --- Addresses ---

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.channel.remote_addr()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.channel.local_addr()
    }

    pub fn remote_ip(&self) -> Option<IpAddr> {
        self.remote_addr().map(|addr| addr.ip())
    }

    pub fn remote_port(&self) -> Option<u16> {
        self.remote_addr().map(|addr| addr.port())
    }

    pub fn local_ip(&self) -> Option<IpAddr> {
        self.local_addr().map(|addr| addr.ip())
    }

    pub fn local_port(&self) -> Option<u16> {
        self.local_addr().map(|addr| addr.port())
    }

    /// The remote address formatted as `ip:port`, or `unknown`.
    pub fn remote_string(&self) -> String {
        self.remote_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_else(|| "unknown".to_string())
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("remote", &self.remote_addr())
            .field("local", &self.local_addr())
            .field("protocol", &self.protocol_code())
            .field("version", &self.protocol_version)
            .field("closed", &self.is_closed())
            .field("ref_count", &self.ref_count())
            .field("pending", &self.invoke_future_count())
            .finish()
    }
}
