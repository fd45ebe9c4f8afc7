//! Browser clients known to the server, keyed by the session cookie.
//!
//! Each client owns one [`SessionHub`] plus the provider and store views bound
//! to it, so a browser keeps its session (and any in-flight PKCE verifier)
//! across requests. A client is only registered once it has something to keep;
//! idle clients are dropped after `idle_ttl` and the table holds at most
//! `max_clients` entries, evicting the longest idle first.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use base64::Engine;
use parking_lot::{Mutex, RwLock};

use super::backend::Backend;
use super::hub::SessionHub;
use super::provider::CapabilityProvider;
use super::store::ProfileStore;
use crate::tprintln;

pub const MAX_CLIENTS: usize = 10_000;

fn gen_id() -> Result<String, getrandom::Error> {
    let mut buf = [0u8; 32];
    getrandom::getrandom(&mut buf)?;
    Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(buf))
}

pub struct Client {
    pub id: String,
    pub hub: Arc<SessionHub>,
    pub provider: Arc<dyn CapabilityProvider>,
    pub store: Arc<dyn ProfileStore>,
    last_seen: Mutex<Instant>,
}

impl Client {
    fn touch(&self, now: Instant) {
        *self.last_seen.lock() = now;
    }

    fn idle_since(&self, now: Instant) -> Duration {
        now.saturating_duration_since(*self.last_seen.lock())
    }
}

pub struct ClientRegistry {
    backend: Arc<dyn Backend>,
    clients: RwLock<HashMap<String, Arc<Client>>>,
    idle_ttl: Duration,
    max_clients: usize,
}

impl ClientRegistry {
    pub fn new(backend: Arc<dyn Backend>, idle_ttl: Duration) -> Self {
        Self { backend, clients: RwLock::new(HashMap::new()), idle_ttl, max_clients: MAX_CLIENTS }
    }

    pub fn with_max_clients(mut self, max_clients: usize) -> Self {
        self.max_clients = max_clients.max(1);
        self
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    pub fn len(&self) -> usize {
        self.clients.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Known, non-expired client for `id`.
    pub fn get(&self, id: &str) -> Option<Arc<Client>> {
        let now = Instant::now();
        let found = self.clients.read().get(id).cloned()?;
        if found.idle_since(now) > self.idle_ttl {
            self.clients.write().remove(id);
            tprintln!("clients.expire id_len={}", id.len());
            return None;
        }
        found.touch(now);
        Some(found)
    }

    /// New client that is not yet known to the registry.
    pub fn fresh(&self) -> Result<Arc<Client>, getrandom::Error> {
        let hub = Arc::new(SessionHub::new());
        Ok(Arc::new(Client {
            id: gen_id()?,
            provider: self.backend.provider(hub.clone()),
            store: self.backend.profiles(hub.clone()),
            hub,
            last_seen: Mutex::new(Instant::now()),
        }))
    }

    /// Keep `client` under its id, making room when the table is full.
    pub fn register(&self, client: Arc<Client>) {
        let now = Instant::now();
        let mut map = self.clients.write();
        if map.len() >= self.max_clients && !map.contains_key(&client.id) {
            map.retain(|_, c| c.idle_since(now) <= self.idle_ttl);
            while map.len() >= self.max_clients {
                let Some(oldest) = map.iter().max_by_key(|(_, c)| c.idle_since(now)).map(|(id, _)| id.clone()) else {
                    break;
                };
                map.remove(&oldest);
                tprintln!("clients.evict id_len={}", oldest.len());
            }
        }
        map.insert(client.id.clone(), client);
    }

    pub fn open(&self) -> Result<Arc<Client>, getrandom::Error> {
        let client = self.fresh()?;
        self.register(client.clone());
        Ok(client)
    }

    /// Registered client for the cookie value, or an unregistered fresh one.
    /// The flag is true when the client is fresh.
    pub fn get_or_fresh(&self, id: Option<&str>) -> Result<(Arc<Client>, bool), getrandom::Error> {
        match id.and_then(|i| self.get(i)) {
            Some(c) => Ok((c, false)),
            None => Ok((self.fresh()?, true)),
        }
    }

    pub fn close(&self, id: &str) -> bool {
        self.clients.write().remove(id).is_some()
    }

    /// Drop idle clients; returns how many went.
    pub fn prune(&self) -> usize {
        let now = Instant::now();
        let mut map = self.clients.write();
        let before = map.len();
        map.retain(|_, c| c.idle_since(now) <= self.idle_ttl);
        before - map.len()
    }
}
