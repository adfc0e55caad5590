use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

#[derive(Debug, PartialEq, Eq)]
pub enum Lookup {
    /// First time this message id is seen
    New,
    /// A copy is still being processed, drop this one
    InFlight,
    /// Already answered, re-send the stored response
    Replay(Vec<u8>),
}

struct Exchange {
    started: Instant,
    response: Option<Vec<u8>>,
}

/// Remembers recent exchanges per peer and message id so retransmitted
/// requests are answered without being processed twice.
pub struct ExchangeCache {
    exchanges: Mutex<HashMap<(SocketAddr, u16), Exchange>>,
    lifetime: Duration,
}

impl ExchangeCache {
    pub fn new(lifetime: Duration) -> Self {
        ExchangeCache {
            exchanges: Mutex::new(HashMap::new()),
            lifetime,
        }
    }

    pub fn begin(&self, peer: SocketAddr, message_id: u16) -> Lookup {
        let now = Instant::now();
        let mut exchanges = self.exchanges.lock();

        if let Some(exchange) = exchanges.get(&(peer, message_id)) {
            if now.duration_since(exchange.started) <= self.lifetime {
                return match &exchange.response {
                    Some(bytes) => Lookup::Replay(bytes.clone()),
                    None => Lookup::InFlight,
                };
            }
        }

        exchanges.insert(
            (peer, message_id),
            Exchange {
                started: now,
                response: None,
            },
        );
        Lookup::New
    }

    pub fn complete(&self, peer: SocketAddr, message_id: u16, response: Vec<u8>) {
        if let Some(exchange) = self.exchanges.lock().get_mut(&(peer, message_id)) {
            exchange.response = Some(response);
        }
    }

    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut exchanges = self.exchanges.lock();
        let before = exchanges.len();
        exchanges.retain(|_, e| now.duration_since(e.started) <= self.lifetime);
        before - exchanges.len()
    }
}
