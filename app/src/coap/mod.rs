use std::net::SocketAddr;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::{BlockError, IngestError};
use crate::models::CorrelationStore;
use crate::sensor::{self, IngestOutcome};
use block::{BlockAssembler, BlockOption, BlockState};
use exchange::{ExchangeCache, Lookup};
use packet::{Code, MessageType, Packet, OPTION_BLOCK1};

pub mod block;
pub mod exchange;
pub mod packet;


const MAX_DATAGRAM_SIZE: usize = 65_535;
const SWEEP_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Largest request body accepted, block-wise or not
    pub max_body_size: usize,
    /// Idle time after which a partial block-wise body is dropped
    pub block_timeout: Duration,
    /// How long a message id is remembered for duplicate detection
    pub exchange_lifetime: Duration,
}

impl Default for ServerOptions {
    fn default() -> Self {
        ServerOptions {
            max_body_size: 16_384,
            block_timeout: Duration::from_secs(60),
            exchange_lifetime: Duration::from_secs(247),
        }
    }
}

impl From<&Config> for ServerOptions {
    fn from(config: &Config) -> Self {
        ServerOptions {
            max_body_size: config.coap_max_body_size(),
            block_timeout: config.coap_block_timeout(),
            exchange_lifetime: config.coap_exchange_lifetime(),
        }
    }
}

pub struct CoapServer {
    socket: UdpSocket,
    store: Arc<dyn CorrelationStore>,
    blocks: BlockAssembler,
    exchanges: ExchangeCache,
    max_body_size: usize,
    message_id: AtomicU16,
}

impl CoapServer {
    pub async fn bind(
        addr: &str,
        store: Arc<dyn CorrelationStore>,
        options: ServerOptions,
    ) -> std::io::Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        info!("CoAP server listening on {}", socket.local_addr()?);

        Ok(CoapServer {
            socket,
            store,
            blocks: BlockAssembler::new(options.max_body_size, options.block_timeout),
            exchanges: ExchangeCache::new(options.exchange_lifetime),
            max_body_size: options.max_body_size,
            message_id: AtomicU16::new(rand::random()),
        })
    }

    #[cfg(test)]
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Receives datagrams until the task is dropped. Every datagram is handled
    /// in its own task.
    pub async fn run(self: Arc<Self>) {
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        let mut sweep = tokio::time::interval(SWEEP_INTERVAL);

        loop {
            tokio::select! {
                received = self.socket.recv_from(&mut buf) => {
                    match received {
                        Ok((len, peer)) => {
                            let datagram = buf[..len].to_vec();
                            let server = self.clone();
                            tokio::spawn(async move {
                                server.handle_datagram(peer, datagram).await;
                            });
                        }
                        Err(e) => warn!("Receive error: {}", e),
                    }
                }
                _ = sweep.tick() => {
                    let transfers = self.blocks.purge_expired();
                    if transfers > 0 {
                        debug!("Dropped {} idle block transfers", transfers);
                    }
                    self.exchanges.purge_expired();
                }
            }
        }
    }

    async fn handle_datagram(&self, peer: SocketAddr, datagram: Vec<u8>) {
        let request = match Packet::from_bytes(&datagram) {
            Ok(packet) => packet,
            Err(e) => {
                debug!("Malformed message from {}: {}", peer, e);
                if let Some((MessageType::Confirmable, message_id)) =
                    packet::peek_header(&datagram)
                {
                    self.send(peer, &Packet::reset(message_id).to_bytes()).await;
                }
                return;
            }
        };

        match request.mtype {
            MessageType::Acknowledgement | MessageType::Reset => return,
            _ => {}
        }
        if request.code == Code::EMPTY {
            if request.mtype == MessageType::Confirmable {
                self.send(peer, &Packet::reset(request.message_id).to_bytes())
                    .await;
            }
            return;
        }
        if !request.code.is_request() {
            debug!("Ignoring {} from {}", request.code, peer);
            return;
        }

        self.handle_request(peer, request).await;
    }

    #[tracing::instrument(skip(self, request), fields(mid = request.message_id))]
    async fn handle_request(&self, peer: SocketAddr, request: Packet) {
        let lookup = self.exchanges.begin(peer, request.message_id);
        match lookup {
            Lookup::New => {}
            Lookup::InFlight => {
                debug!("Duplicate of a request in progress");
                return;
            }
            Lookup::Replay(bytes) => {
                debug!("Replaying response to duplicate");
                self.send(peer, &bytes).await;
                return;
            }
        }

        let response = self.process(peer, &request).await.to_bytes();
        self.exchanges
            .complete(peer, request.message_id, response.clone());
        self.send(peer, &response).await;
    }

    async fn process(&self, peer: SocketAddr, request: &Packet) -> Packet {
        let path = request.uri_path();

        let mut block1 = None;
        let body = match request.option(OPTION_BLOCK1) {
            Some(value) => {
                let block = match BlockOption::from_value(value) {
                    Ok(block) => block,
                    Err(e) => {
                        debug!("Rejected block option: {}", e);
                        return self.reply(request, Code::BAD_OPTION);
                    }
                };
                let state = self.blocks.feed(peer, &path, block, &request.payload);
                match state {
                    Ok(BlockState::Receiving) => {
                        let mut response = self.reply(request, Code::CONTINUE);
                        response.add_option(OPTION_BLOCK1, block.to_value());
                        return response;
                    }
                    Ok(BlockState::Complete(body)) => {
                        block1 = Some(block);
                        body
                    }
                    Err(e) => {
                        warn!(path = %path, "Block transfer failed: {}", e);
                        return self.reply(request, block_error_code(&e));
                    }
                }
            }
            None if request.payload.len() > self.max_body_size => {
                warn!(path = %path, "Body of {} bytes rejected", request.payload.len());
                return self.reply(request, Code::REQUEST_ENTITY_TOO_LARGE);
            }
            None => request.payload.clone(),
        };

        let result = sensor::dispatch(self.store.as_ref(), &path, &body).await;
        match &result {
            Ok(IngestOutcome::Transmission(id)) => {
                debug!(path = %path, "Stored transmission {}", id)
            }
            Ok(IngestOutcome::Readings(count)) => {
                debug!(path = %path, "Stored {} readings", count)
            }
            Err(e) if e.is_user() => warn!(path = %path, "Rejected request: {}", e),
            Err(e) => error!(path = %path, "Failed storing request: {}", e),
        }

        let mut response = self.reply(request, build_response(&result));
        if let Some(block) = block1 {
            response.add_option(OPTION_BLOCK1, block.to_value());
        }
        response
    }

    /// Piggybacked ACK for confirmable requests, a fresh NON otherwise
    fn reply(&self, request: &Packet, code: Code) -> Packet {
        let mut response = match request.mtype {
            MessageType::Confirmable => {
                Packet::new(MessageType::Acknowledgement, code, request.message_id)
            }
            _ => Packet::new(
                MessageType::NonConfirmable,
                code,
                self.message_id.fetch_add(1, Ordering::Relaxed),
            ),
        };
        response.token = request.token.clone();
        response
    }

    async fn send(&self, peer: SocketAddr, bytes: &[u8]) {
        if let Err(e) = self.socket.send_to(bytes, peer).await {
            warn!("Failed sending to {}: {}", peer, e);
        }
    }
}

/// Maps the result of an ingestion to the response code sent back to the node
pub fn build_response(result: &Result<IngestOutcome, IngestError>) -> Code {
    match result {
        Ok(_) => Code::CREATED,
        Err(IngestError::Decode(_)) | Err(IngestError::Validation(_)) => Code::BAD_REQUEST,
        Err(IngestError::CorrelationNotFound(_)) | Err(IngestError::UnknownPath(_)) => {
            Code::NOT_FOUND
        }
        Err(IngestError::Storage(_)) => Code::INTERNAL_SERVER_ERROR,
    }
}

fn block_error_code(err: &BlockError) -> Code {
    match err {
        BlockError::Incomplete(_) => Code::REQUEST_ENTITY_INCOMPLETE,
        BlockError::TooLarge(_) => Code::REQUEST_ENTITY_TOO_LARGE,
        BlockError::InvalidOption => Code::BAD_OPTION,
    }
}
