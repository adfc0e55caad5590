use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use super::packet::{decode_uint, encode_uint};
use crate::error::BlockError;

/// Decoded Block1 option: block number, more flag and size exponent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockOption {
    pub num: u32,
    pub more: bool,
    pub szx: u8,
}

impl BlockOption {
    pub fn from_value(value: &[u8]) -> Result<Self, BlockError> {
        if value.len() > 3 {
            return Err(BlockError::InvalidOption);
        }
        let raw = decode_uint(value).ok_or(BlockError::InvalidOption)?;
        let szx = (raw & 0x07) as u8;
        if szx == 7 {
            return Err(BlockError::InvalidOption);
        }
        Ok(BlockOption {
            num: raw >> 4,
            more: raw & 0x08 != 0,
            szx,
        })
    }

    pub fn to_value(&self) -> Vec<u8> {
        encode_uint(self.num << 4 | (self.more as u32) << 3 | self.szx as u32)
    }

    pub fn size(&self) -> usize {
        1 << (self.szx as usize + 4)
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum BlockState {
    /// More blocks are expected
    Receiving,
    /// The last block arrived, the whole body is ready
    Complete(Vec<u8>),
}

struct Transfer {
    body: Vec<u8>,
    next_num: u32,
    szx: u8,
    touched: Instant,
}

/// Accumulates Block1 request bodies per peer and path.
pub struct BlockAssembler {
    transfers: Mutex<HashMap<(SocketAddr, String), Transfer>>,
    max_body_size: usize,
    timeout: Duration,
}

impl BlockAssembler {
    pub fn new(max_body_size: usize, timeout: Duration) -> Self {
        BlockAssembler {
            transfers: Mutex::new(HashMap::new()),
            max_body_size,
            timeout,
        }
    }

    /// Adds one block to the transfer of `peer` on `path`.
    ///
    /// Block 0 always starts a new transfer. A block number already seen is a
    /// retransmission and leaves the transfer untouched. Any error drops the transfer.
    pub fn feed(
        &self,
        peer: SocketAddr,
        path: &str,
        block: BlockOption,
        payload: &[u8],
    ) -> Result<BlockState, BlockError> {
        let now = Instant::now();
        let key = (peer, path.to_owned());
        let mut transfers = self.transfers.lock();

        let expired = transfers
            .get(&key)
            .map_or(false, |t| now.duration_since(t.touched) > self.timeout);
        if expired {
            transfers.remove(&key);
        }

        if block.num == 0 {
            transfers.remove(&key);
            transfers.insert(
                key.clone(),
                Transfer {
                    body: Vec::new(),
                    next_num: 0,
                    szx: block.szx,
                    touched: now,
                },
            );
        }

        let transfer = transfers
            .get_mut(&key)
            .ok_or(BlockError::Incomplete(block.num))?;
        if block.num < transfer.next_num && block.szx == transfer.szx {
            transfer.touched = now;
            return Ok(BlockState::Receiving);
        }

        let result = Self::append(transfer, block, payload, self.max_body_size);
        match result {
            Ok(true) => {
                transfer.touched = now;
                Ok(BlockState::Receiving)
            }
            Ok(false) => {
                let body = transfers
                    .remove(&key)
                    .map(|t| t.body)
                    .unwrap_or_default();
                Ok(BlockState::Complete(body))
            }
            Err(err) => {
                transfers.remove(&key);
                Err(err)
            }
        }
    }

    /// Returns whether more blocks are expected
    fn append(
        transfer: &mut Transfer,
        block: BlockOption,
        payload: &[u8],
        max_body_size: usize,
    ) -> Result<bool, BlockError> {
        if block.szx != transfer.szx || block.num != transfer.next_num {
            return Err(BlockError::Incomplete(block.num));
        }
        if block.more && payload.len() != block.size() {
            return Err(BlockError::Incomplete(block.num));
        }
        if !block.more && payload.len() > block.size() {
            return Err(BlockError::Incomplete(block.num));
        }
        if transfer.body.len() + payload.len() > max_body_size {
            return Err(BlockError::TooLarge(max_body_size));
        }

        transfer.body.extend_from_slice(payload);
        transfer.next_num += 1;
        Ok(block.more)
    }

    /// Drops transfers that saw no block within the timeout
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut transfers = self.transfers.lock();
        let before = transfers.len();
        transfers.retain(|_, t| now.duration_since(t.touched) <= self.timeout);
        before - transfers.len()
    }

    #[cfg(test)]
    pub fn pending(&self) -> usize {
        self.transfers.lock().len()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn peer() -> SocketAddr {
        "127.0.0.1:40000".parse().unwrap()
    }

    fn block(num: u32, more: bool) -> BlockOption {
        // 16 byte blocks
        BlockOption { num, more, szx: 0 }
    }

    #[test]
    fn test_option_value() {
        let option = BlockOption::from_value(&[0x1E]).unwrap();
        assert_eq!(1, option.num);
        assert!(option.more);
        assert_eq!(6, option.szx);
        assert_eq!(1024, option.size());
        assert_eq!(vec![0x1E], option.to_value());

        assert_eq!(Vec::<u8>::new(), block(0, false).to_value());
        assert_eq!(
            Ok(block(0, false)),
            BlockOption::from_value(&[])
        );
        assert_eq!(
            Err(BlockError::InvalidOption),
            BlockOption::from_value(&[0x0F])
        );
        assert_eq!(
            Err(BlockError::InvalidOption),
            BlockOption::from_value(&[1, 2, 3, 4])
        );
    }

    #[test]
    fn test_assemble_in_order() {
        let assembler = BlockAssembler::new(1024, Duration::from_secs(60));

        let first = assembler.feed(peer(), "/sensor/log", block(0, true), &[b'a'; 16]);
        let second = assembler.feed(peer(), "/sensor/log", block(1, true), &[b'b'; 16]);
        let last = assembler.feed(peer(), "/sensor/log", block(2, false), b"cc");

        assert_eq!(Ok(BlockState::Receiving), first);
        assert_eq!(Ok(BlockState::Receiving), second);
        let mut expected = vec![b'a'; 16];
        expected.extend_from_slice(&[b'b'; 16]);
        expected.extend_from_slice(b"cc");
        assert_eq!(Ok(BlockState::Complete(expected)), last);
        assert_eq!(0, assembler.pending());
    }

    #[test]
    fn test_single_block() {
        let assembler = BlockAssembler::new(1024, Duration::from_secs(60));

        let res = assembler.feed(peer(), "/sensor/dht", block(0, false), b"{}");

        assert_eq!(Ok(BlockState::Complete(b"{}".to_vec())), res);
    }

    #[test]
    fn test_retransmitted_block() {
        let assembler = BlockAssembler::new(1024, Duration::from_secs(60));
        assembler
            .feed(peer(), "/p", block(0, true), &[1; 16])
            .unwrap();
        assembler
            .feed(peer(), "/p", block(1, true), &[2; 16])
            .unwrap();

        let again = assembler.feed(peer(), "/p", block(1, true), &[2; 16]);
        let last = assembler.feed(peer(), "/p", block(2, false), &[3]);

        assert_eq!(Ok(BlockState::Receiving), again);
        match last {
            Ok(BlockState::Complete(body)) => assert_eq!(33, body.len()),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_out_of_order() {
        let assembler = BlockAssembler::new(1024, Duration::from_secs(60));
        assembler
            .feed(peer(), "/p", block(0, true), &[1; 16])
            .unwrap();

        let skipped = assembler.feed(peer(), "/p", block(2, true), &[1; 16]);
        let after = assembler.feed(peer(), "/p", block(1, false), &[1]);
        let orphan = assembler.feed(peer(), "/q", block(3, false), &[1]);

        assert_eq!(Err(BlockError::Incomplete(2)), skipped);
        assert_eq!(Err(BlockError::Incomplete(1)), after);
        assert_eq!(Err(BlockError::Incomplete(3)), orphan);
    }

    #[test]
    fn test_size_violations() {
        let assembler = BlockAssembler::new(40, Duration::from_secs(60));
        assembler
            .feed(peer(), "/p", block(0, true), &[1; 16])
            .unwrap();

        let short = assembler.feed(peer(), "/p", block(1, true), &[1; 10]);
        assert_eq!(Err(BlockError::Incomplete(1)), short);

        assembler
            .feed(peer(), "/p", block(0, true), &[1; 16])
            .unwrap();
        let resized = assembler.feed(peer(), "/p", BlockOption { num: 1, more: true, szx: 1 }, &[1; 32]);
        assert_eq!(Err(BlockError::Incomplete(1)), resized);

        assembler
            .feed(peer(), "/p", block(0, true), &[1; 16])
            .unwrap();
        assembler
            .feed(peer(), "/p", block(1, true), &[1; 16])
            .unwrap();
        let too_large = assembler.feed(peer(), "/p", block(2, true), &[1; 16]);
        assert_eq!(Err(BlockError::TooLarge(40)), too_large);
        assert_eq!(0, assembler.pending());
    }

    #[test]
    fn test_oversized_final_block() {
        let assembler = BlockAssembler::new(1024, Duration::from_secs(60));

        let alone = assembler.feed(peer(), "/p", block(0, false), &[1; 17]);
        assert_eq!(Err(BlockError::Incomplete(0)), alone);

        assembler
            .feed(peer(), "/p", block(0, true), &[1; 16])
            .unwrap();
        let last = assembler.feed(peer(), "/p", block(1, false), &[1; 17]);
        assert_eq!(Err(BlockError::Incomplete(1)), last);
        assert_eq!(0, assembler.pending());

        let exact = assembler.feed(peer(), "/p", block(0, false), &[1; 16]);
        assert_eq!(Ok(BlockState::Complete(vec![1; 16])), exact);
    }

    #[test]
    fn test_peers_are_separate() {
        let other: SocketAddr = "127.0.0.1:40001".parse().unwrap();
        let assembler = BlockAssembler::new(1024, Duration::from_secs(60));
        assembler
            .feed(peer(), "/p", block(0, true), &[1; 16])
            .unwrap();
        assembler
            .feed(other, "/p", block(0, true), &[2; 16])
            .unwrap();

        let mine = assembler.feed(peer(), "/p", block(1, false), &[1]).unwrap();
        let theirs = assembler.feed(other, "/p", block(1, false), &[2]).unwrap();

        assert_eq!(BlockState::Complete([vec![1; 16], vec![1]].concat()), mine);
        assert_eq!(BlockState::Complete([vec![2; 16], vec![2]].concat()), theirs);
    }

    #[test]
    fn test_idle_transfer_expires() {
        let assembler = BlockAssembler::new(1024, Duration::from_millis(0));
        assembler
            .feed(peer(), "/p", block(0, true), &[1; 16])
            .unwrap();
        std::thread::sleep(Duration::from_millis(5));

        assert_eq!(1, assembler.purge_expired());
        assert_eq!(
            Err(BlockError::Incomplete(1)),
            assembler.feed(peer(), "/p", block(1, false), &[1])
        );
    }
}
