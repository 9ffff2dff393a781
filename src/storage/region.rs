///! Growable byte region persisted as one checksummed file
///!
///! File layout (little-endian):
///!   magic u32 | version u16 | reserved u16 | cache key [u8; 32]
///!   header slots 8 x u64 | payload length u64 | payload
///!   body crc64 u64 | file crc64 u64
///!
///! Slot 7 holds the creation timestamp (ms since epoch). The other slots
///! belong to the structure stored in the region.

use chrono::{DateTime, TimeZone, Utc};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::crc;
use crate::error::{PartitionError, Result};

const MAGIC: u32 = 0x42434C52; // "BCLR"
const VERSION: u16 = 1;

pub const HEADER_SLOTS: usize = 8;
pub const CREATED_AT_SLOT: usize = 7;
const HEADER_BYTES: usize = 4 + 2 + 2 + 32 + HEADER_SLOTS * 8 + 8;

pub const DEFAULT_SEGMENT_SIZE: usize = 1 << 20;
pub const MAX_REGION_BYTES: u64 = 1 << 40;

/// Directory holding the region files of one prepared graph
#[derive(Debug, Clone)]
pub struct Directory {
    root: PathBuf,
    cache_key: [u8; 32],
    segment_size: usize,
}

impl Directory {
    pub fn new<P: AsRef<Path>>(root: P, cache_key: [u8; 32]) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            cache_key,
            segment_size: DEFAULT_SEGMENT_SIZE,
        }
    }

    pub fn with_segment_size(mut self, segment_size: usize) -> Self {
        self.segment_size = segment_size.max(1);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn cache_key(&self) -> &[u8; 32] {
        &self.cache_key
    }

    /// Handle for region `name`; nothing is read until `load_existing`.
    pub fn find(&self, name: &str) -> DataRegion {
        let name = sanitize(name);
        let path = self.root.join(format!("{}.bin", name));
        DataRegion {
            name,
            path,
            cache_key: self.cache_key,
            segment_size: self.segment_size,
            header: [0; HEADER_SLOTS],
            payload: Vec::new(),
            state: State::Fresh,
        }
    }
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Fresh,
    Open,
    Closed,
}

#[derive(Debug)]
pub struct DataRegion {
    name: String,
    path: PathBuf,
    cache_key: [u8; 32],
    segment_size: usize,
    header: [u64; HEADER_SLOTS],
    payload: Vec<u8>,
    state: State,
}

impl DataRegion {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_open(&self) -> bool {
        self.state == State::Open
    }

    fn state_error(&self, reason: &str) -> PartitionError {
        PartitionError::RegionState {
            region: self.name.clone(),
            reason: reason.to_string(),
        }
    }

    fn corrupt(&self, reason: impl Into<String>) -> PartitionError {
        PartitionError::CorruptRegion {
            region: self.name.clone(),
            reason: reason.into(),
        }
    }

    /// Start an empty region of at least `bytes` capacity.
    pub fn create(&mut self, bytes: u64) -> Result<()> {
        if self.state != State::Fresh {
            return Err(self.state_error("create on a region that was already opened"));
        }
        self.state = State::Open;
        self.header = [0; HEADER_SLOTS];
        self.header[CREATED_AT_SLOT] = Utc::now().timestamp_millis().max(0) as u64;
        self.payload.clear();
        self.ensure_capacity(bytes)
    }

    /// Load the region from disk. `Ok(false)` when the file is absent or was
    /// built with a different cache key.
    pub fn load_existing(&mut self) -> Result<bool> {
        if self.state != State::Fresh {
            return Err(self.state_error("load_existing on a region that was already opened"));
        }
        if !self.path.exists() {
            debug!(region = %self.name, "region file absent");
            return Ok(false);
        }

        let bytes = fs::read(&self.path)?;
        let body = crc::verify(&bytes).ok_or_else(|| self.corrupt("checksum mismatch"))?;
        if body.len() < HEADER_BYTES {
            return Err(self.corrupt("truncated header"));
        }

        let magic = u32::from_le_bytes(read_array(body, 0));
        if magic != MAGIC {
            return Err(self.corrupt(format!("bad magic {:#010x}", magic)));
        }
        let version = u16::from_le_bytes(read_array(body, 4));
        if version != VERSION {
            return Err(self.corrupt(format!("unsupported version {}", version)));
        }

        let key: [u8; 32] = read_array(body, 8);
        if key != self.cache_key {
            warn!(
                region = %self.name,
                stored = %hex::encode(&key[..8]),
                expected = %hex::encode(&self.cache_key[..8]),
                "cache key mismatch, region is stale"
            );
            return Ok(false);
        }

        let mut header = [0u64; HEADER_SLOTS];
        for (i, slot) in header.iter_mut().enumerate() {
            *slot = u64::from_le_bytes(read_array(body, 40 + i * 8));
        }
        let payload_len = u64::from_le_bytes(read_array(body, 40 + HEADER_SLOTS * 8)) as usize;
        if body.len() != HEADER_BYTES + payload_len {
            return Err(self.corrupt(format!(
                "payload length {} does not match file size",
                payload_len
            )));
        }

        self.header = header;
        self.payload = body[HEADER_BYTES..].to_vec();
        self.state = State::Open;
        debug!(region = %self.name, bytes = payload_len, "region loaded");
        Ok(true)
    }

    /// Grow the payload to hold at least `bytes`, in whole segments.
    pub fn ensure_capacity(&mut self, bytes: u64) -> Result<()> {
        if self.state != State::Open {
            return Err(self.state_error("region is not open"));
        }
        if bytes <= self.payload.len() as u64 {
            return Ok(());
        }
        if bytes > MAX_REGION_BYTES {
            return Err(self.exhausted(bytes));
        }

        let segment = self.segment_size as u64;
        let target = bytes.div_ceil(segment).saturating_mul(segment).min(MAX_REGION_BYTES);
        let additional = (target - self.payload.len() as u64) as usize;
        if self.payload.try_reserve_exact(additional).is_err() {
            return Err(self.exhausted(target));
        }
        self.payload.resize(target as usize, 0);
        Ok(())
    }

    fn exhausted(&self, requested: u64) -> PartitionError {
        PartitionError::CapacityExhausted {
            region: self.name.clone(),
            requested,
            max: MAX_REGION_BYTES,
        }
    }

    /// Current payload capacity in bytes
    pub fn capacity(&self) -> u64 {
        self.payload.len() as u64
    }

    pub fn header(&self, slot: usize) -> u64 {
        self.header[slot]
    }

    pub fn set_header(&mut self, slot: usize, value: u64) {
        self.header[slot] = value;
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.header[CREATED_AT_SLOT] as i64)
            .single()
    }

    fn bytes<const N: usize>(&self, pos: u64) -> Result<[u8; N]> {
        if self.state != State::Open {
            return Err(self.state_error("region is not open"));
        }
        let start = pos as usize;
        self.payload
            .get(start..start + N)
            .and_then(|s| s.try_into().ok())
            .ok_or_else(|| self.corrupt(format!("read of {} bytes at {} past end", N, pos)))
    }

    fn put(&mut self, pos: u64, data: &[u8]) -> Result<()> {
        self.ensure_capacity(pos + data.len() as u64)?;
        let start = pos as usize;
        self.payload[start..start + data.len()].copy_from_slice(data);
        Ok(())
    }

    pub fn get_u8(&self, pos: u64) -> Result<u8> {
        Ok(self.bytes::<1>(pos)?[0])
    }

    pub fn set_u8(&mut self, pos: u64, value: u8) -> Result<()> {
        self.put(pos, &[value])
    }

    pub fn get_i32(&self, pos: u64) -> Result<i32> {
        Ok(i32::from_le_bytes(self.bytes(pos)?))
    }

    pub fn set_i32(&mut self, pos: u64, value: i32) -> Result<()> {
        self.put(pos, &value.to_le_bytes())
    }

    pub fn get_u32(&self, pos: u64) -> Result<u32> {
        Ok(u32::from_le_bytes(self.bytes(pos)?))
    }

    pub fn set_u32(&mut self, pos: u64, value: u32) -> Result<()> {
        self.put(pos, &value.to_le_bytes())
    }

    pub fn get_i64(&self, pos: u64) -> Result<i64> {
        Ok(i64::from_le_bytes(self.bytes(pos)?))
    }

    pub fn set_i64(&mut self, pos: u64, value: i64) -> Result<()> {
        self.put(pos, &value.to_le_bytes())
    }

    pub fn get_f64(&self, pos: u64) -> Result<f64> {
        Ok(f64::from_le_bytes(self.bytes(pos)?))
    }

    pub fn set_f64(&mut self, pos: u64, value: f64) -> Result<()> {
        self.put(pos, &value.to_le_bytes())
    }

    /// Write header, payload and footer to disk (temp file + rename).
    pub fn flush(&mut self) -> Result<()> {
        if self.state != State::Open {
            return Err(self.state_error("flush on a region that is not open"));
        }
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut body = Vec::with_capacity(HEADER_BYTES + self.payload.len());
        body.extend_from_slice(&MAGIC.to_le_bytes());
        body.extend_from_slice(&VERSION.to_le_bytes());
        body.extend_from_slice(&0u16.to_le_bytes());
        body.extend_from_slice(&self.cache_key);
        for slot in &self.header {
            body.extend_from_slice(&slot.to_le_bytes());
        }
        body.extend_from_slice(&(self.payload.len() as u64).to_le_bytes());
        body.extend_from_slice(&self.payload);

        let tmp = self.path.with_extension("bin.tmp");
        {
            let mut writer = BufWriter::new(File::create(&tmp)?);
            writer.write_all(&body)?;
            writer.write_all(&crc::footer(&body))?;
            writer.flush()?;
        }
        fs::rename(&tmp, &self.path)?;
        debug!(region = %self.name, bytes = self.payload.len(), "region flushed");
        Ok(())
    }

    /// Release the in-memory payload. The handle cannot be reopened.
    pub fn close(&mut self) {
        self.payload = Vec::new();
        self.state = State::Closed;
    }
}

fn read_array<const N: usize>(bytes: &[u8], at: usize) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes[at..at + N]);
    out
}
