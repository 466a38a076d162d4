//! Cuckoo-hashed keyword buckets.
//!
//! Keywords hash to a 64-bit identifier (the first eight bytes of their
//! SHA256 digest, little-endian); each keyword may land in one of
//! `hash_function_count` candidate buckets, derived from the identifier by
//! SHA256-chained rehashing. Construction uses standard cuckoo insertion:
//! place into a candidate with room, otherwise evict a random occupant and
//! reinsert it, giving up after `max_eviction_count` evictions.

use rand::RngCore;
use sha2::{Digest, Sha256};
use std::collections::HashMap;

use crate::config::{BucketCountConfig, CuckooTableConfig};
use crate::error::{Error, Result};

/// One database row: a keyword and the value it maps to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeywordValuePair {
	/// The lookup keyword.
	pub keyword: Vec<u8>,
	/// The value returned for the keyword.
	pub value: Vec<u8>,
}

impl KeywordValuePair {
	/// Creates a row.
	pub fn new(keyword: Vec<u8>, value: Vec<u8>) -> Self {
		Self {
			keyword,
			value,
		}
	}
}

fn truncated_digest(bytes: &[u8]) -> u64 {
	let digest = Sha256::digest(bytes);
	let mut le = [0u8; 8];
	le.copy_from_slice(&digest[..8]);
	u64::from_le_bytes(le)
}

/// The 64-bit keyword identifier stored in bucket slots.
pub fn keyword_hash(keyword: &[u8]) -> u64 {
	truncated_digest(keyword)
}

/// A candidate bucket index: the identifier rehashed `counter` times through
/// SHA256, reduced modulo the bucket count.
fn index_from_hash(hash: u64, bucket_count: usize, counter: u8) -> usize {
	let mut h = hash;
	for _ in 0..counter {
		h = truncated_digest(&h.to_le_bytes());
	}
	(h % bucket_count as u64) as usize
}

/// The candidate bucket indices for a keyword identifier, one per hash
/// function. Counters start at the hash-function index and bump (up to ten)
/// to separate candidates that collide on the same bucket.
pub fn candidate_indices(hash: u64, bucket_count: usize, hash_function_count: usize) -> Vec<usize> {
	let mut out = Vec::with_capacity(hash_function_count);
	for i in 0..hash_function_count {
		let mut counter = i as u8;
		let mut index = index_from_hash(hash, bucket_count, counter);
		while out.contains(&index) && counter < 9 {
			counter += 1;
			index = index_from_hash(hash, bucket_count, counter);
		}
		out.push(index);
	}
	out
}

/// One bucket slot: keyword identifier and value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashBucketSlot {
	/// The keyword identifier.
	pub keyword_hash: u64,
	/// The stored value.
	pub value: Vec<u8>,
}

/// A bucket of keyword-value slots, serialized as
/// `u8 slot_count | (u64 keyword_hash | u16 value_size | value)*`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HashBucket {
	/// The occupied slots, in insertion order.
	pub slots: Vec<HashBucketSlot>,
}

impl HashBucket {
	/// Hard cap on slots per bucket.
	pub const MAX_SLOT_COUNT: usize = 255;
	/// Hard cap on a value's byte size.
	pub const MAX_VALUE_SIZE: usize = 65535;
	/// Per-slot overhead: identifier plus size field.
	const SLOT_OVERHEAD: usize = 10;

	/// The bucket's serialized byte size.
	pub fn serialized_size(&self) -> usize {
		1 + self
			.slots
			.iter()
			.map(|s| Self::SLOT_OVERHEAD + s.value.len())
			.sum::<usize>()
	}

	/// Serializes the bucket.
	pub fn to_bytes(&self) -> Result<Vec<u8>> {
		if self.slots.len() > Self::MAX_SLOT_COUNT {
			return Err(veil_he::Error::CorruptedData(format!(
				"{} slots exceed the bucket cap",
				self.slots.len()
			))
			.into());
		}
		let mut out = Vec::with_capacity(self.serialized_size());
		out.push(self.slots.len() as u8);
		for slot in &self.slots {
			if slot.value.len() > Self::MAX_VALUE_SIZE {
				return Err(veil_he::Error::CorruptedData(format!(
					"value of {} bytes exceeds the slot cap",
					slot.value.len()
				))
				.into());
			}
			out.extend_from_slice(&slot.keyword_hash.to_le_bytes());
			out.extend_from_slice(&(slot.value.len() as u16).to_le_bytes());
			out.extend_from_slice(&slot.value);
		}
		Ok(out)
	}

	/// Deserializes a bucket, ignoring zero padding past the advertised
	/// slots.
	pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
		let short =
			|| Error::He(veil_he::Error::CorruptedData("bucket buffer too short".to_string()));
		let count = *bytes.first().ok_or_else(short)? as usize;
		let mut pos = 1usize;
		let mut slots = Vec::with_capacity(count);
		for _ in 0..count {
			if pos + Self::SLOT_OVERHEAD > bytes.len() {
				return Err(short());
			}
			let mut hash_le = [0u8; 8];
			hash_le.copy_from_slice(&bytes[pos..pos + 8]);
			let value_size = u16::from_le_bytes([bytes[pos + 8], bytes[pos + 9]]) as usize;
			pos += Self::SLOT_OVERHEAD;
			if pos + value_size > bytes.len() {
				return Err(short());
			}
			slots.push(HashBucketSlot {
				keyword_hash: u64::from_le_bytes(hash_le),
				value: bytes[pos..pos + value_size].to_vec(),
			});
			pos += value_size;
		}
		Ok(Self {
			slots,
		})
	}

	/// The value stored for a keyword identifier, if present.
	pub fn find(&self, keyword_hash: u64) -> Option<&[u8]> {
		self.slots
			.iter()
			.find(|s| s.keyword_hash == keyword_hash)
			.map(|s| s.value.as_slice())
	}

	fn fits(&self, value_len: usize, max_serialized_size: usize) -> bool {
		self.slots.len() < Self::MAX_SLOT_COUNT
			&& self.serialized_size() + Self::SLOT_OVERHEAD + value_len <= max_serialized_size
	}
}

/// A constructed cuckoo table.
#[derive(Debug, Clone)]
pub struct CuckooTable {
	config: CuckooTableConfig,
	buckets: Vec<HashBucket>,
}

impl CuckooTable {
	/// Builds a table for `rows`, expanding the bucket count on failure when
	/// the configuration allows it.
	pub fn new<R: RngCore>(
		rows: &[KeywordValuePair],
		config: &CuckooTableConfig,
		rng: &mut R,
	) -> Result<Self> {
		Self::validate(rows, config)?;
		let entries: Vec<(u64, &[u8])> = rows
			.iter()
			.map(|row| (keyword_hash(&row.keyword), row.value.as_slice()))
			.collect();
		let total_slot_bytes: usize = rows
			.iter()
			.map(|row| HashBucket::SLOT_OVERHEAD + row.value.len())
			.sum();

		let (mut bucket_count, max_attempts) = match config.bucket_count {
			BucketCountConfig::FixedSize {
				bucket_count,
			} => (bucket_count.max(1), 1),
			BucketCountConfig::AllowExpansion {
				target_load_factor,
				..
			} => {
				let capacity = target_load_factor * config.max_serialized_bucket_size as f64;
				(((total_slot_bytes as f64 / capacity).ceil() as usize).max(1), 8)
			}
		};

		let mut last_error = None;
		for attempt in 0..max_attempts {
			match Self::try_build(&entries, bucket_count, config, rng) {
				Ok(buckets) => {
					tracing::debug!(bucket_count, attempt, "cuckoo table constructed");
					return Ok(Self {
						config: config.clone(),
						buckets,
					});
				}
				Err(e) => {
					tracing::debug!(bucket_count, attempt, error = %e, "cuckoo attempt failed");
					last_error = Some(e);
					if let BucketCountConfig::AllowExpansion {
						expansion_factor,
						..
					} = config.bucket_count
					{
						let grown = (bucket_count as f64 * expansion_factor).ceil() as usize;
						bucket_count = grown.max(bucket_count + 1);
					}
				}
			}
		}
		Err(last_error.unwrap_or_else(|| {
			Error::FailedToConstructCuckooTable {
				bucket_count,
				attempted_evictions: 0,
			}
		}))
	}

	fn validate(rows: &[KeywordValuePair], config: &CuckooTableConfig) -> Result<()> {
		if rows.is_empty() {
			return Err(Error::InvalidDatabase("empty keyword database".to_string()));
		}
		if !(1..=3).contains(&config.hash_function_count) {
			return Err(veil_he::Error::InvalidParameter(format!(
				"hash function count {} outside [1, 3]",
				config.hash_function_count
			))
			.into());
		}
		if let BucketCountConfig::AllowExpansion {
			expansion_factor,
			target_load_factor,
		} = config.bucket_count
		{
			if expansion_factor <= 1.0 || !(0.0..=1.0).contains(&target_load_factor)
				|| target_load_factor == 0.0
			{
				return Err(veil_he::Error::InvalidParameter(
					"expansion factor must exceed 1 and target load must lie in (0, 1]"
						.to_string(),
				)
				.into());
			}
		}
		let mut seen: HashMap<u64, &[u8]> = HashMap::with_capacity(rows.len());
		for row in rows {
			if row.value.len() > HashBucket::MAX_VALUE_SIZE
				|| 1 + HashBucket::SLOT_OVERHEAD + row.value.len()
					> config.max_serialized_bucket_size
			{
				return Err(Error::InvalidDatabase(format!(
					"value of {} bytes cannot fit any bucket",
					row.value.len()
				)));
			}
			let hash = keyword_hash(&row.keyword);
			if let Some(previous) = seen.insert(hash, &row.keyword) {
				if previous == row.keyword.as_slice() {
					return Err(Error::InvalidDatabase(
						"duplicate keyword in database".to_string(),
					));
				}
				return Err(Error::InvalidDatabase(
					"keyword hash collision in database".to_string(),
				));
			}
		}
		Ok(())
	}

	fn try_build<R: RngCore>(
		entries: &[(u64, &[u8])],
		bucket_count: usize,
		config: &CuckooTableConfig,
		rng: &mut R,
	) -> Result<Vec<HashBucket>> {
		let max_size = config.max_serialized_bucket_size;
		let mut buckets = vec![HashBucket::default(); bucket_count];
		let mut total_evictions = 0usize;
		for &(hash, value) in entries {
			let mut current = HashBucketSlot {
				keyword_hash: hash,
				value: value.to_vec(),
			};
			let mut chain_evictions = 0usize;
			loop {
				let candidates =
					candidate_indices(current.keyword_hash, bucket_count, config.hash_function_count);
				let placed = candidates.iter().copied().find(|&index| {
					buckets[index].fits(current.value.len(), max_size)
				});
				if let Some(index) = placed {
					buckets[index].slots.push(current);
					break;
				}
				if chain_evictions >= config.max_eviction_count {
					return Err(Error::FailedToConstructCuckooTable {
						bucket_count,
						attempted_evictions: total_evictions,
					});
				}
				// Evict a random occupant of a random candidate bucket and
				// carry it through the next round.
				let bucket = &mut buckets[candidates
					[rng.next_u32() as usize % candidates.len()]];
				chain_evictions += 1;
				total_evictions += 1;
				if bucket.slots.is_empty() {
					continue;
				}
				let victim_index = rng.next_u32() as usize % bucket.slots.len();
				let victim = bucket.slots.swap_remove(victim_index);
				if bucket.fits(current.value.len(), max_size) {
					bucket.slots.push(current);
					current = victim;
				} else {
					bucket.slots.push(victim);
				}
			}
		}
		Ok(buckets)
	}

	/// The bucket count the table settled on.
	pub fn bucket_count(&self) -> usize {
		self.buckets.len()
	}

	/// The constructed buckets.
	pub fn buckets(&self) -> &[HashBucket] {
		&self.buckets
	}

	/// The configuration the table was built with.
	pub fn config(&self) -> &CuckooTableConfig {
		&self.config
	}

	/// Every bucket serialized, each within the configured size bound.
	pub fn serialized_buckets(&self) -> Result<Vec<Vec<u8>>> {
		self.buckets.iter().map(HashBucket::to_bytes).collect()
	}

	/// Fraction of the total serialized capacity in use.
	pub fn load_factor(&self) -> f64 {
		let used: usize = self.buckets.iter().map(HashBucket::serialized_size).sum();
		used as f64 / (self.buckets.len() * self.config.max_serialized_bucket_size) as f64
	}
}
