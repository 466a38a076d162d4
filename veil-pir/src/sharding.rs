//! Sharded keyword databases.
//!
//! Large keyword databases split into shards, each processed independently
//! into its own parameters and plaintext hyper-rectangle. The shard a
//! keyword belongs to is a public function of its hash, so the client picks
//! the shard before issuing the private query inside it.

use std::time::{Duration, Instant};

use rand::{CryptoRng, RngCore};

use veil_he::{Context, ToBytes};

use crate::config::{KeywordPirConfig, Sharding, ShardingFunction};
use crate::cuckoo::{keyword_hash, KeywordValuePair};
use crate::database::ProcessedDatabase;
use crate::error::{Error, Result};
use crate::keyword_pir::{KeywordPirClient, KeywordPirParameter, KeywordPirServer};

/// The shard a keyword belongs to: its hash modulo the shard count.
pub fn shard_index(keyword: &[u8], shard_count: usize) -> usize {
	(keyword_hash(keyword) % shard_count as u64) as usize
}

/// Double-mod sharding for deployments that share shard placement with
/// another use case: the hash is first reduced by the other deployment's
/// shard count.
pub fn shard_index_double_mod(
	keyword: &[u8],
	other_shard_count: usize,
	shard_count: usize,
) -> usize {
	((keyword_hash(keyword) % other_shard_count as u64) % shard_count as u64) as usize
}

impl ShardingFunction {
	/// Applies the configured shard function.
	pub fn shard_index(&self, keyword: &[u8], shard_count: usize) -> usize {
		match self {
			ShardingFunction::Sha256 => shard_index(keyword, shard_count),
			ShardingFunction::DoubleMod {
				other_shard_count,
			} => shard_index_double_mod(keyword, *other_shard_count, shard_count),
		}
	}
}

impl Sharding {
	/// The shard count for a database of `row_count` rows.
	pub fn shard_count(&self, row_count: usize) -> usize {
		match self {
			Sharding::ShardCount(n) => (*n).max(1),
			Sharding::EntryCountPerShard(n) => row_count.div_ceil((*n).max(1)).max(1),
		}
	}
}

/// One processed shard and the parameters it must be served with.
#[derive(Debug, Clone)]
pub struct ProcessedDatabaseWithParameters {
	/// The shard's resolved parameters.
	pub parameter: KeywordPirParameter,
	/// The shard's plaintext hyper-rectangle.
	pub database: ProcessedDatabase,
}

/// Partitions `rows` into shards and processes each independently.
pub fn process_sharded_database<R: RngCore + CryptoRng>(
	rows: &[KeywordValuePair],
	config: &KeywordPirConfig,
	context: &Context,
	rng: &mut R,
) -> Result<Vec<ProcessedDatabaseWithParameters>> {
	if rows.is_empty() {
		return Err(Error::InvalidDatabase("empty keyword database".to_string()));
	}
	let shard_count = config.sharding.shard_count(rows.len());
	let mut shards: Vec<Vec<KeywordValuePair>> = vec![Vec::new(); shard_count];
	for row in rows {
		let index = config.sharding_function.shard_index(&row.keyword, shard_count);
		shards[index].push(row.clone());
	}
	let mut processed = Vec::with_capacity(shard_count);
	for (index, shard_rows) in shards.iter().enumerate() {
		let span = tracing::info_span!("process_shard", shard = index, rows = shard_rows.len());
		let _guard = span.enter();
		let (parameter, database) = KeywordPirServer::process(shard_rows, config, context, rng)
			.map_err(|e| e.in_shard(index))?;
		processed.push(ProcessedDatabaseWithParameters {
			parameter,
			database,
		});
	}
	Ok(processed)
}

/// Figures reported after validating one processed shard.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationMetrics {
	/// Serialized evaluation-key size in bytes.
	pub evaluation_key_size: usize,
	/// Serialized query size in bytes.
	pub query_size: usize,
	/// Serialized response size in bytes.
	pub response_size: usize,
	/// Noise budget remaining in the response, in bits.
	pub noise_budget: f64,
	/// Wall-clock time for one query-response-decrypt cycle.
	pub runtime: Duration,
}

/// Runs one end-to-end lookup against a processed shard with a fresh key
/// pair and checks the retrieved value, reporting sizes, noise and runtime.
pub fn validate_shard<R: RngCore + CryptoRng>(
	shard: &ProcessedDatabaseWithParameters,
	context: &Context,
	sample: &KeywordValuePair,
	rng: &mut R,
) -> Result<ValidationMetrics> {
	let secret_key = context.generate_secret_key(rng).map_err(Error::He)?;
	let client = KeywordPirClient::new(context, shard.parameter.clone(), &secret_key);
	let evaluation_key = client.generate_evaluation_key(rng)?;
	let server =
		KeywordPirServer::new(context, shard.parameter.clone(), shard.database.clone())?;

	let start = Instant::now();
	let query = client.generate_query(&sample.keyword, rng)?;
	let response = server.compute_response(&query, &evaluation_key)?;
	let value = client.decrypt_response(&response, &sample.keyword)?;
	let runtime = start.elapsed();

	if value.as_deref() != Some(sample.value.as_slice()) {
		return Err(Error::InvalidDatabase(
			"validation lookup returned the wrong value".to_string(),
		));
	}
	let metrics = ValidationMetrics {
		evaluation_key_size: evaluation_key.as_bytes()?.len(),
		query_size: query.to_bytes()?.len(),
		response_size: response.to_bytes(context)?.len(),
		noise_budget: client.response_noise_budget(&response)?,
		runtime,
	};
	tracing::info!(
		evaluation_key_size = metrics.evaluation_key_size,
		query_size = metrics.query_size,
		response_size = metrics.response_size,
		noise_budget = metrics.noise_budget,
		runtime_ms = metrics.runtime.as_millis() as u64,
		"shard validated"
	);
	Ok(metrics)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::config::{
		Algorithm, BucketCountConfig, CuckooTableConfig, PirConfig,
	};
	use rand::thread_rng;
	use veil_he::{EncryptionParametersBuilder, KeyCompression, SecurityLevel};

	#[test]
	fn shard_indices_are_stable_and_bounded() {
		for keyword in [b"alpha".as_slice(), b"beta", b"gamma", b""] {
			let a = shard_index(keyword, 7);
			assert_eq!(a, shard_index(keyword, 7));
			assert!(a < 7);
			let b = shard_index_double_mod(keyword, 16, 7);
			assert!(b < 7);
			assert_eq!(b, (keyword_hash(keyword) % 16 % 7) as usize);
		}
		// Reducing by the other deployment first changes placement.
		assert_eq!(
			ShardingFunction::DoubleMod {
				other_shard_count: 16
			}
			.shard_index(b"alpha", 7),
			shard_index_double_mod(b"alpha", 16, 7)
		);
	}

	#[test]
	fn sharding_policy_counts() {
		assert_eq!(Sharding::ShardCount(4).shard_count(100), 4);
		assert_eq!(Sharding::EntryCountPerShard(30).shard_count(100), 4);
		assert_eq!(Sharding::EntryCountPerShard(1000).shard_count(100), 1);
	}

	fn context() -> Context {
		let params = EncryptionParametersBuilder::new()
			.set_poly_degree(512)
			.set_plaintext_modulus(257)
			.set_coefficient_moduli_sizes(&[45, 45, 45])
			.set_security_level(SecurityLevel::Unchecked)
			.build()
			.unwrap();
		Context::new(&params).unwrap()
	}

	#[test]
	fn sharded_processing_and_validation() {
		let ctx = context();
		let mut rng = thread_rng();
		let rows: Vec<KeywordValuePair> = (0..400)
			.map(|i| {
				KeywordValuePair::new(
					format!("user-{i}").into_bytes(),
					format!("record-{i}").into_bytes(),
				)
			})
			.collect();
		let config = KeywordPirConfig {
			pir: PirConfig {
				algorithm: Algorithm::MulPir,
				entry_count: 0,
				entry_size_in_bytes: 0,
				dimension_count: 2,
				batch_size: 1,
				uneven_dimensions: true,
				key_compression: KeyCompression::None,
			},
			cuckoo_table: CuckooTableConfig {
				hash_function_count: 2,
				max_eviction_count: 100,
				max_serialized_bucket_size: 512,
				bucket_count: BucketCountConfig::AllowExpansion {
					expansion_factor: 1.25,
					target_load_factor: 0.5,
				},
			},
			sharding_function: ShardingFunction::Sha256,
			sharding: Sharding::ShardCount(2),
		};
		let shards = process_sharded_database(&rows, &config, &ctx, &mut rng).unwrap();
		assert_eq!(shards.len(), 2);

		// Validate one shard with a row that maps into it.
		let sample = rows
			.iter()
			.find(|row| shard_index(&row.keyword, 2) == 0)
			.unwrap();
		let metrics = validate_shard(&shards[0], &ctx, sample, &mut rng).unwrap();
		assert!(metrics.evaluation_key_size > 0);
		assert!(metrics.query_size > 0);
		assert!(metrics.response_size > 0);
		assert!(metrics.noise_budget > 0.0);
		assert!(metrics.response_size < metrics.query_size * 8);
	}
}
