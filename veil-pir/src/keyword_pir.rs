//! Keyword PIR: private lookup by keyword instead of index.
//!
//! Rows are cuckoo-hashed into fixed-size buckets; each serialized bucket
//! becomes one index PIR entry. A keyword query fetches all of the keyword's
//! candidate buckets in a single batched index query, and the client scans
//! the decrypted buckets for the slot carrying the keyword's hash. A keyword
//! that matches no slot yields `None`.

use rand::{CryptoRng, RngCore};

use veil_he::{Context, EvaluationKey, SecretKey};

use crate::config::{CuckooTableConfig, KeywordPirConfig, PirConfig};
use crate::cuckoo::{candidate_indices, keyword_hash, CuckooTable, HashBucket, KeywordValuePair};
use crate::database::ProcessedDatabase;
use crate::error::Result;
use crate::index_pir::{IndexPirClient, IndexPirParameter, IndexPirServer, MulPir, Query, Response};

/// The resolved shape of a keyword PIR deployment.
#[derive(Debug, Clone, PartialEq)]
pub struct KeywordPirParameter {
	/// The index PIR shape the buckets are served through.
	pub index_parameter: IndexPirParameter,
	/// The cuckoo table shape shared by client and server.
	pub cuckoo_config: CuckooTableConfig,
	/// The bucket count the table settled on.
	pub bucket_count: usize,
}

/// The serving side of keyword PIR.
pub struct KeywordPirServer {
	parameter: KeywordPirParameter,
	server: IndexPirServer,
}

impl KeywordPirServer {
	/// Cuckoo-hashes `rows` and packs the buckets into a processed database.
	///
	/// The embedded PIR configuration's entry count, entry size and batch
	/// size are derived here: one entry per bucket, sized at the bucket
	/// bound, batched over the hash functions.
	pub fn process<R: RngCore + CryptoRng>(
		rows: &[KeywordValuePair],
		config: &KeywordPirConfig,
		context: &Context,
		rng: &mut R,
	) -> Result<(KeywordPirParameter, ProcessedDatabase)> {
		let table = CuckooTable::new(rows, &config.cuckoo_table, rng)?;
		tracing::info!(
			rows = rows.len(),
			buckets = table.bucket_count(),
			load = table.load_factor(),
			"cuckoo table built"
		);
		let pir_config = PirConfig {
			algorithm: config.pir.algorithm,
			entry_count: table.bucket_count() as u64,
			entry_size_in_bytes: config.cuckoo_table.max_serialized_bucket_size,
			dimension_count: config.pir.dimension_count,
			batch_size: config.cuckoo_table.hash_function_count,
			uneven_dimensions: config.pir.uneven_dimensions,
			key_compression: config.pir.key_compression,
		};
		let index_parameter = MulPir::parameter(&pir_config, context)?;
		let buckets = table.serialized_buckets()?;
		let database = IndexPirServer::process_database(context, &index_parameter, &buckets)?;
		let parameter = KeywordPirParameter {
			index_parameter,
			cuckoo_config: config.cuckoo_table.clone(),
			bucket_count: table.bucket_count(),
		};
		Ok((parameter, database))
	}

	/// Creates a server over a processed keyword database.
	pub fn new(
		context: &Context,
		parameter: KeywordPirParameter,
		database: ProcessedDatabase,
	) -> Result<Self> {
		let server = IndexPirServer::new(context, parameter.index_parameter.clone(), database)?;
		Ok(Self {
			parameter,
			server,
		})
	}

	/// The resolved parameters.
	pub fn parameter(&self) -> &KeywordPirParameter {
		&self.parameter
	}

	/// Answers a keyword query.
	pub fn compute_response(
		&self,
		query: &Query,
		evaluation_key: &EvaluationKey,
	) -> Result<Response> {
		self.server.compute_response(query, evaluation_key)
	}
}

/// The querying side of keyword PIR.
pub struct KeywordPirClient {
	parameter: KeywordPirParameter,
	client: IndexPirClient,
}

impl KeywordPirClient {
	/// Creates a client for one deployment.
	pub fn new(
		context: &Context,
		parameter: KeywordPirParameter,
		secret_key: &SecretKey,
	) -> Self {
		let client = IndexPirClient::new(context, parameter.index_parameter.clone(), secret_key);
		Self {
			parameter,
			client,
		}
	}

	/// Generates the evaluation key the server needs.
	pub fn generate_evaluation_key<R: RngCore + CryptoRng>(
		&self,
		rng: &mut R,
	) -> Result<EvaluationKey> {
		self.client.generate_evaluation_key(rng)
	}

	/// The candidate bucket indices a keyword may live in.
	fn bucket_indices(&self, keyword: &[u8]) -> Vec<u64> {
		candidate_indices(
			keyword_hash(keyword),
			self.parameter.bucket_count,
			self.parameter.cuckoo_config.hash_function_count,
		)
		.into_iter()
		.map(|i| i as u64)
		.collect()
	}

	/// Builds the batched index query fetching every candidate bucket.
	pub fn generate_query<R: RngCore + CryptoRng>(
		&self,
		keyword: &[u8],
		rng: &mut R,
	) -> Result<Query> {
		self.client.generate_query(&self.bucket_indices(keyword), rng)
	}

	/// Decrypts the candidate buckets and scans them for the keyword.
	/// Returns `None` when no slot matches.
	pub fn decrypt_response(
		&self,
		response: &Response,
		keyword: &[u8],
	) -> Result<Option<Vec<u8>>> {
		let indices = self.bucket_indices(keyword);
		let buckets = self.client.decrypt_response(response, &indices)?;
		let hash = keyword_hash(keyword);
		for bytes in &buckets {
			let bucket = HashBucket::from_bytes(bytes)?;
			if let Some(value) = bucket.find(hash) {
				return Ok(Some(value.to_vec()));
			}
		}
		Ok(None)
	}

	/// The smallest noise budget across a response's ciphertexts.
	pub fn response_noise_budget(&self, response: &Response) -> Result<f64> {
		self.client.response_noise_budget(response)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::config::{Algorithm, BucketCountConfig};
	use crate::index_pir::MIN_NOISE_BUDGET;
	use rand::thread_rng;
	use veil_he::{EncryptionParametersBuilder, KeyCompression, SecurityLevel};

	fn keyword_context() -> Context {
		let params = EncryptionParametersBuilder::new()
			.set_poly_degree(512)
			.set_plaintext_modulus(257)
			.set_coefficient_moduli_sizes(&[45, 45, 45])
			.set_security_level(SecurityLevel::Unchecked)
			.build()
			.unwrap();
		Context::new(&params).unwrap()
	}

	fn keyword_config(bucket_count: BucketCountConfig) -> KeywordPirConfig {
		KeywordPirConfig {
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
				bucket_count,
			},
			sharding_function: Default::default(),
			sharding: Default::default(),
		}
	}

	fn rows(count: usize) -> Vec<KeywordValuePair> {
		(0..count)
			.map(|i| {
				KeywordValuePair::new(
					format!("kw-{i}").into_bytes(),
					format!("v{i:03}").into_bytes(),
				)
			})
			.collect()
	}

	#[test]
	fn keyword_roundtrip_and_missing_keyword() {
		let ctx = keyword_context();
		let mut rng = thread_rng();
		let rows = rows(1000);
		let config = keyword_config(BucketCountConfig::AllowExpansion {
			expansion_factor: 1.25,
			target_load_factor: 0.5,
		});
		let (parameter, database) =
			KeywordPirServer::process(&rows, &config, &ctx, &mut rng).unwrap();
		let server = KeywordPirServer::new(&ctx, parameter.clone(), database).unwrap();

		let sk = ctx.generate_secret_key(&mut rng).unwrap();
		let client = KeywordPirClient::new(&ctx, parameter, &sk);
		let evk = client.generate_evaluation_key(&mut rng).unwrap();

		// A present keyword decrypts to its value.
		let keyword = b"kw-321".to_vec();
		let query = client.generate_query(&keyword, &mut rng).unwrap();
		let response = server.compute_response(&query, &evk).unwrap();
		assert!(client.response_noise_budget(&response).unwrap() > MIN_NOISE_BUDGET);
		let value = client.decrypt_response(&response, &keyword).unwrap();
		assert_eq!(value, Some(b"v321".to_vec()));

		// A fresh keyword decrypts cleanly but matches no slot.
		let missing = b"nope!".to_vec();
		let query = client.generate_query(&missing, &mut rng).unwrap();
		let response = server.compute_response(&query, &evk).unwrap();
		let value = client.decrypt_response(&response, &missing).unwrap();
		assert_eq!(value, None);
	}

	#[test]
	fn fixed_bucket_count_gives_stable_parameters() {
		let ctx = keyword_context();
		let mut rng = thread_rng();
		let config = keyword_config(BucketCountConfig::FixedSize {
			bucket_count: 600,
		});

		let first = rows(10_000);
		let (parameter_a, _) =
			KeywordPirServer::process(&first, &config, &ctx, &mut rng).unwrap();

		let mut second = first;
		second.extend(rows(11_000).split_off(10_000));
		let (parameter_b, database_b) =
			KeywordPirServer::process(&second, &config, &ctx, &mut rng).unwrap();

		assert_eq!(parameter_a, parameter_b);
		assert_eq!(parameter_a.bucket_count, 600);
		assert_eq!(
			database_b.plaintext_count(),
			parameter_b.index_parameter.dimensions.iter().product::<usize>()
		);
	}
}
