//! Configuration surface.
//!
//! These types mirror the JSON configuration consumed by the database
//! processing tool: the PIR shape, the keyword-PIR extras (cuckoo table and
//! sharding), and the RLWE parameter description that converts into
//! [`veil_he::EncryptionParameters`].

use serde::{Deserialize, Serialize};

use veil_he::{
	EncryptionParameters, EncryptionParametersBuilder, ErrorStdDev, KeyCompression, SecurityLevel,
};

use crate::error::Result;

/// The PIR algorithm to run.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Algorithm {
	/// MulPIR: Galois query expansion plus ciphertext multiplication across
	/// dimensions.
	#[default]
	MulPir,
}

fn default_batch_size() -> usize {
	1
}

fn default_dimension_count() -> usize {
	2
}

/// Shape of an index PIR deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PirConfig {
	/// The algorithm; only MulPIR is supported.
	#[serde(default)]
	pub algorithm: Algorithm,
	/// Number of database entries.
	pub entry_count: u64,
	/// Fixed byte size of every entry.
	pub entry_size_in_bytes: usize,
	/// Number of hyper-rectangle dimensions, 1 or 2.
	#[serde(default = "default_dimension_count")]
	pub dimension_count: usize,
	/// Queries packed into one request.
	#[serde(default = "default_batch_size")]
	pub batch_size: usize,
	/// Search for dimension sizes minimizing the evaluation key instead of
	/// balancing them.
	#[serde(default)]
	pub uneven_dimensions: bool,
	/// How aggressively the expansion evaluation key is thinned.
	#[serde(default)]
	pub key_compression: KeyCompression,
}

impl Default for PirConfig {
	fn default() -> Self {
		Self {
			algorithm: Algorithm::MulPir,
			entry_count: 0,
			entry_size_in_bytes: 0,
			dimension_count: default_dimension_count(),
			batch_size: default_batch_size(),
			uneven_dimensions: false,
			key_compression: KeyCompression::None,
		}
	}
}

/// How the cuckoo table picks its bucket count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BucketCountConfig {
	/// Start from the target load factor and widen on failure.
	#[serde(rename_all = "camelCase")]
	AllowExpansion {
		/// Multiplier applied to the bucket count on each retry.
		expansion_factor: f64,
		/// Fraction of total bucket capacity the initial sizing aims for.
		target_load_factor: f64,
	},
	/// Use exactly this many buckets; construction fails rather than grow.
	#[serde(rename_all = "camelCase")]
	FixedSize {
		/// The bucket count.
		bucket_count: usize,
	},
}

/// Cuckoo table shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CuckooTableConfig {
	/// Candidate buckets per keyword, between 1 and 3.
	pub hash_function_count: usize,
	/// Evictions before an insertion attempt fails.
	pub max_eviction_count: usize,
	/// Upper bound on a bucket's serialized size; also the PIR entry size.
	pub max_serialized_bucket_size: usize,
	/// Bucket count policy.
	pub bucket_count: BucketCountConfig,
}

/// How keywords map to shards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ShardingFunction {
	/// `SHA256(keyword)[0..8] mod shard_count`.
	Sha256,
	/// `(SHA256(keyword)[0..8] mod other) mod shard_count`, for sharding
	/// shared with another deployment.
	#[serde(rename_all = "camelCase")]
	DoubleMod {
		/// The other deployment's shard count.
		other_shard_count: usize,
	},
}

impl Default for ShardingFunction {
	fn default() -> Self {
		Self::Sha256
	}
}

/// How many shards a keyword database splits into.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Sharding {
	/// A fixed shard count.
	ShardCount(usize),
	/// Derive the shard count from a target row count per shard.
	EntryCountPerShard(usize),
}

impl Default for Sharding {
	fn default() -> Self {
		Self::ShardCount(1)
	}
}

/// Shape of a keyword PIR deployment. The embedded PIR entry count, entry
/// size and batch size are derived from the cuckoo table during processing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeywordPirConfig {
	/// The index PIR shape buckets are served through.
	#[serde(flatten)]
	pub pir: PirConfig,
	/// Cuckoo table shape.
	pub cuckoo_table: CuckooTableConfig,
	/// Keyword-to-shard function.
	#[serde(default)]
	pub sharding_function: ShardingFunction,
	/// Shard count policy.
	#[serde(default)]
	pub sharding: Sharding,
}

/// RLWE parameter description, convertible into validated
/// [`EncryptionParameters`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RlweParameters {
	/// Polynomial degree `N`.
	pub poly_degree: usize,
	/// Plaintext modulus `t`.
	pub plaintext_modulus: u64,
	/// Explicit RNS moduli, or empty to derive from `coefficient_moduli_bits`.
	#[serde(default)]
	pub coefficient_moduli: Vec<u64>,
	/// Bit sizes used to generate NTT-friendly moduli when none are given.
	#[serde(default)]
	pub coefficient_moduli_bits: Vec<usize>,
	/// Error distribution tag.
	#[serde(default)]
	pub error_std_dev: ErrorStdDev,
	/// Enforced security level.
	#[serde(default)]
	pub security_level: SecurityLevel,
}

impl RlweParameters {
	/// Validates the description into encryption parameters.
	pub fn build(&self) -> Result<EncryptionParameters> {
		let mut builder = EncryptionParametersBuilder::new()
			.set_poly_degree(self.poly_degree)
			.set_plaintext_modulus(self.plaintext_modulus)
			.set_error_std_dev(self.error_std_dev)
			.set_security_level(self.security_level);
		if self.coefficient_moduli.is_empty() {
			builder = builder.set_coefficient_moduli_sizes(&self.coefficient_moduli_bits);
		} else {
			builder = builder.set_coefficient_moduli(self.coefficient_moduli.clone());
		}
		Ok(builder.build()?)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn pir_config_json_roundtrip() {
		let json = r#"{
			"algorithm": "mulPir",
			"entryCount": 100,
			"entrySizeInBytes": 24,
			"dimensionCount": 2,
			"batchSize": 2,
			"unevenDimensions": true,
			"keyCompression": "none"
		}"#;
		let config: PirConfig = serde_json::from_str(json).unwrap();
		assert_eq!(config.entry_count, 100);
		assert_eq!(config.batch_size, 2);
		assert!(config.uneven_dimensions);
		let back: PirConfig =
			serde_json::from_str(&serde_json::to_string(&config).unwrap()).unwrap();
		assert_eq!(back, config);
	}

	#[test]
	fn pir_config_defaults() {
		let config: PirConfig =
			serde_json::from_str(r#"{"entryCount": 10, "entrySizeInBytes": 8}"#).unwrap();
		assert_eq!(config.algorithm, Algorithm::MulPir);
		assert_eq!(config.dimension_count, 2);
		assert_eq!(config.batch_size, 1);
		assert!(!config.uneven_dimensions);
	}

	#[test]
	fn keyword_config_json_roundtrip() {
		let json = r#"{
			"entryCount": 0,
			"entrySizeInBytes": 0,
			"cuckooTable": {
				"hashFunctionCount": 2,
				"maxEvictionCount": 100,
				"maxSerializedBucketSize": 512,
				"bucketCount": { "allowExpansion": { "expansionFactor": 1.1, "targetLoadFactor": 0.5 } }
			},
			"shardingFunction": { "doubleMod": { "otherShardCount": 16 } },
			"sharding": { "shardCount": 4 }
		}"#;
		let config: KeywordPirConfig = serde_json::from_str(json).unwrap();
		assert_eq!(config.cuckoo_table.hash_function_count, 2);
		assert!(matches!(
			config.sharding_function,
			ShardingFunction::DoubleMod { other_shard_count: 16 }
		));
		assert_eq!(config.sharding, Sharding::ShardCount(4));
		let back: KeywordPirConfig =
			serde_json::from_str(&serde_json::to_string(&config).unwrap()).unwrap();
		assert_eq!(back, config);
	}

	#[test]
	fn rlwe_parameters_build() {
		let params = RlweParameters {
			poly_degree: 8,
			plaintext_modulus: 17,
			coefficient_moduli: vec![],
			coefficient_moduli_bits: vec![18, 18, 18],
			error_std_dev: ErrorStdDev::StdDev32,
			security_level: SecurityLevel::Unchecked,
		};
		let built = params.build().unwrap();
		assert_eq!(built.poly_degree(), 8);
		assert_eq!(built.coefficient_moduli().len(), 3);
	}
}
