//! Private Information Retrieval over [`veil_he`].
//!
//! Two query surfaces share one engine. *Index PIR* retrieves the entry at a
//! private position using MulPIR: the database is packed into a
//! hyper-rectangle of plaintexts, queries compress into a handful of
//! ciphertext coefficients, and the server expands them through Galois
//! automorphisms before multiplying across dimensions. *Keyword PIR* reduces
//! private lookup by key to index PIR through cuckoo hashing: rows land in
//! fixed-size buckets, and a keyword query fetches all of its candidate
//! buckets in one batched index query. Large databases shard by keyword
//! hash, each shard processed and validated independently.
//!
//! # Example
//!
//! ```rust
//! use rand::thread_rng;
//! use veil_he::{Context, EncryptionParametersBuilder, SecurityLevel};
//! use veil_pir::{
//!     BucketCountConfig, CuckooTableConfig, KeywordPirClient, KeywordPirConfig,
//!     KeywordPirServer, KeywordValuePair, PirConfig,
//! };
//!
//! fn main() -> anyhow::Result<()> {
//!     let params = EncryptionParametersBuilder::new()
//!         .set_poly_degree(4096)
//!         .set_plaintext_modulus(257)
//!         .set_coefficient_moduli_sizes(&[33, 33, 33])
//!         .build()?;
//!     let ctx = Context::new(&params)?;
//!     let mut rng = thread_rng();
//!
//!     let rows = vec![KeywordValuePair::new(b"veil".to_vec(), b"curtain".to_vec())];
//!     let config = KeywordPirConfig {
//!         pir: PirConfig {
//!             entry_count: 0,
//!             entry_size_in_bytes: 0,
//!             dimension_count: 2,
//!             batch_size: 1,
//!             uneven_dimensions: true,
//!             ..Default::default()
//!         },
//!         cuckoo_table: CuckooTableConfig {
//!             hash_function_count: 2,
//!             max_eviction_count: 100,
//!             max_serialized_bucket_size: 1024,
//!             bucket_count: BucketCountConfig::AllowExpansion {
//!                 expansion_factor: 1.25,
//!                 target_load_factor: 0.5,
//!             },
//!         },
//!         sharding_function: Default::default(),
//!         sharding: Default::default(),
//!     };
//!
//!     let (parameter, database) = KeywordPirServer::process(&rows, &config, &ctx, &mut rng)?;
//!     let server = KeywordPirServer::new(&ctx, parameter.clone(), database)?;
//!
//!     let secret_key = ctx.generate_secret_key(&mut rng)?;
//!     let client = KeywordPirClient::new(&ctx, parameter, &secret_key);
//!     let evaluation_key = client.generate_evaluation_key(&mut rng)?;
//!
//!     let query = client.generate_query(b"veil", &mut rng)?;
//!     let response = server.compute_response(&query, &evaluation_key)?;
//!     assert_eq!(
//!         client.decrypt_response(&response, b"veil")?,
//!         Some(b"curtain".to_vec())
//!     );
//!     Ok(())
//! }
//! ```

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

mod config;
mod cuckoo;
mod database;
mod error;
mod index_pir;
mod keyword_pir;
mod sharding;

pub use config::{
	Algorithm, BucketCountConfig, CuckooTableConfig, KeywordPirConfig, PirConfig, RlweParameters,
	Sharding, ShardingFunction,
};
pub use cuckoo::{
	candidate_indices, keyword_hash, CuckooTable, HashBucket, HashBucketSlot, KeywordValuePair,
};
pub use database::ProcessedDatabase;
pub use error::{Error, Result};
pub use index_pir::{
	IndexPirClient, IndexPirParameter, IndexPirServer, MulPir, Query, Response,
	MIN_NOISE_BUDGET,
};
pub use keyword_pir::{KeywordPirClient, KeywordPirParameter, KeywordPirServer};
pub use sharding::{
	process_sharded_database, shard_index, shard_index_double_mod, validate_shard,
	ProcessedDatabaseWithParameters, ValidationMetrics,
};
