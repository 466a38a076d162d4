use thiserror::Error;

/// Errors produced by the PIR layers, wrapping the ring and scheme errors
/// they are built on.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
	/// An error bubbled up unchanged from the HE layer.
	#[error(transparent)]
	He(#[from] veil_he::Error),

	/// The database rows are unusable: duplicate keywords, empty input, or a
	/// serialization version mismatch.
	#[error("invalid database: {0}")]
	InvalidDatabase(String),

	/// Cuckoo insertion ran out of evictions.
	#[error(
		"cuckoo table construction failed at {bucket_count} buckets after {attempted_evictions} evictions"
	)]
	FailedToConstructCuckooTable {
		/// The bucket count the attempt ran with.
		bucket_count: usize,
		/// Evictions performed before giving up.
		attempted_evictions: usize,
	},

	/// A filesystem error while saving or loading a processed database.
	#[error("i/o: {0}")]
	Io(String),

	/// An error raised while processing or querying one shard.
	#[error("shard {shard_index}: {source}")]
	Shard {
		/// Which shard failed.
		shard_index: usize,
		/// The underlying failure.
		source: Box<Error>,
	},

	/// An error raised while computing one response dimension.
	#[error("dimension {dimension}: {source}")]
	Dimension {
		/// Which dimension failed.
		dimension: usize,
		/// The underlying failure.
		source: Box<Error>,
	},
}

impl Error {
	/// Tags an error with the shard it came from.
	pub(crate) fn in_shard(self, shard_index: usize) -> Self {
		Error::Shard {
			shard_index,
			source: Box::new(self),
		}
	}

	/// Tags an error with the dimension it came from.
	pub(crate) fn in_dimension(self, dimension: usize) -> Self {
		Error::Dimension {
			dimension,
			source: Box::new(self),
		}
	}
}

/// A `Result` alias with the crate error type.
pub type Result<T> = std::result::Result<T, Error>;
