use thiserror::Error;

/// The errors produced by the ring and scheme layers.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
	/// An out-of-range polynomial degree, modulus or argument.
	#[error("invalid parameter: {0}")]
	InvalidParameter(String),

	/// No prime with the requested properties exists in the requested bit range.
	#[error("no suitable prime of {bits} bits (ntt degree {ntt_degree:?})")]
	InvalidBitCount {
		/// The requested bit size.
		bits: usize,
		/// The NTT degree the prime had to support, if any.
		ntt_degree: Option<usize>,
	},

	/// A polynomial and its declared context disagree, or a mod-switch walked
	/// past the end of the chain.
	#[error("invalid context: {0}")]
	InvalidContext(String),

	/// A serialized buffer is too short, carries an unknown version or tag, or
	/// holds a field that exceeds its format limit.
	#[error("corrupted data: {0}")]
	CorruptedData(String),

	/// The requested Galois element has no key and cannot be composed from the
	/// keys that are present.
	#[error("no Galois key for element {element}")]
	MissingGaloisKey {
		/// The unreachable Galois element.
		element: u64,
	},

	/// The ciphertext noise grew past the decryption threshold.
	#[error("noise budget exhausted ({budget} bits remaining)")]
	NoiseBudgetExhausted {
		/// The budget that was measured, in bits.
		budget: f64,
	},

	/// The total coefficient modulus is too large for the requested security
	/// level at this degree.
	#[error("insecure parameters: log2(q) = {log_q} exceeds {max_log_q} for degree {degree}")]
	InsecureParameters {
		/// The polynomial degree.
		degree: usize,
		/// The total modulus width that was requested.
		log_q: f64,
		/// The maximum width the security table allows.
		max_log_q: f64,
	},
}

/// A `Result` alias with the crate error type.
pub type Result<T> = std::result::Result<T, Error>;
