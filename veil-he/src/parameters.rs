//! Encryption parameters and their validation.
//!
//! `EncryptionParameters` is a light-weight description of the scheme:
//! polynomial degree, plaintext modulus, RNS coefficient moduli, error
//! distribution and security level. Building a [`crate::Context`] from it
//! performs the heavy pre-computations. Use the builder to construct a
//! validated instance; validation rejects parameter sets whose total modulus
//! width exceeds the post-quantum security table unless the security level is
//! explicitly [`SecurityLevel::Unchecked`].

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::zq::{generate_primes, is_prime_vartime, MAX_MODULUS_BITS};

/// Enforced security level for parameter validation.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SecurityLevel {
	/// 128-bit security against quantum attackers, per the embedded table.
	#[default]
	Quantum128,
	/// No security enforcement. Only for testing.
	Unchecked,
}

/// Standard deviation of the centered binomial error distribution.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorStdDev {
	/// Standard deviation ~3.2 (20 coin pairs per coefficient).
	#[default]
	StdDev32,
}

/// Maximum `log2(Q)` for 128-bit post-quantum security, keyed by degree.
/// Degrees below the first entry admit no secure modulus at all.
const QUANTUM128_LOG_Q: &[(usize, f64)] = &[
	(1024, 25.0),
	(2048, 51.0),
	(4096, 101.0),
	(8192, 202.0),
	(16384, 411.0),
	(32768, 827.0),
	(65536, 1654.0),
];

/// A validated set of BFV encryption parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptionParameters {
	poly_degree: usize,
	plaintext_modulus: u64,
	coefficient_moduli: Vec<u64>,
	error_std_dev: ErrorStdDev,
	security_level: SecurityLevel,
}

impl EncryptionParameters {
	/// The polynomial degree `N`.
	pub fn poly_degree(&self) -> usize {
		self.poly_degree
	}

	/// The plaintext modulus `t`.
	pub fn plaintext_modulus(&self) -> u64 {
		self.plaintext_modulus
	}

	/// The RNS coefficient moduli `q_0, ..., q_{L-1}`.
	pub fn coefficient_moduli(&self) -> &[u64] {
		&self.coefficient_moduli
	}

	/// The error distribution tag.
	pub fn error_std_dev(&self) -> ErrorStdDev {
		self.error_std_dev
	}

	/// The enforced security level.
	pub fn security_level(&self) -> SecurityLevel {
		self.security_level
	}

	/// SIMD encoding needs the plaintext NTT: `t ≡ 1 (mod 2N)`.
	pub fn supports_simd_encoding(&self) -> bool {
		self.plaintext_modulus % (2 * self.poly_degree as u64) == 1
	}

	/// Key switching decomposes over at least two RNS moduli.
	pub fn supports_evaluation_key(&self) -> bool {
		self.coefficient_moduli.len() >= 2
	}

	/// Total `log2(Q)` of the coefficient modulus.
	pub fn log_q(&self) -> f64 {
		self.coefficient_moduli
			.iter()
			.map(|&q| (q as f64).log2())
			.sum()
	}

	/// Bytes a plaintext polynomial can carry at `floor(log2 t)` bits per
	/// coefficient.
	pub fn bytes_per_plaintext(&self) -> usize {
		self.poly_degree * Self::bits_per_coefficient(self.plaintext_modulus) / 8
	}

	/// The largest bit width every coefficient value can safely use.
	pub fn bits_per_coefficient(plaintext_modulus: u64) -> usize {
		(63 - plaintext_modulus.leading_zeros() as usize).max(1)
	}
}

/// Builder for [`EncryptionParameters`].
///
/// The coefficient moduli can be given explicitly or as bit sizes, in which
/// case NTT-friendly primes are generated deterministically.
#[derive(Debug, Default)]
pub struct EncryptionParametersBuilder {
	poly_degree: Option<usize>,
	plaintext_modulus: Option<u64>,
	coefficient_moduli: Option<Vec<u64>>,
	coefficient_moduli_sizes: Option<Vec<usize>>,
	error_std_dev: ErrorStdDev,
	security_level: SecurityLevel,
}

impl EncryptionParametersBuilder {
	/// Creates an empty builder.
	pub fn new() -> Self {
		Self::default()
	}

	/// Sets the polynomial degree `N` (a power of two).
	pub fn set_poly_degree(mut self, degree: usize) -> Self {
		self.poly_degree = Some(degree);
		self
	}

	/// Sets the plaintext modulus `t`.
	pub fn set_plaintext_modulus(mut self, t: u64) -> Self {
		self.plaintext_modulus = Some(t);
		self
	}

	/// Sets explicit coefficient moduli.
	pub fn set_coefficient_moduli(mut self, moduli: Vec<u64>) -> Self {
		self.coefficient_moduli = Some(moduli);
		self
	}

	/// Generates coefficient moduli of the given bit sizes.
	pub fn set_coefficient_moduli_sizes(mut self, sizes: &[usize]) -> Self {
		self.coefficient_moduli_sizes = Some(sizes.to_vec());
		self
	}

	/// Sets the error distribution.
	pub fn set_error_std_dev(mut self, dev: ErrorStdDev) -> Self {
		self.error_std_dev = dev;
		self
	}

	/// Sets the enforced security level.
	pub fn set_security_level(mut self, level: SecurityLevel) -> Self {
		self.security_level = level;
		self
	}

	/// Validates the choices and returns the parameters.
	pub fn build(self) -> Result<EncryptionParameters> {
		let poly_degree = self
			.poly_degree
			.ok_or_else(|| Error::InvalidParameter("polynomial degree not set".to_string()))?;
		if !poly_degree.is_power_of_two() || !(8..=65536).contains(&poly_degree) {
			return Err(Error::InvalidParameter(format!(
				"degree {poly_degree} is not a power of two in [8, 65536]"
			)));
		}
		let plaintext_modulus = self
			.plaintext_modulus
			.ok_or_else(|| Error::InvalidParameter("plaintext modulus not set".to_string()))?;
		if !is_prime_vartime(plaintext_modulus) {
			return Err(Error::InvalidParameter(format!(
				"plaintext modulus {plaintext_modulus} is not prime"
			)));
		}
		let coefficient_moduli = match (self.coefficient_moduli, self.coefficient_moduli_sizes) {
			(Some(_), Some(_)) | (None, None) => {
				return Err(Error::InvalidParameter(
					"exactly one of coefficient moduli or their sizes must be set".to_string(),
				))
			}
			(Some(moduli), None) => moduli,
			(None, Some(sizes)) => generate_primes(&sizes, false, Some(poly_degree))?,
		};
		if coefficient_moduli.is_empty() {
			return Err(Error::InvalidParameter(
				"at least one coefficient modulus is required".to_string(),
			));
		}
		for (i, &q) in coefficient_moduli.iter().enumerate() {
			if !is_prime_vartime(q) || q >= 1u64 << MAX_MODULUS_BITS {
				return Err(Error::InvalidParameter(format!(
					"coefficient modulus {q} is not a prime below 2^{MAX_MODULUS_BITS}"
				)));
			}
			if q % (2 * poly_degree as u64) != 1 {
				return Err(Error::InvalidParameter(format!(
					"coefficient modulus {q} does not support degree-{poly_degree} NTT"
				)));
			}
			if coefficient_moduli[..i].contains(&q) {
				return Err(Error::InvalidParameter(format!(
					"coefficient modulus {q} appears twice"
				)));
			}
		}
		let min_q = coefficient_moduli.iter().min().copied().unwrap_or(0);
		if plaintext_modulus >= min_q {
			return Err(Error::InvalidParameter(format!(
				"plaintext modulus {plaintext_modulus} is not below every coefficient modulus"
			)));
		}
		let params = EncryptionParameters {
			poly_degree,
			plaintext_modulus,
			coefficient_moduli,
			error_std_dev: self.error_std_dev,
			security_level: self.security_level,
		};
		if params.security_level == SecurityLevel::Quantum128 {
			let max_log_q = QUANTUM128_LOG_Q
				.iter()
				.find(|(degree, _)| *degree == poly_degree)
				.map(|(_, max)| *max)
				.unwrap_or(0.0);
			if params.log_q() > max_log_q {
				return Err(Error::InsecureParameters {
					degree: poly_degree,
					log_q: params.log_q(),
					max_log_q,
				});
			}
		}
		Ok(params)
	}
}
