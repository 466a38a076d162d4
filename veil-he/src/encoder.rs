//! Plaintext encoding.
//!
//! Two formats are supported. `Coefficient` places the i-th value into the
//! i-th polynomial coefficient modulo `t`. `Simd` uses the CRT isomorphism
//! `Z_t[x]/(x^N+1) ≅ (Z_t)^N` available when `t ≡ 1 (mod 2N)`: the values are
//! laid out as a 2 x (N/2) matrix through the plaintext NTT, so that Galois
//! automorphisms rotate the matrix columns and swap its rows slot-wise.
//! Byte-level helpers pack raw bytes at `floor(log2 t)` bits per coefficient
//! for database-style payloads.

use crate::context::Context;
use crate::error::{Error, Result};
use crate::plaintext::Plaintext;
use crate::poly::{Poly, Representation};
use crate::serialization::{pack_bits, unpack_bits};
use crate::parameters::EncryptionParameters;

/// Plaintext encoding format.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum EncodeFormat {
	/// Values become polynomial coefficients.
	Coefficient,
	/// Values become SIMD slots of the 2 x (N/2) batching matrix.
	Simd,
}

/// Encodes and decodes vectors of integers modulo `t`.
pub struct Encoder {
	context: Context,
}

impl Encoder {
	/// Creates an encoder over `context`.
	pub fn new(context: &Context) -> Self {
		Self {
			context: context.clone(),
		}
	}

	/// Encodes up to `N` values, zero-padding the rest.
	pub fn encode(&self, values: &[u64], format: EncodeFormat) -> Result<Plaintext> {
		let degree = self.context.params().poly_degree();
		let t = self.context.params().plaintext_modulus();
		if values.len() > degree {
			return Err(Error::InvalidParameter(format!(
				"{} values exceed degree {degree}",
				values.len()
			)));
		}
		if let Some(&v) = values.iter().find(|&&v| v >= t) {
			return Err(Error::InvalidParameter(format!(
				"value {v} is not reduced modulo {t}"
			)));
		}
		let mut coefficients = vec![0u64; degree];
		match format {
			EncodeFormat::Coefficient => {
				coefficients[..values.len()].copy_from_slice(values);
			}
			EncodeFormat::Simd => {
				let tables = self.context.simd_tables()?;
				for (i, &v) in values.iter().enumerate() {
					coefficients[tables.index_map[i]] = v;
				}
				tables.ntt.inverse(&mut coefficients);
			}
		}
		let mut poly = Poly::zero(self.context.plaintext_context(), Representation::Coefficient);
		poly.row_mut(0).copy_from_slice(&coefficients);
		Ok(Plaintext::new(poly))
	}

	/// Decodes a plaintext back into `N` values.
	pub fn decode(&self, plaintext: &Plaintext, format: EncodeFormat) -> Result<Vec<u64>> {
		let values = plaintext.values()?;
		match format {
			EncodeFormat::Coefficient => Ok(values.to_vec()),
			EncodeFormat::Simd => {
				let tables = self.context.simd_tables()?;
				let mut slots = values.to_vec();
				tables.ntt.forward(&mut slots);
				Ok(tables.index_map.iter().map(|&i| slots[i]).collect())
			}
		}
	}

	/// Packs raw bytes into coefficients at `floor(log2 t)` bits each.
	pub fn encode_bytes(&self, bytes: &[u8]) -> Result<Plaintext> {
		let capacity = self.context.params().bytes_per_plaintext();
		if bytes.len() > capacity {
			return Err(Error::InvalidParameter(format!(
				"{} bytes exceed plaintext capacity {capacity}",
				bytes.len()
			)));
		}
		let bits =
			EncryptionParameters::bits_per_coefficient(self.context.params().plaintext_modulus());
		let values = unpack_bits(bytes, bits, self.context.params().poly_degree());
		self.encode(&values, EncodeFormat::Coefficient)
	}

	/// Recovers `byte_count` bytes packed by [`Encoder::encode_bytes`].
	pub fn decode_bytes(&self, plaintext: &Plaintext, byte_count: usize) -> Result<Vec<u8>> {
		let capacity = self.context.params().bytes_per_plaintext();
		if byte_count > capacity {
			return Err(Error::InvalidParameter(format!(
				"{byte_count} bytes exceed plaintext capacity {capacity}"
			)));
		}
		let bits =
			EncryptionParameters::bits_per_coefficient(self.context.params().plaintext_modulus());
		let values = self.decode(plaintext, EncodeFormat::Coefficient)?;
		let mut bytes = pack_bits(&values, bits);
		bytes.truncate(byte_count);
		Ok(bytes)
	}
}
