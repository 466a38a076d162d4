//! Validated context with cached pre-computations.
//!
//! While [`EncryptionParameters`] is a light-weight description, `Context` is
//! the heavy-weight object built from it: it validates the parameters,
//! constructs the mod-switch chain of polynomial contexts (each dropping the
//! last coefficient modulus), and caches every constant the scheme needs at
//! each level: the RNS residues of `floor(Q_l/t)`, `Q_l mod t`, the inverses
//! used when a modulus is dropped, and the CRT garner residues that drive key
//! switching. It also holds the plaintext-side tables, including the SIMD
//! encoding map when the plaintext modulus supports batching.
//!
//! A `Context` is immutable after construction and cheap to clone; clones
//! share the cached tables and may be used freely across threads.

use std::sync::Arc;

use num_traits::ToPrimitive;

use crate::error::{Error, Result};
use crate::ntt::{bit_reverse, NttOperator};
use crate::parameters::EncryptionParameters;
use crate::poly::{Poly, PolyContext, Representation};
use crate::zq::Modulus;

/// Plaintext-side NTT tables for SIMD encoding.
#[derive(Debug)]
pub(crate) struct SimdTables {
	pub(crate) ntt: NttOperator,
	/// Slot index to transform-slot position, laying the vector out as a
	/// 2 x (N/2) matrix whose columns rotate under Galois element 3 and whose
	/// rows swap under element 2N-1.
	pub(crate) index_map: Vec<usize>,
}

#[derive(Debug)]
struct ContextInner {
	params: EncryptionParameters,
	chain: Vec<Arc<PolyContext>>,
	plaintext_context: Arc<PolyContext>,
	plain_modulus: Modulus,
	simd: Option<SimdTables>,
	/// Per level: `floor(Q_l/t) mod q_i`.
	delta_rns: Vec<Vec<u64>>,
	/// Per level: `Q_l mod t`.
	q_mod_t: Vec<u64>,
	/// Per level: `[q_last^-1]_{q_i}` for each remaining modulus, used when
	/// dropping the last modulus.
	inv_last_rns: Vec<Vec<u64>>,
	/// Top level only: `garner_j mod q_i`, the CRT reconstruction residues
	/// consumed by key switching.
	garner_rns: Vec<Vec<u64>>,
}

/// Shared, immutable pre-computation cache for one parameter set.
#[derive(Debug, Clone)]
pub struct Context {
	inner: Arc<ContextInner>,
}

impl Context {
	/// Validates `params` and performs all pre-computations.
	pub fn new(params: &EncryptionParameters) -> Result<Self> {
		let degree = params.poly_degree();
		let t = params.plaintext_modulus();
		let moduli = params.coefficient_moduli();
		let top = PolyContext::new(moduli, degree)?;

		let mut chain = Vec::with_capacity(moduli.len());
		chain.push(top.clone());
		let mut cursor = top.clone();
		while let Some(next) = cursor.next().cloned() {
			chain.push(next.clone());
			cursor = next;
		}

		let plaintext_context = PolyContext::new_plaintext(t, degree)?;
		let plain_modulus = Modulus::new(t)?;

		let simd = if params.supports_simd_encoding() {
			let ntt = NttOperator::new(&plain_modulus, degree)?;
			Some(SimdTables {
				index_map: Self::matrix_reps_index_map(degree),
				ntt,
			})
		} else {
			None
		};

		let mut delta_rns = Vec::with_capacity(chain.len());
		let mut q_mod_t = Vec::with_capacity(chain.len());
		let mut inv_last_rns = Vec::with_capacity(chain.len());
		for level_ctx in &chain {
			let q = level_ctx.modulus();
			let delta = &q / t;
			delta_rns.push(
				level_ctx
					.moduli()
					.iter()
					.map(|&qi| (&delta % qi).to_u64().unwrap_or(0))
					.collect(),
			);
			q_mod_t.push((&q % t).to_u64().unwrap_or(0));

			let count = level_ctx.modulus_count();
			if count >= 2 {
				let q_last = level_ctx.moduli()[count - 1];
				let inv = level_ctx.moduli_ops()[..count - 1]
					.iter()
					.map(|op| {
						op.inverse_vartime(q_last % op.value()).ok_or_else(|| {
							Error::InvalidParameter(format!(
								"modulus {q_last} is not invertible mod {}",
								op.value()
							))
						})
					})
					.collect::<Result<Vec<_>>>()?;
				inv_last_rns.push(inv);
			} else {
				inv_last_rns.push(Vec::new());
			}
		}

		let garner = top.garner()?;
		let garner_rns = garner
			.iter()
			.map(|g| {
				top.moduli()
					.iter()
					.map(|&qi| (g % qi).to_u64().unwrap_or(0))
					.collect()
			})
			.collect();

		Ok(Self {
			inner: Arc::new(ContextInner {
				params: params.clone(),
				chain,
				plaintext_context,
				plain_modulus,
				simd,
				delta_rns,
				q_mod_t,
				inv_last_rns,
				garner_rns,
			}),
		})
	}

	/// SEAL-lineage batching layout: slot `i` of the logical 2 x (N/2) matrix
	/// maps to the bit-reversed transform slot of the power-of-3 root walk.
	fn matrix_reps_index_map(degree: usize) -> Vec<usize> {
		let log_degree = degree.trailing_zeros();
		let m = 2 * degree as u64;
		let row_size = degree / 2;
		let mut map = vec![0usize; degree];
		let mut pos = 1u64;
		for i in 0..row_size {
			let idx1 = ((pos - 1) / 2) as usize;
			let idx2 = ((m - pos - 1) / 2) as usize;
			map[i] = bit_reverse(idx1, log_degree);
			map[i + row_size] = bit_reverse(idx2, log_degree);
			pos = (pos * 3) % m;
		}
		map
	}

	/// The parameters this context was built from.
	pub fn params(&self) -> &EncryptionParameters {
		&self.inner.params
	}

	/// Number of levels in the mod-switch chain.
	pub fn chain_length(&self) -> usize {
		self.inner.chain.len()
	}

	/// The polynomial context at the top of the chain (all moduli).
	pub fn top_context(&self) -> &Arc<PolyContext> {
		&self.inner.chain[0]
	}

	/// The polynomial context `level` steps down the chain.
	pub fn poly_context(&self, level: usize) -> Result<&Arc<PolyContext>> {
		self.inner
			.chain
			.get(level)
			.ok_or_else(|| Error::InvalidContext(format!("no chain level {level}")))
	}

	/// The chain level a polynomial context sits at.
	pub fn level_of(&self, ctx: &Arc<PolyContext>) -> Result<usize> {
		let level = self
			.inner
			.chain
			.len()
			.checked_sub(ctx.modulus_count())
			.ok_or_else(|| Error::InvalidContext("context has too many moduli".to_string()))?;
		if self.inner.chain[level].as_ref() != ctx.as_ref() {
			return Err(Error::InvalidContext(
				"polynomial context does not belong to this chain".to_string(),
			));
		}
		Ok(level)
	}

	/// The single-modulus plaintext context.
	pub fn plaintext_context(&self) -> &Arc<PolyContext> {
		&self.inner.plaintext_context
	}

	/// Arithmetic over the plaintext modulus.
	pub fn plain_modulus(&self) -> &Modulus {
		&self.inner.plain_modulus
	}

	pub(crate) fn simd_tables(&self) -> Result<&SimdTables> {
		self.inner.simd.as_ref().ok_or_else(|| {
			Error::InvalidParameter(format!(
				"plaintext modulus {} is not congruent to 1 mod 2N; SIMD encoding unavailable",
				self.inner.params.plaintext_modulus()
			))
		})
	}

	pub(crate) fn q_mod_t(&self, level: usize) -> u64 {
		self.inner.q_mod_t[level]
	}

	pub(crate) fn inv_last_rns(&self, level: usize) -> &[u64] {
		&self.inner.inv_last_rns[level]
	}

	pub(crate) fn garner_rns(&self) -> &[Vec<u64>] {
		&self.inner.garner_rns
	}

	/// Embeds plaintext coefficients as `round(Q_l * m / t)`, the exact
	/// scaling used by encryption and plain addition. Realized in RNS as
	/// `m * floor(Q_l/t) + round(m * (Q_l mod t) / t)`.
	pub(crate) fn scale_plaintext(&self, values: &[u64], level: usize) -> Result<Poly> {
		let ctx = self.poly_context(level)?.clone();
		let t = self.inner.params.plaintext_modulus();
		let r = self.inner.q_mod_t[level];
		let delta = &self.inner.delta_rns[level];
		let n = ctx.degree();
		if values.len() > n {
			return Err(Error::InvalidParameter(format!(
				"{} coefficients exceed degree {n}",
				values.len()
			)));
		}
		let mut poly = Poly::zero(&ctx, Representation::Coefficient);
		for (i, &m) in values.iter().enumerate() {
			debug_assert!(m < t);
			let extra = ((m as u128 * r as u128) + (t as u128 / 2)) / t as u128;
			for (row_index, op) in ctx.moduli_ops().iter().enumerate() {
				let value = op.reduce_u128(m as u128 * delta[row_index] as u128 + extra);
				poly.row_mut(row_index)[i] = value;
			}
		}
		Ok(poly)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::parameters::{EncryptionParametersBuilder, SecurityLevel};
	use num_bigint::BigUint;

	fn test_context() -> Context {
		let params = EncryptionParametersBuilder::new()
			.set_poly_degree(8)
			.set_plaintext_modulus(17)
			.set_coefficient_moduli_sizes(&[18, 18, 18])
			.set_security_level(SecurityLevel::Unchecked)
			.build()
			.unwrap();
		Context::new(&params).unwrap()
	}

	#[test]
	fn chain_levels_descend() {
		let ctx = test_context();
		assert_eq!(ctx.chain_length(), 3);
		for level in 0..3 {
			assert_eq!(ctx.poly_context(level).unwrap().modulus_count(), 3 - level);
		}
		assert!(ctx.poly_context(3).is_err());
		let top = ctx.top_context().clone();
		assert_eq!(ctx.level_of(&top).unwrap(), 0);
		let next = top.next().unwrap().clone();
		assert_eq!(ctx.level_of(&next).unwrap(), 1);
	}

	#[test]
	fn simd_map_is_a_permutation() {
		let ctx = test_context();
		let map = &ctx.simd_tables().unwrap().index_map;
		let mut seen = vec![false; 8];
		for &i in map {
			assert!(!seen[i]);
			seen[i] = true;
		}
	}

	#[test]
	fn scaled_plaintext_rounds_q_over_t() {
		let ctx = test_context();
		let poly = ctx.scale_plaintext(&[1, 2, 0, 16], 0).unwrap();
		let lifted = poly.to_biguint_coeffs().unwrap();
		let q = ctx.top_context().modulus();
		let t = BigUint::from(17u64);
		for (i, &m) in [1u64, 2, 0, 16].iter().enumerate() {
			let expected = (&q * m + BigUint::from(8u64)) / &t;
			assert_eq!(lifted[i], expected, "coefficient {i}");
		}
		assert!(lifted[4..].iter().all(|v| v == &BigUint::from(0u64)));
	}

	#[test]
	fn garner_residues_reconstruct() {
		let ctx = test_context();
		let top = ctx.top_context();
		let q = top.modulus();
		// sum_j (x mod q_j) * garner_j == x mod Q for a couple of values.
		for x in [5u64, 123456, 999999937] {
			let mut acc = BigUint::from(0u64);
			for (j, g) in top.garner().unwrap().iter().enumerate() {
				acc += g * (x % top.moduli()[j]);
			}
			assert_eq!(acc % &q, BigUint::from(x) % &q);
		}
	}
}
