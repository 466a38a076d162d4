//! Negacyclic number-theoretic transform.
//!
//! A length-`N` transform over `Z_p[x]/(x^N+1)` needs a primitive `2N`-th root
//! of unity `psi` modulo `p`, which exists exactly when `p ≡ 1 (mod 2N)`. The
//! forward transform maps coefficients in standard order to evaluations in
//! bit-reversed order; the evaluation stored at index `j` is the value of the
//! polynomial at `psi^(2*bitrev(j)+1)`. Pointwise multiplication of two
//! transformed polynomials therefore realizes negacyclic convolution.

use crate::error::{Error, Result};
use crate::zq::Modulus;

/// Precomputed transform tables for one (modulus, degree) pair.
#[derive(Debug, Clone)]
pub struct NttOperator {
	modulus: Modulus,
	degree: usize,
	log_degree: u32,
	psi_powers_bitrev: Vec<u64>,
	inv_psi_powers_bitrev: Vec<u64>,
	degree_inv: u64,
}

/// Reverses the low `bits` bits of `x`.
#[inline]
pub(crate) fn bit_reverse(x: usize, bits: u32) -> usize {
	x.reverse_bits() >> (usize::BITS - bits)
}

impl NttOperator {
	/// Builds the operator, or fails with [`Error::InvalidParameter`] when the
	/// modulus does not support a degree-`degree` negacyclic transform.
	pub fn new(modulus: &Modulus, degree: usize) -> Result<Self> {
		if !degree.is_power_of_two() || degree < 2 {
			return Err(Error::InvalidParameter(format!(
				"ntt degree {degree} is not a power of two >= 2"
			)));
		}
		let p = modulus.value();
		let m = 2 * degree as u64;
		if (p - 1) % m != 0 {
			return Err(Error::InvalidParameter(format!(
				"modulus {p} is not congruent to 1 mod {m}"
			)));
		}
		let psi = Self::find_primitive_root(modulus, degree)?;
		let psi_inv = modulus
			.inverse_vartime(psi)
			.ok_or_else(|| Error::InvalidParameter(format!("{psi} has no inverse mod {p}")))?;
		let log_degree = degree.trailing_zeros();
		let mut psi_powers_bitrev = vec![0u64; degree];
		let mut inv_psi_powers_bitrev = vec![0u64; degree];
		let mut power = 1u64;
		let mut inv_power = 1u64;
		for i in 0..degree {
			let r = bit_reverse(i, log_degree);
			psi_powers_bitrev[r] = power;
			inv_psi_powers_bitrev[r] = inv_power;
			power = modulus.mul(power, psi);
			inv_power = modulus.mul(inv_power, psi_inv);
		}
		let degree_inv = modulus
			.inverse_vartime(degree as u64)
			.ok_or_else(|| Error::InvalidParameter(format!("{degree} has no inverse mod {p}")))?;
		Ok(Self {
			modulus: modulus.clone(),
			degree,
			log_degree,
			psi_powers_bitrev,
			inv_psi_powers_bitrev,
			degree_inv,
		})
	}

	/// Deterministic walk to the first base whose `(p-1)/2N`-th power is a
	/// primitive `2N`-th root of unity.
	fn find_primitive_root(modulus: &Modulus, degree: usize) -> Result<u64> {
		let p = modulus.value();
		let exponent = (p - 1) / (2 * degree as u64);
		for base in 2..p {
			let psi = modulus.pow_vartime(base, exponent);
			// For 2N a power of two, psi^N == -1 pins the order at exactly 2N.
			if modulus.pow_vartime(psi, degree as u64) == p - 1 {
				return Ok(psi);
			}
		}
		Err(Error::InvalidParameter(format!(
			"no primitive root of order {} mod {p}",
			2 * degree
		)))
	}

	/// The transform degree.
	pub fn degree(&self) -> usize {
		self.degree
	}

	/// Base-2 logarithm of the degree.
	pub fn log_degree(&self) -> u32 {
		self.log_degree
	}

	/// In-place forward transform: coefficients to evaluations.
	pub fn forward(&self, a: &mut [u64]) {
		debug_assert_eq!(a.len(), self.degree);
		let n = self.degree;
		let mut t = n;
		let mut m = 1;
		while m < n {
			t >>= 1;
			for i in 0..m {
				let j1 = 2 * i * t;
				let s = self.psi_powers_bitrev[m + i];
				for j in j1..j1 + t {
					let u = a[j];
					let v = self.modulus.mul(a[j + t], s);
					a[j] = self.modulus.add(u, v);
					a[j + t] = self.modulus.sub(u, v);
				}
			}
			m <<= 1;
		}
	}

	/// In-place inverse transform: evaluations to coefficients.
	pub fn inverse(&self, a: &mut [u64]) {
		debug_assert_eq!(a.len(), self.degree);
		let n = self.degree;
		let mut t = 1;
		let mut m = n;
		while m > 1 {
			let h = m >> 1;
			let mut j1 = 0;
			for i in 0..h {
				let s = self.inv_psi_powers_bitrev[h + i];
				for j in j1..j1 + t {
					let u = a[j];
					let v = a[j + t];
					a[j] = self.modulus.add(u, v);
					a[j + t] = self.modulus.mul(self.modulus.sub(u, v), s);
				}
				j1 += 2 * t;
			}
			t <<= 1;
			m = h;
		}
		for x in a.iter_mut() {
			*x = self.modulus.mul(*x, self.degree_inv);
		}
	}

	/// Applies the Galois automorphism `x -> x^g` directly on evaluations.
	///
	/// Evaluation slot `j` holds the value at root exponent `2*bitrev(j)+1`,
	/// so the automorphism is a pure permutation of slots: the slot at
	/// exponent `e` reads from the slot at exponent `e*g mod 2N`.
	pub fn galois_permutation(&self, a: &[u64], g: u64, out: &mut [u64]) {
		debug_assert_eq!(a.len(), self.degree);
		debug_assert_eq!(out.len(), self.degree);
		debug_assert_eq!(g % 2, 1);
		let n = self.degree;
		let m = 2 * n as u64;
		for (i, slot) in out.iter_mut().enumerate() {
			let e = 2 * bit_reverse(i, self.log_degree) as u64 + 1;
			let src_e = (e * (g % m)) % m;
			let src = bit_reverse(((src_e - 1) / 2) as usize, self.log_degree);
			*slot = a[src];
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::zq::generate_primes;

	fn operator(bits: usize, degree: usize) -> NttOperator {
		let p = generate_primes(&[bits], false, Some(degree)).unwrap()[0];
		NttOperator::new(&Modulus::new(p).unwrap(), degree).unwrap()
	}

	/// Schoolbook negacyclic product for cross-checking.
	fn negacyclic_mul(a: &[u64], b: &[u64], modulus: &Modulus) -> Vec<u64> {
		let n = a.len();
		let mut out = vec![0u64; n];
		for i in 0..n {
			for j in 0..n {
				let prod = modulus.mul(a[i], b[j]);
				let k = i + j;
				if k < n {
					out[k] = modulus.add(out[k], prod);
				} else {
					out[k - n] = modulus.sub(out[k - n], prod);
				}
			}
		}
		out
	}

	#[test]
	fn roundtrip_identity() {
		for degree in [8usize, 32, 256] {
			let op = operator(30, degree);
			let original: Vec<u64> = (0..degree as u64).map(|i| i * i + 7).collect();
			let mut a = original.clone();
			op.forward(&mut a);
			op.inverse(&mut a);
			assert_eq!(a, original);
			op.inverse(&mut a);
			op.forward(&mut a);
			assert_eq!(a, original);
		}
	}

	#[test]
	fn forward_is_additive() {
		let op = operator(30, 16);
		let m = Modulus::new(generate_primes(&[30], false, Some(16)).unwrap()[0]).unwrap();
		let a: Vec<u64> = (0..16u64).map(|i| i * 31 + 5).collect();
		let b: Vec<u64> = (0..16u64).map(|i| i * 17 + 1).collect();
		let mut sum = a.clone();
		m.add_vec(&mut sum, &b);
		op.forward(&mut sum);
		let (mut fa, mut fb) = (a, b);
		op.forward(&mut fa);
		op.forward(&mut fb);
		m.add_vec(&mut fa, &fb);
		assert_eq!(sum, fa);
	}

	#[test]
	fn pointwise_matches_schoolbook() {
		let degree = 8;
		let p = generate_primes(&[18], false, Some(degree)).unwrap()[0];
		let m = Modulus::new(p).unwrap();
		let op = NttOperator::new(&m, degree).unwrap();
		let a: Vec<u64> = vec![1, 2, 3, 4, 5, 6, 7, 8];
		let b: Vec<u64> = vec![8, 1, 6, 3, 5, 9, 2, 7];
		let expected = negacyclic_mul(&a, &b, &m);
		let (mut fa, mut fb) = (a, b);
		op.forward(&mut fa);
		op.forward(&mut fb);
		m.mul_vec(&mut fa, &fb);
		op.inverse(&mut fa);
		assert_eq!(fa, expected);
	}

	#[test]
	fn galois_permutation_matches_coefficient_automorphism() {
		let degree = 16usize;
		let p = generate_primes(&[20], false, Some(degree)).unwrap()[0];
		let m = Modulus::new(p).unwrap();
		let op = NttOperator::new(&m, degree).unwrap();
		let coeffs: Vec<u64> = (0..degree as u64).map(|i| i * 13 + 2).collect();
		for g in [3u64, 5, 9, 31] {
			// Coefficient-domain automorphism.
			let mut expected = vec![0u64; degree];
			for (i, &c) in coeffs.iter().enumerate() {
				let raw = (i as u64 * g) % (2 * degree as u64);
				if raw < degree as u64 {
					expected[raw as usize] = m.add(expected[raw as usize], c);
				} else {
					expected[(raw - degree as u64) as usize] =
						m.sub(expected[(raw - degree as u64) as usize], c);
				}
			}
			// Evaluation-domain permutation.
			let mut eval = coeffs.clone();
			op.forward(&mut eval);
			let mut permuted = vec![0u64; degree];
			op.galois_permutation(&eval, g, &mut permuted);
			op.inverse(&mut permuted);
			assert_eq!(permuted, expected, "galois element {g}");
		}
	}

	#[test]
	fn rejects_unfriendly_modulus() {
		// 19 is prime but 18 is not divisible by 16.
		let m = Modulus::new(19).unwrap();
		assert!(NttOperator::new(&m, 8).is_err());
	}
}
