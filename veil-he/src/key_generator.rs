//! Secret keys, key-switching keys and the evaluation key.
//!
//! A key-switching key from `s'` to `s` is a vector of `L` seeded
//! ciphertexts, one per RNS modulus: `K_j = (b_j, a_j)` with
//! `b_j = garner_j * s' + e_j - a_j * s (mod Q)`, where `garner_j` is the CRT
//! reconstruction coefficient `(Q/q_j) * [(Q/q_j)^-1]_{q_j}`. Decomposing a
//! polynomial into its residue rows and accumulating `sum_j c^(j) * K_j`
//! then moves it from `s'` to `s`, since `sum_j [c]_{q_j} * garner_j = c`.

use std::collections::BTreeMap;

use rand::{CryptoRng, RngCore, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::context::Context;
use crate::error::{Error, Result};
use crate::poly::{Poly, Representation};
use crate::rng::BlockRng;

/// A ternary secret key in evaluation form, exclusively owned by the client.
#[derive(Debug, Clone, PartialEq)]
pub struct SecretKey {
	pub(crate) poly: Poly,
}

impl SecretKey {
	/// The key polynomial, in evaluation form over the top context.
	pub fn poly(&self) -> &Poly {
		&self.poly
	}
}

impl Context {
	/// Samples a fresh ternary secret key from `rng`.
	pub fn generate_secret_key<R: RngCore + CryptoRng>(&self, rng: &mut R) -> Result<SecretKey> {
		let mut poly = Poly::random_ternary(self.top_context(), rng);
		poly.change_representation(Representation::Evaluation)?;
		Ok(SecretKey {
			poly,
		})
	}
}

/// Galois element arithmetic for the batching layout of the encoder.
pub struct GaloisElement;

impl GaloisElement {
	/// The generator of the column-rotation subgroup.
	const GENERATOR: u64 = 3;

	/// The element rotating the batched matrix columns right by `step`
	/// (negative steps rotate left). A zero net step yields the identity
	/// element 1.
	pub fn rotating_columns(step: i32, degree: usize) -> Result<u64> {
		if degree < 4 || !degree.is_power_of_two() {
			return Err(Error::InvalidParameter(format!(
				"degree {degree} does not support column rotation"
			)));
		}
		let row_size = (degree / 2) as i64;
		let s = (step as i64).rem_euclid(row_size) as u64;
		if s == 0 {
			return Ok(1);
		}
		let m = 2 * degree as u64;
		Ok(Self::pow_mod(Self::GENERATOR, row_size as u64 - s, m))
	}

	/// The element swapping the two matrix rows: `2N - 1`.
	pub fn swapping_rows(degree: usize) -> u64 {
		2 * degree as u64 - 1
	}

	/// The right-rotation step a Galois element realizes, if it lies in the
	/// column-rotation subgroup.
	pub(crate) fn step_of(element: u64, degree: usize) -> Option<i32> {
		let m = 2 * degree as u64;
		let row_size = (degree / 2) as u64;
		let mut acc = 1u64;
		for k in 0..row_size {
			if acc == element % m {
				return Some(((row_size - k) % row_size) as i32);
			}
			acc = (acc * Self::GENERATOR) % m;
		}
		None
	}

	fn pow_mod(base: u64, mut exp: u64, m: u64) -> u64 {
		let mut base = base % m;
		let mut acc = 1u64;
		while exp > 0 {
			if exp & 1 == 1 {
				acc = (acc * base) % m;
			}
			base = (base * base) % m;
			exp >>= 1;
		}
		acc
	}
}

/// How aggressively an expansion evaluation key is thinned.
///
/// Query expansion needs the Galois elements `2^e + 1`. `None` publishes one
/// key per needed element; `Hybrid` publishes every other one; `Max` only the
/// smallest that can still reach the rest by repeated application. A key
/// `2^e + 1` reaches `2^(e+1) + 1` by applying itself twice only when
/// `2e >= log2(2N)`, so every needed exponent below that threshold is always
/// published.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyCompression {
	/// Publish every needed Galois key.
	#[default]
	None,
	/// Publish every second key above the self-composition threshold.
	Hybrid,
	/// Publish only the smallest viable key above the threshold.
	Max,
}

/// What an evaluation key must contain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationKeyConfig {
	/// The Galois elements to publish keys for.
	pub galois_elements: Vec<u64>,
	/// Whether a relinearization key is published.
	pub has_relinearization_key: bool,
}

/// A key-switching key: `L` seeded ciphertexts over the top context.
#[derive(Debug, Clone, PartialEq)]
pub struct KeySwitchingKey {
	pub(crate) c0s: Vec<Poly>,
	pub(crate) c1s: Vec<Poly>,
	pub(crate) seed: [u8; 32],
}

impl KeySwitchingKey {
	/// Regenerates the `a_j` polynomials from a stored seed.
	pub(crate) fn expand_c1s(
		context: &Context,
		seed: [u8; 32],
		count: usize,
	) -> Result<Vec<Poly>> {
		let mut rng = BlockRng::from_seed(seed);
		Ok((0..count)
			.map(|_| Poly::random(context.top_context(), Representation::Evaluation, &mut rng))
			.collect())
	}

	/// Key-switches a coefficient-form polynomial over the top context,
	/// returning the `(c_0, c_1)` contribution in evaluation form.
	pub(crate) fn apply(&self, poly: &Poly) -> Result<(Poly, Poly)> {
		if poly.representation() != Representation::Coefficient {
			return Err(Error::InvalidContext(
				"key switching decomposes coefficient form".to_string(),
			));
		}
		let context = self.c0s[0].context();
		if poly.context() != context {
			return Err(Error::InvalidContext(
				"key-switching key and polynomial contexts differ".to_string(),
			));
		}
		let mut acc0 = Poly::zero(context, Representation::Evaluation);
		let mut acc1 = Poly::zero(context, Representation::Evaluation);
		for (j, (c0, c1)) in self.c0s.iter().zip(self.c1s.iter()).enumerate() {
			let mut part = Poly::from_residues(poly.row(j), context, Representation::Coefficient);
			part.change_representation(Representation::Evaluation)?;
			let mut t0 = part.clone();
			t0.mul_assign(c0);
			acc0.add_assign(&t0);
			part.mul_assign(c1);
			acc1.add_assign(&part);
		}
		Ok((acc0, acc1))
	}
}

/// The public material a client hands the evaluating party: Galois keys per
/// element and an optional relinearization key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EvaluationKey {
	pub(crate) galois: BTreeMap<u64, KeySwitchingKey>,
	pub(crate) relin: Option<KeySwitchingKey>,
}

impl EvaluationKey {
	/// The Galois elements keys are present for.
	pub fn galois_elements(&self) -> Vec<u64> {
		self.galois.keys().copied().collect()
	}

	/// The key for one Galois element.
	pub fn galois_key(&self, element: u64) -> Result<&KeySwitchingKey> {
		self.galois.get(&element).ok_or(Error::MissingGaloisKey {
			element,
		})
	}

	/// The relinearization key.
	pub fn relinearization_key(&self) -> Result<&KeySwitchingKey> {
		self.relin.as_ref().ok_or_else(|| {
			Error::InvalidParameter("evaluation key has no relinearization key".to_string())
		})
	}
}

/// Generates the secret key and everything derived from it.
pub struct KeyGenerator {
	context: Context,
	secret_key: SecretKey,
}

impl KeyGenerator {
	/// Creates a generator with a fresh secret key.
	pub fn new<R: RngCore + CryptoRng>(context: &Context, rng: &mut R) -> Result<Self> {
		let secret_key = context.generate_secret_key(rng)?;
		Ok(Self {
			context: context.clone(),
			secret_key,
		})
	}

	/// Creates a generator around an existing secret key.
	pub fn from_secret_key(context: &Context, secret_key: SecretKey) -> Self {
		Self {
			context: context.clone(),
			secret_key,
		}
	}

	/// The secret key.
	pub fn secret_key(&self) -> &SecretKey {
		&self.secret_key
	}

	/// Generates the evaluation key described by `config`.
	pub fn create_evaluation_key<R: RngCore + CryptoRng>(
		&self,
		config: &EvaluationKeyConfig,
		rng: &mut R,
	) -> Result<EvaluationKey> {
		if !self.context.params().supports_evaluation_key() {
			return Err(Error::InvalidParameter(
				"key switching needs at least two coefficient moduli".to_string(),
			));
		}
		let mut galois = BTreeMap::new();
		for &element in &config.galois_elements {
			galois.insert(element, self.create_galois_key(element, rng)?);
		}
		let relin = if config.has_relinearization_key {
			Some(self.create_relinearization_key(rng)?)
		} else {
			None
		};
		Ok(EvaluationKey {
			galois,
			relin,
		})
	}

	/// Key for `s(x^g) -> s`.
	fn create_galois_key<R: RngCore + CryptoRng>(
		&self,
		element: u64,
		rng: &mut R,
	) -> Result<KeySwitchingKey> {
		let source = self.secret_key.poly.apply_galois(element)?;
		self.create_key_switching_key(&source, rng)
	}

	/// Key for `s^2 -> s`.
	fn create_relinearization_key<R: RngCore + CryptoRng>(
		&self,
		rng: &mut R,
	) -> Result<KeySwitchingKey> {
		let mut source = self.secret_key.poly.clone();
		source.mul_assign(&self.secret_key.poly);
		self.create_key_switching_key(&source, rng)
	}

	/// Key from an arbitrary source secret `s'` (in evaluation form) to `s`.
	fn create_key_switching_key<R: RngCore + CryptoRng>(
		&self,
		source: &Poly,
		rng: &mut R,
	) -> Result<KeySwitchingKey> {
		let top = self.context.top_context();
		let count = top.modulus_count();
		let mut seed = [0u8; 32];
		rng.fill_bytes(&mut seed);
		let c1s = KeySwitchingKey::expand_c1s(&self.context, seed, count)?;
		let garner = self.context.garner_rns();
		let mut c0s = Vec::with_capacity(count);
		for (j, c1) in c1s.iter().enumerate() {
			let mut b = source.clone();
			b.scalar_mul_rns_assign(&garner[j]);
			let mut e = Poly::random_cbd(top, rng);
			e.change_representation(Representation::Evaluation)?;
			b.add_assign(&e);
			let mut a_s = c1.clone();
			a_s.mul_assign(&self.secret_key.poly);
			b.sub_assign(&a_s);
			c0s.push(b);
		}
		Ok(KeySwitchingKey {
			c0s,
			c1s,
			seed,
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::parameters::{EncryptionParametersBuilder, SecurityLevel};
	use rand::thread_rng;

	fn test_context() -> Context {
		let params = EncryptionParametersBuilder::new()
			.set_poly_degree(16)
			.set_plaintext_modulus(97)
			.set_coefficient_moduli_sizes(&[30, 30, 30])
			.set_security_level(SecurityLevel::Unchecked)
			.build()
			.unwrap();
		Context::new(&params).unwrap()
	}

	#[test]
	fn secret_key_is_ternary() {
		let ctx = test_context();
		let mut sk = ctx.generate_secret_key(&mut thread_rng()).unwrap().poly;
		sk.change_representation(Representation::Coefficient).unwrap();
		let q0 = ctx.top_context().moduli()[0];
		for &c in sk.row(0) {
			assert!(c == 0 || c == 1 || c == q0 - 1);
		}
	}

	#[test]
	fn rotation_elements_invert() {
		let degree = 16;
		let m = 2 * degree as u64;
		for step in 1..(degree / 2) as i32 {
			let fwd = GaloisElement::rotating_columns(step, degree).unwrap();
			let back =
				GaloisElement::rotating_columns((degree / 2) as i32 - step, degree).unwrap();
			assert_eq!((fwd * back) % m, 1, "step {step}");
			assert_eq!(GaloisElement::step_of(fwd, degree), Some(step));
		}
		assert_eq!(GaloisElement::rotating_columns(0, 16).unwrap(), 1);
		let swap = GaloisElement::swapping_rows(16);
		assert_eq!(swap, 31);
		assert_eq!((swap * swap) % m, 1);
	}

	#[test]
	fn key_switching_moves_between_secrets() {
		let ctx = test_context();
		let mut rng = thread_rng();
		let generator = KeyGenerator::new(&ctx, &mut rng).unwrap();
		let sk = generator.secret_key();
		let top = ctx.top_context();

		// Switch a random polynomial from a random "source secret" s' to s.
		let mut source = Poly::random_ternary(top, &mut rng);
		source
			.change_representation(Representation::Evaluation)
			.unwrap();
		let ksk = generator.create_key_switching_key(&source, &mut rng).unwrap();

		let c = Poly::random(top, Representation::Coefficient, &mut rng);
		let (d0, d1) = ksk.apply(&c).unwrap();

		// d0 + d1*s should equal c*s' up to the switching noise.
		let mut lhs = d1.clone();
		lhs.mul_assign(&sk.poly);
		lhs.add_assign(&d0);
		let mut rhs = c.clone();
		rhs.change_representation(Representation::Evaluation).unwrap();
		rhs.mul_assign(&source);
		lhs.sub_assign(&rhs);
		lhs.change_representation(Representation::Coefficient).unwrap();

		let q = top.modulus();
		for v in lhs.to_centered_bigint_coeffs().unwrap() {
			// Noise bound: L residues of up to 30 bits, error magnitude <= 20,
			// convolved over N = 16 coefficients.
			assert!(v.magnitude().bits() <= 45, "noise too large: {v} (Q = {q})");
		}
	}

	#[test]
	fn evaluation_key_lookup() {
		let ctx = test_context();
		let mut rng = thread_rng();
		let generator = KeyGenerator::new(&ctx, &mut rng).unwrap();
		let config = EvaluationKeyConfig {
			galois_elements: vec![3, 9],
			has_relinearization_key: true,
		};
		let evk = generator.create_evaluation_key(&config, &mut rng).unwrap();
		assert_eq!(evk.galois_elements(), vec![3, 9]);
		assert!(evk.galois_key(3).is_ok());
		assert!(matches!(
			evk.galois_key(5).unwrap_err(),
			Error::MissingGaloisKey { element: 5 }
		));
		assert!(evk.relinearization_key().is_ok());
	}

	#[test]
	fn seeded_c1s_regenerate() {
		let ctx = test_context();
		let mut rng = thread_rng();
		let generator = KeyGenerator::new(&ctx, &mut rng).unwrap();
		let config = EvaluationKeyConfig {
			galois_elements: vec![3],
			has_relinearization_key: false,
		};
		let evk = generator.create_evaluation_key(&config, &mut rng).unwrap();
		let ksk = evk.galois_key(3).unwrap();
		let expanded =
			KeySwitchingKey::expand_c1s(&ctx, ksk.seed, ksk.c1s.len()).unwrap();
		assert_eq!(expanded, ksk.c1s);
	}
}
