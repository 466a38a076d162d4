//! Homomorphic evaluation.
//!
//! All ciphertext arithmetic goes through an evaluator bound to a context.
//! Additions and plaintext operations stay in RNS form. Ciphertext-ciphertext
//! multiplication computes the schoolbook tensor over the exact CRT lift and
//! scales by `t/Q` with rounding, trading speed for exactness; the hot PIR
//! paths (expansion, plaintext products) never leave RNS. Automorphisms and
//! relinearization consume the evaluation key generated by
//! [`crate::KeyGenerator`].

use num_bigint::BigInt;
use num_traits::{Signed, Zero};

use crate::ciphertext::Ciphertext;
use crate::context::Context;
use crate::error::{Error, Result};
use crate::key_generator::{EvaluationKey, GaloisElement, KeySwitchingKey};
use crate::plaintext::Plaintext;
use crate::poly::{Poly, Representation};

/// The operations an evaluator provides over one scheme.
pub trait Evaluator {
	/// The plaintext type operations consume.
	type Plaintext;
	/// The ciphertext type operations consume.
	type Ciphertext;

	/// Negates a ciphertext.
	fn negate(&self, a: &Self::Ciphertext) -> Result<Self::Ciphertext>;

	/// Adds two ciphertexts.
	fn add(&self, a: &Self::Ciphertext, b: &Self::Ciphertext) -> Result<Self::Ciphertext>;

	/// Adds `b` into `a`.
	fn add_inplace(&self, a: &mut Self::Ciphertext, b: &Self::Ciphertext) -> Result<()>;

	/// Sums a non-empty slice of ciphertexts.
	fn add_many(&self, a: &[Self::Ciphertext]) -> Result<Self::Ciphertext>;

	/// Subtracts `b` from `a`.
	fn sub(&self, a: &Self::Ciphertext, b: &Self::Ciphertext) -> Result<Self::Ciphertext>;

	/// Subtracts `b` from `a` in place.
	fn sub_inplace(&self, a: &mut Self::Ciphertext, b: &Self::Ciphertext) -> Result<()>;

	/// Adds a plaintext to a ciphertext.
	fn add_plain(&self, a: &Self::Ciphertext, b: &Self::Plaintext) -> Result<Self::Ciphertext>;

	/// Subtracts a plaintext from a ciphertext.
	fn sub_plain(&self, a: &Self::Ciphertext, b: &Self::Plaintext) -> Result<Self::Ciphertext>;

	/// Multiplies a ciphertext by a plaintext.
	fn multiply_plain(
		&self,
		a: &Self::Ciphertext,
		b: &Self::Plaintext,
	) -> Result<Self::Ciphertext>;

	/// Multiplies two ciphertexts; the result grows to `k + k' - 1`
	/// polynomials.
	fn multiply(&self, a: &Self::Ciphertext, b: &Self::Ciphertext) -> Result<Self::Ciphertext>;

	/// Folds a three-polynomial product back to two using the
	/// relinearization key.
	fn relinearize(
		&self,
		a: &Self::Ciphertext,
		evaluation_key: &EvaluationKey,
	) -> Result<Self::Ciphertext>;

	/// Drops the last RNS modulus, rescaling the ciphertext.
	fn mod_switch_to_next(&self, a: &Self::Ciphertext) -> Result<Self::Ciphertext>;

	/// Rotates the batched matrix columns right by `step` (left for negative
	/// steps).
	fn rotate_columns(
		&self,
		a: &Self::Ciphertext,
		step: i32,
		evaluation_key: &EvaluationKey,
	) -> Result<Self::Ciphertext>;

	/// Swaps the two rows of the batched matrix.
	fn swap_rows(
		&self,
		a: &Self::Ciphertext,
		evaluation_key: &EvaluationKey,
	) -> Result<Self::Ciphertext>;
}

/// The BFV evaluator.
pub struct BfvEvaluator {
	context: Context,
}

impl BfvEvaluator {
	/// Creates an evaluator over `context`.
	pub fn new(context: &Context) -> Self {
		Self {
			context: context.clone(),
		}
	}

	fn check_same_context(&self, a: &Ciphertext, b: &Ciphertext) -> Result<()> {
		if a.context() != b.context() {
			return Err(Error::InvalidContext(
				"ciphertexts live under different contexts".to_string(),
			));
		}
		Ok(())
	}

	/// Cross-multiplies both operands so their correction factors agree.
	fn align_correction_factors(&self, a: &mut Ciphertext, b: &mut Ciphertext) -> Result<()> {
		let (fa, fb) = (a.correction_factor(), b.correction_factor());
		if fa == fb {
			return Ok(());
		}
		let plain = self.context.plain_modulus();
		for poly in a.polys_mut()? {
			poly.scalar_mul_assign(fb);
		}
		for poly in b.polys_mut()? {
			poly.scalar_mul_assign(fa);
		}
		let f = plain.mul(plain.reduce(fa), plain.reduce(fb));
		a.set_correction_factor(f);
		b.set_correction_factor(f);
		Ok(())
	}

	/// Plaintext values pre-multiplied by the ciphertext's correction factor,
	/// so plain operands track the scaled message.
	fn corrected_values(&self, plaintext: &Plaintext, factor: u64) -> Result<Vec<u64>> {
		let values = plaintext.values()?;
		if factor == 1 {
			return Ok(values.to_vec());
		}
		let plain = self.context.plain_modulus();
		Ok(values.iter().map(|&m| plain.mul(m, factor)).collect())
	}

	fn add_sub_inplace(&self, a: &mut Ciphertext, b: &Ciphertext, subtract: bool) -> Result<()> {
		self.check_same_context(a, b)?;
		a.materialize()?;
		let mut b = b.clone();
		b.materialize()?;
		b.change_representation(a.representation())?;
		self.align_correction_factors(a, &mut b)?;
		let context = a.context().clone();
		let representation = a.representation();
		let a_polys = a.polys_mut()?;
		while a_polys.len() < b.polys()?.len() {
			a_polys.push(Poly::zero(&context, representation));
		}
		for (x, y) in a_polys.iter_mut().zip(b.polys()?.iter()) {
			if subtract {
				x.sub_assign(y);
			} else {
				x.add_assign(y);
			}
		}
		Ok(())
	}

	fn add_sub_plain(
		&self,
		a: &Ciphertext,
		b: &Plaintext,
		subtract: bool,
	) -> Result<Ciphertext> {
		let mut out = a.clone();
		out.materialize()?;
		let level = self.context.level_of(out.context())?;
		let values = self.corrected_values(b, out.correction_factor())?;
		let mut scaled = self.context.scale_plaintext(&values, level)?;
		scaled.change_representation(out.representation())?;
		if subtract {
			out.polys_mut()?[0].sub_assign(&scaled);
		} else {
			out.polys_mut()?[0].add_assign(&scaled);
		}
		Ok(out)
	}

	/// Negacyclic convolution over exact integers.
	fn negacyclic_convolve(x: &[BigInt], y: &[BigInt]) -> Vec<BigInt> {
		let n = x.len();
		let mut out = vec![BigInt::zero(); n];
		for (i, xi) in x.iter().enumerate() {
			if xi.is_zero() {
				continue;
			}
			for (j, yj) in y.iter().enumerate() {
				let k = i + j;
				if k < n {
					out[k] += xi * yj;
				} else {
					out[k - n] -= xi * yj;
				}
			}
		}
		out
	}

	/// `round(a / d)` for positive `d`, rounding half away from zero upward.
	fn round_div(a: &BigInt, d: &BigInt) -> BigInt {
		let num = (a << 1) + d;
		let den = d << 1;
		let q = &num / &den;
		let r: BigInt = &num % &den;
		if r.is_negative() {
			q - 1
		} else {
			q
		}
	}

	/// Applies one Galois element and key-switches the mask back under `s`.
	fn apply_galois_once(
		&self,
		a: &Ciphertext,
		element: u64,
		key: &KeySwitchingKey,
	) -> Result<Ciphertext> {
		let mut ct = a.clone();
		ct.materialize()?;
		ct.change_representation(Representation::Coefficient)?;
		if ct.polys()?.len() != 2 {
			return Err(Error::InvalidParameter(
				"automorphisms require a two-polynomial ciphertext; relinearize first".to_string(),
			));
		}
		let c0 = ct.polys()?[0].apply_galois(element)?;
		let c1 = ct.polys()?[1].apply_galois(element)?;
		let (mut d0, mut d1) = key.apply(&c1)?;
		d0.change_representation(Representation::Coefficient)?;
		d1.change_representation(Representation::Coefficient)?;
		d0.add_assign(&c0);
		Ok(Ciphertext::new(vec![d0, d1], a.correction_factor()))
	}

	/// A sequence of keyed elements whose composition realizes `element`:
	/// either the element itself, or the largest available element no bigger
	/// than it applied repeatedly until the accumulated exponent matches.
	fn galois_chain(&self, element: u64, evaluation_key: &EvaluationKey) -> Result<Vec<u64>> {
		if evaluation_key.galois.contains_key(&element) {
			return Ok(vec![element]);
		}
		let degree = self.context.params().poly_degree() as u64;
		let m = 2 * degree;
		let mut candidates: Vec<u64> = evaluation_key
			.galois
			.keys()
			.copied()
			.filter(|&g| g <= element)
			.collect();
		candidates.sort_unstable_by(|a, b| b.cmp(a));
		for g in candidates {
			let mut acc = 1u64;
			let mut chain = Vec::new();
			for _ in 0..degree.max(2) {
				acc = (acc * g) % m;
				chain.push(g);
				if acc == element {
					return Ok(chain);
				}
			}
		}
		Err(Error::MissingGaloisKey {
			element,
		})
	}

	/// Applies the automorphism `x -> x^element` to a ciphertext, composing
	/// keys when the element has no dedicated key.
	pub fn apply_galois(
		&self,
		a: &Ciphertext,
		element: u64,
		evaluation_key: &EvaluationKey,
	) -> Result<Ciphertext> {
		if element == 1 {
			return Ok(a.clone());
		}
		let representation = a.representation();
		let chain = self.galois_chain(element, evaluation_key)?;
		let mut ct = a.clone();
		for g in chain {
			let key = evaluation_key.galois_key(g)?;
			ct = self.apply_galois_once(&ct, g, key)?;
		}
		ct.change_representation(representation)?;
		Ok(ct)
	}

	/// Multiplies every ciphertext polynomial by `x^k`; `k` may be negative.
	pub fn multiply_power_of_x(&self, a: &Ciphertext, k: i64) -> Result<Ciphertext> {
		let mut ct = a.clone();
		ct.materialize()?;
		let representation = ct.representation();
		ct.change_representation(Representation::Coefficient)?;
		let mut polys = Vec::with_capacity(ct.polys()?.len());
		for poly in ct.polys()? {
			polys.push(poly.multiply_power_of_x(k)?);
		}
		let mut out = Ciphertext::new(polys, ct.correction_factor());
		out.change_representation(representation)?;
		Ok(out)
	}

	/// Repeatedly drops the last modulus until a single one remains.
	pub fn mod_switch_down_to_single(&self, a: &Ciphertext) -> Result<Ciphertext> {
		let mut ct = a.clone();
		while ct.context().modulus_count() > 1 {
			ct = self.mod_switch_to_next(&ct)?;
		}
		Ok(ct)
	}
}

impl Evaluator for BfvEvaluator {
	type Plaintext = Plaintext;
	type Ciphertext = Ciphertext;

	fn negate(&self, a: &Ciphertext) -> Result<Ciphertext> {
		let mut out = a.clone();
		out.materialize()?;
		for poly in out.polys_mut()? {
			poly.neg_assign();
		}
		Ok(out)
	}

	fn add(&self, a: &Ciphertext, b: &Ciphertext) -> Result<Ciphertext> {
		let mut out = a.clone();
		self.add_inplace(&mut out, b)?;
		Ok(out)
	}

	fn add_inplace(&self, a: &mut Ciphertext, b: &Ciphertext) -> Result<()> {
		self.add_sub_inplace(a, b, false)
	}

	fn add_many(&self, a: &[Ciphertext]) -> Result<Ciphertext> {
		let (first, rest) = a.split_first().ok_or_else(|| {
			Error::InvalidParameter("cannot sum an empty ciphertext slice".to_string())
		})?;
		let mut acc = first.clone();
		for ct in rest {
			self.add_inplace(&mut acc, ct)?;
		}
		Ok(acc)
	}

	fn sub(&self, a: &Ciphertext, b: &Ciphertext) -> Result<Ciphertext> {
		let mut out = a.clone();
		self.sub_inplace(&mut out, b)?;
		Ok(out)
	}

	fn sub_inplace(&self, a: &mut Ciphertext, b: &Ciphertext) -> Result<()> {
		self.add_sub_inplace(a, b, true)
	}

	fn add_plain(&self, a: &Ciphertext, b: &Plaintext) -> Result<Ciphertext> {
		self.add_sub_plain(a, b, false)
	}

	fn sub_plain(&self, a: &Ciphertext, b: &Plaintext) -> Result<Ciphertext> {
		self.add_sub_plain(a, b, true)
	}

	fn multiply_plain(&self, a: &Ciphertext, b: &Plaintext) -> Result<Ciphertext> {
		let mut out = a.clone();
		out.materialize()?;
		out.change_representation(Representation::Evaluation)?;
		let eval_plain;
		let operand = if b.representation() == Representation::Evaluation {
			if b.poly().context() != out.context() {
				return Err(Error::InvalidContext(
					"plaintext evaluations live under a different context".to_string(),
				));
			}
			b
		} else {
			let level = self.context.level_of(out.context())?;
			eval_plain = b.to_evaluation(&self.context, level)?;
			&eval_plain
		};
		for poly in out.polys_mut()? {
			poly.mul_assign(operand.poly());
		}
		Ok(out)
	}

	fn multiply(&self, a: &Ciphertext, b: &Ciphertext) -> Result<Ciphertext> {
		self.check_same_context(a, b)?;
		let mut a = a.clone();
		let mut b = b.clone();
		a.materialize()?;
		b.materialize()?;
		a.change_representation(Representation::Coefficient)?;
		b.change_representation(Representation::Coefficient)?;
		let context = a.context().clone();
		let q = BigInt::from(context.modulus());
		let t = BigInt::from(self.context.params().plaintext_modulus());

		let lift = |ct: &Ciphertext| -> Result<Vec<Vec<BigInt>>> {
			ct.polys()?
				.iter()
				.map(Poly::to_centered_bigint_coeffs)
				.collect()
		};
		let a_lift = lift(&a)?;
		let b_lift = lift(&b)?;

		let out_len = a_lift.len() + b_lift.len() - 1;
		let degree = context.degree();
		let mut tensor = vec![vec![BigInt::zero(); degree]; out_len];
		for (i, ai) in a_lift.iter().enumerate() {
			for (j, bj) in b_lift.iter().enumerate() {
				let product = Self::negacyclic_convolve(ai, bj);
				for (acc, v) in tensor[i + j].iter_mut().zip(product) {
					*acc += v;
				}
			}
		}

		let mut polys = Vec::with_capacity(out_len);
		for row in tensor {
			let scaled: Vec<BigInt> =
				row.into_iter().map(|c| Self::round_div(&(c * &t), &q)).collect();
			polys.push(Poly::try_from_bigint_coeffs(
				&scaled,
				&context,
				Representation::Coefficient,
			)?);
		}
		let plain = self.context.plain_modulus();
		let factor = plain.mul(
			plain.reduce(a.correction_factor()),
			plain.reduce(b.correction_factor()),
		);
		Ok(Ciphertext::new(polys, factor))
	}

	fn relinearize(&self, a: &Ciphertext, evaluation_key: &EvaluationKey) -> Result<Ciphertext> {
		let mut ct = a.clone();
		ct.materialize()?;
		let representation = ct.representation();
		ct.change_representation(Representation::Coefficient)?;
		if ct.polys()?.len() != 3 {
			return Err(Error::InvalidParameter(format!(
				"relinearization expects 3 polynomials, found {}",
				ct.polys()?.len()
			)));
		}
		let key = evaluation_key.relinearization_key()?;
		let (mut d0, mut d1) = key.apply(&ct.polys()?[2])?;
		d0.change_representation(Representation::Coefficient)?;
		d1.change_representation(Representation::Coefficient)?;
		d0.add_assign(&ct.polys()?[0]);
		d1.add_assign(&ct.polys()?[1]);
		let mut out = Ciphertext::new(vec![d0, d1], ct.correction_factor());
		out.change_representation(representation)?;
		Ok(out)
	}

	fn mod_switch_to_next(&self, a: &Ciphertext) -> Result<Ciphertext> {
		let mut ct = a.clone();
		ct.materialize()?;
		let representation = ct.representation();
		ct.change_representation(Representation::Coefficient)?;
		let context = ct.context().clone();
		let count = context.modulus_count();
		if count < 2 {
			return Err(Error::InvalidContext(
				"cannot mod-switch past the last modulus".to_string(),
			));
		}
		let level = self.context.level_of(&context)?;
		let inv_last = self.context.inv_last_rns(level).to_vec();
		let q_last = context.moduli()[count - 1];
		let half = q_last / 2;
		let mut polys = Vec::with_capacity(ct.polys()?.len());
		for poly in ct.polys()? {
			let last_row = poly.row(count - 1).to_vec();
			let mut switched = poly.clone();
			for (i, op) in context.moduli_ops()[..count - 1].iter().enumerate() {
				let q_last_mod = op.reduce(q_last);
				let row = switched.row_mut(i);
				for (slot, &d) in row.iter_mut().zip(last_row.iter()) {
					// Subtract the centered last residue, leaving an exact
					// multiple of q_last, then divide it out.
					let mut v = op.sub(*slot, op.reduce(d));
					if d > half {
						v = op.add(v, q_last_mod);
					}
					*slot = op.mul(v, inv_last[i]);
				}
			}
			switched.remove_last_moduli(1)?;
			polys.push(switched);
		}
		let mut out = Ciphertext::new(polys, ct.correction_factor());
		out.change_representation(representation)?;
		Ok(out)
	}

	fn rotate_columns(
		&self,
		a: &Ciphertext,
		step: i32,
		evaluation_key: &EvaluationKey,
	) -> Result<Ciphertext> {
		let degree = self.context.params().poly_degree();
		let row_size = (degree / 2) as i64;
		let mut remaining = (step as i64).rem_euclid(row_size);
		if remaining == 0 {
			return Ok(a.clone());
		}
		// Right-rotation steps realizable from the published keys.
		let mut supported: Vec<i64> = evaluation_key
			.galois
			.keys()
			.filter_map(|&g| GaloisElement::step_of(g, degree))
			.map(i64::from)
			.filter(|&s| s > 0)
			.collect();
		supported.sort_unstable();
		if supported.is_empty() {
			return Err(Error::MissingGaloisKey {
				element: GaloisElement::rotating_columns(step, degree)?,
			});
		}
		let mut ct = a.clone();
		// Greedy decomposition: take the largest step that fits, wrapping
		// through the row size when every supported step overshoots.
		for _ in 0..64 {
			if remaining == 0 {
				return Ok(ct);
			}
			let next = supported
				.iter()
				.copied()
				.filter(|&s| s <= remaining)
				.next_back()
				.unwrap_or(supported[0]);
			let element = GaloisElement::rotating_columns(next as i32, degree)?;
			ct = self.apply_galois(&ct, element, evaluation_key)?;
			remaining = (remaining - next).rem_euclid(row_size);
		}
		Err(Error::MissingGaloisKey {
			element: GaloisElement::rotating_columns(remaining as i32, degree)?,
		})
	}

	fn swap_rows(&self, a: &Ciphertext, evaluation_key: &EvaluationKey) -> Result<Ciphertext> {
		let element = GaloisElement::swapping_rows(self.context.params().poly_degree());
		self.apply_galois(a, element, evaluation_key)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::decryptor::Decryptor;
	use crate::encoder::{EncodeFormat, Encoder};
	use crate::encryptor::SymmetricEncryptor;
	use crate::key_generator::{EvaluationKeyConfig, KeyGenerator};
	use crate::parameters::{EncryptionParametersBuilder, SecurityLevel};
	use rand::thread_rng;

	struct Fixture {
		encoder: Encoder,
		encryptor: SymmetricEncryptor,
		decryptor: Decryptor,
		evaluator: BfvEvaluator,
		generator: KeyGenerator,
	}

	fn fixture() -> Fixture {
		let params = EncryptionParametersBuilder::new()
			.set_poly_degree(8)
			.set_plaintext_modulus(17)
			.set_coefficient_moduli_sizes(&[18, 18, 18, 18, 18])
			.set_security_level(SecurityLevel::Unchecked)
			.build()
			.unwrap();
		let context = Context::new(&params).unwrap();
		let generator = KeyGenerator::new(&context, &mut thread_rng()).unwrap();
		let sk = generator.secret_key().clone();
		Fixture {
			encoder: Encoder::new(&context),
			encryptor: SymmetricEncryptor::new(&context, &sk),
			decryptor: Decryptor::new(&context, &sk),
			evaluator: BfvEvaluator::new(&context),
			generator,
		}
	}

	fn roundtrip(f: &Fixture, ct: &Ciphertext, format: EncodeFormat) -> Vec<u64> {
		let pt = f.decryptor.decrypt(ct).unwrap();
		f.encoder.decode(&pt, format).unwrap()
	}

	#[test]
	fn repeated_addition_accumulates_mod_t() {
		let f = fixture();
		let values = vec![8u64, 5, 12, 12, 15, 0, 8, 5];
		let pt = f.encoder.encode(&values, EncodeFormat::Coefficient).unwrap();
		let ct = f.encryptor.encrypt(&pt, &mut thread_rng()).unwrap();

		let doubled = f.evaluator.add(&ct, &ct).unwrap();
		assert_eq!(
			roundtrip(&f, &doubled, EncodeFormat::Coefficient),
			vec![16, 10, 7, 7, 13, 0, 16, 10]
		);

		let tripled = f.evaluator.add(&doubled, &ct).unwrap();
		assert_eq!(
			roundtrip(&f, &tripled, EncodeFormat::Coefficient),
			vec![7, 15, 2, 2, 11, 0, 7, 15]
		);
	}

	#[test]
	fn subtracting_self_is_transparent_zero() {
		let f = fixture();
		let pt = f
			.encoder
			.encode(&[8, 5, 12, 12, 15, 0, 8, 5], EncodeFormat::Coefficient)
			.unwrap();
		let ct = f.encryptor.encrypt(&pt, &mut thread_rng()).unwrap();
		let zero = f.evaluator.sub(&ct, &ct).unwrap();
		assert!(zero.is_transparent());
		assert_eq!(
			roundtrip(&f, &zero, EncodeFormat::Coefficient),
			vec![0u64; 8]
		);
	}

	#[test]
	fn negate_then_add_cancels() {
		let f = fixture();
		let pt = f.encoder.encode(&[1, 2, 3], EncodeFormat::Coefficient).unwrap();
		let ct = f.encryptor.encrypt(&pt, &mut thread_rng()).unwrap();
		let neg = f.evaluator.negate(&ct).unwrap();
		let sum = f.evaluator.add(&ct, &neg).unwrap();
		assert_eq!(roundtrip(&f, &sum, EncodeFormat::Coefficient), vec![0u64; 8]);
	}

	#[test]
	fn plain_addition_and_subtraction() {
		let f = fixture();
		let pt_a = f.encoder.encode(&[5, 9, 16], EncodeFormat::Coefficient).unwrap();
		let pt_b = f.encoder.encode(&[4, 10, 2], EncodeFormat::Coefficient).unwrap();
		let ct = f.encryptor.encrypt(&pt_a, &mut thread_rng()).unwrap();
		let sum = f.evaluator.add_plain(&ct, &pt_b).unwrap();
		assert_eq!(
			roundtrip(&f, &sum, EncodeFormat::Coefficient)[..3],
			[9, 2, 1]
		);
		let diff = f.evaluator.sub_plain(&sum, &pt_b).unwrap();
		assert_eq!(
			roundtrip(&f, &diff, EncodeFormat::Coefficient)[..3],
			[5, 9, 16]
		);
	}

	#[test]
	fn simd_plain_multiplication_is_slotwise() {
		let f = fixture();
		let a = vec![1u64, 2, 3, 4, 5, 6, 7, 8];
		let b = vec![2u64, 2, 2, 3, 3, 3, 16, 1];
		let pt_a = f.encoder.encode(&a, EncodeFormat::Simd).unwrap();
		let pt_b = f.encoder.encode(&b, EncodeFormat::Simd).unwrap();
		let ct = f.encryptor.encrypt(&pt_a, &mut thread_rng()).unwrap();
		let product = f.evaluator.multiply_plain(&ct, &pt_b).unwrap();
		let expected: Vec<u64> = a.iter().zip(&b).map(|(x, y)| x * y % 17).collect();
		assert_eq!(roundtrip(&f, &product, EncodeFormat::Simd), expected);
	}

	#[test]
	fn ciphertext_multiplication_with_relinearization() {
		let f = fixture();
		let mut rng = thread_rng();
		let a = vec![1u64, 2, 3, 4, 5, 6, 7, 8];
		let b = vec![3u64, 3, 3, 3, 5, 5, 5, 5];
		let ct_a = f
			.encryptor
			.encrypt(&f.encoder.encode(&a, EncodeFormat::Simd).unwrap(), &mut rng)
			.unwrap();
		let ct_b = f
			.encryptor
			.encrypt(&f.encoder.encode(&b, EncodeFormat::Simd).unwrap(), &mut rng)
			.unwrap();
		let product = f.evaluator.multiply(&ct_a, &ct_b).unwrap();
		assert_eq!(product.poly_count(), 3);
		let expected: Vec<u64> = a.iter().zip(&b).map(|(x, y)| x * y % 17).collect();
		assert_eq!(roundtrip(&f, &product, EncodeFormat::Simd), expected);

		let config = EvaluationKeyConfig {
			galois_elements: vec![],
			has_relinearization_key: true,
		};
		let evk = f.generator.create_evaluation_key(&config, &mut rng).unwrap();
		let relinearized = f.evaluator.relinearize(&product, &evk).unwrap();
		assert_eq!(relinearized.poly_count(), 2);
		assert_eq!(roundtrip(&f, &relinearized, EncodeFormat::Simd), expected);
	}

	#[test]
	fn swap_rows_swaps_halves() {
		let f = fixture();
		let mut rng = thread_rng();
		let values = vec![0u64, 1, 2, 3, 4, 5, 6, 7];
		let ct = f
			.encryptor
			.encrypt(&f.encoder.encode(&values, EncodeFormat::Simd).unwrap(), &mut rng)
			.unwrap();
		let config = EvaluationKeyConfig {
			galois_elements: vec![crate::key_generator::GaloisElement::swapping_rows(8)],
			has_relinearization_key: false,
		};
		let evk = f.generator.create_evaluation_key(&config, &mut rng).unwrap();
		let swapped = f.evaluator.swap_rows(&ct, &evk).unwrap();
		assert_eq!(
			roundtrip(&f, &swapped, EncodeFormat::Simd),
			vec![4, 5, 6, 7, 0, 1, 2, 3]
		);
		let back = f.evaluator.swap_rows(&swapped, &evk).unwrap();
		assert_eq!(roundtrip(&f, &back, EncodeFormat::Simd), values);
	}

	#[test]
	fn column_rotation_steps() {
		let f = fixture();
		let mut rng = thread_rng();
		let values = vec![0u64, 1, 2, 3, 4, 5, 6, 7];
		let ct = f
			.encryptor
			.encrypt(&f.encoder.encode(&values, EncodeFormat::Simd).unwrap(), &mut rng)
			.unwrap();
		let config = EvaluationKeyConfig {
			galois_elements: vec![
				GaloisElement::rotating_columns(1, 8).unwrap(),
				GaloisElement::rotating_columns(-2, 8).unwrap(),
			],
			has_relinearization_key: false,
		};
		let evk = f.generator.create_evaluation_key(&config, &mut rng).unwrap();

		let once = f.evaluator.rotate_columns(&ct, 1, &evk).unwrap();
		assert_eq!(
			roundtrip(&f, &once, EncodeFormat::Simd),
			vec![3, 0, 1, 2, 7, 4, 5, 6]
		);
		let twice = f.evaluator.rotate_columns(&once, 1, &evk).unwrap();
		assert_eq!(
			roundtrip(&f, &twice, EncodeFormat::Simd),
			vec![2, 3, 0, 1, 6, 7, 4, 5]
		);
		let back = f.evaluator.rotate_columns(&twice, -2, &evk).unwrap();
		assert_eq!(roundtrip(&f, &back, EncodeFormat::Simd), values);
	}

	#[test]
	fn rotation_inverse_property() {
		let f = fixture();
		let mut rng = thread_rng();
		let values = vec![9u64, 8, 7, 6, 5, 4, 3, 2];
		let ct = f
			.encryptor
			.encrypt(&f.encoder.encode(&values, EncodeFormat::Simd).unwrap(), &mut rng)
			.unwrap();
		let elements: Vec<u64> = (1..4)
			.map(|s| GaloisElement::rotating_columns(s, 8).unwrap())
			.collect();
		let config = EvaluationKeyConfig {
			galois_elements: elements,
			has_relinearization_key: false,
		};
		let evk = f.generator.create_evaluation_key(&config, &mut rng).unwrap();
		for step in 1..4 {
			let there = f.evaluator.rotate_columns(&ct, step, &evk).unwrap();
			let back = f.evaluator.rotate_columns(&there, 4 - step, &evk).unwrap();
			assert_eq!(roundtrip(&f, &back, EncodeFormat::Simd), values, "step {step}");
		}
	}

	#[test]
	fn missing_galois_key_is_reported() {
		let f = fixture();
		let mut rng = thread_rng();
		let ct = f
			.encryptor
			.encrypt(
				&f.encoder.encode(&[1], EncodeFormat::Simd).unwrap(),
				&mut rng,
			)
			.unwrap();
		let evk = f
			.generator
			.create_evaluation_key(&EvaluationKeyConfig::default(), &mut rng)
			.unwrap();
		assert!(matches!(
			f.evaluator.rotate_columns(&ct, 1, &evk).unwrap_err(),
			Error::MissingGaloisKey { .. }
		));
	}

	#[test]
	fn mod_switch_preserves_decryption() {
		let f = fixture();
		let values = vec![8u64, 5, 12, 12, 15, 0, 8, 5];
		let pt = f.encoder.encode(&values, EncodeFormat::Coefficient).unwrap();
		let ct = f.encryptor.encrypt(&pt, &mut thread_rng()).unwrap();
		let budget_before = f.decryptor.noise_budget_vartime(&ct).unwrap();
		let mut switched = ct;
		for expected_moduli in [4usize, 3, 2, 1] {
			switched = f.evaluator.mod_switch_to_next(&switched).unwrap();
			assert_eq!(switched.context().modulus_count(), expected_moduli);
			assert_eq!(
				roundtrip(&f, &switched, EncodeFormat::Coefficient),
				values,
				"after dropping to {expected_moduli} moduli"
			);
		}
		let budget_after = f.decryptor.noise_budget_vartime(&switched).unwrap();
		assert!(budget_after < budget_before);
		assert!(budget_after > 0.0, "budget {budget_after}");
		assert!(f.evaluator.mod_switch_to_next(&switched).is_err());
	}

	#[test]
	fn mod_switch_down_to_single_collapses_chain() {
		let f = fixture();
		let pt = f.encoder.encode(&[4, 4, 4], EncodeFormat::Coefficient).unwrap();
		let ct = f.encryptor.encrypt(&pt, &mut thread_rng()).unwrap();
		let single = f.evaluator.mod_switch_down_to_single(&ct).unwrap();
		assert_eq!(single.context().modulus_count(), 1);
		assert_eq!(
			roundtrip(&f, &single, EncodeFormat::Coefficient)[..3],
			[4, 4, 4]
		);
	}

	#[test]
	fn correction_factors_align_on_addition() {
		let f = fixture();
		let values = vec![3u64, 14, 6];
		let pt = f.encoder.encode(&values, EncodeFormat::Coefficient).unwrap();
		let ct = f.encryptor.encrypt(&pt, &mut thread_rng()).unwrap();

		// Scale a copy by 5 and record the factor; it still decrypts to the
		// same message.
		let mut scaled = ct.clone();
		scaled.materialize().unwrap();
		for poly in scaled.polys_mut().unwrap() {
			poly.scalar_mul_assign(5);
		}
		scaled.set_correction_factor(5);
		assert_eq!(
			roundtrip(&f, &scaled, EncodeFormat::Coefficient)[..3],
			values[..]
		);

		let sum = f.evaluator.add(&ct, &scaled).unwrap();
		assert_eq!(
			roundtrip(&f, &sum, EncodeFormat::Coefficient)[..3],
			[6, 11, 12]
		);
	}

	#[test]
	fn power_of_x_shifts_coefficients() {
		let f = fixture();
		let pt = f.encoder.encode(&[0, 9], EncodeFormat::Coefficient).unwrap();
		let ct = f.encryptor.encrypt(&pt, &mut thread_rng()).unwrap();
		let shifted = f.evaluator.multiply_power_of_x(&ct, -1).unwrap();
		assert_eq!(
			roundtrip(&f, &shifted, EncodeFormat::Coefficient),
			vec![9, 0, 0, 0, 0, 0, 0, 0]
		);
		// x^1 * x^(2N-1) = x^16 = 1 * (-1)^2; shifting back restores.
		let restored = f.evaluator.multiply_power_of_x(&shifted, 1).unwrap();
		assert_eq!(
			roundtrip(&f, &restored, EncodeFormat::Coefficient),
			vec![0, 9, 0, 0, 0, 0, 0, 0]
		);
	}
}
