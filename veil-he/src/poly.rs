//! RNS polynomials over `Z_Q[x]/(x^N+1)`.
//!
//! A polynomial is stored as an `L x N` row-major matrix: one row of `N`
//! residues per RNS modulus. The [`Representation`] tag records whether the
//! rows hold raw coefficients or NTT evaluations; the two forms are
//! interchangeable through [`Poly::change_representation`] and arithmetic is
//! elementwise per row in either form (multiplication requires evaluations).

use std::sync::Arc;

use itertools::izip;
use num_bigint::{BigInt, BigUint};
use num_traits::{One, Signed, ToPrimitive, Zero};
use rand::RngCore;

use crate::error::{Error, Result};
use crate::ntt::NttOperator;
use crate::zq::Modulus;

/// Storage form of a polynomial.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Representation {
	/// Raw coefficients.
	Coefficient,
	/// NTT evaluations, in the transform's bit-reversed slot order.
	Evaluation,
}

/// The ordered RNS moduli a polynomial lives under, with their precomputed
/// operators, plus the link to the next context down the mod-switch chain
/// (the same moduli with the last one dropped).
#[derive(Debug)]
pub struct PolyContext {
	moduli: Vec<u64>,
	moduli_ops: Vec<Modulus>,
	ntt_ops: Option<Vec<Arc<NttOperator>>>,
	degree: usize,
	next: Option<Arc<PolyContext>>,
}

impl PartialEq for PolyContext {
	fn eq(&self, other: &Self) -> bool {
		self.moduli == other.moduli && self.degree == other.degree
	}
}

impl PolyContext {
	/// Creates the context chain for `moduli`, requiring every modulus to
	/// support a degree-`degree` negacyclic NTT.
	pub fn new(moduli: &[u64], degree: usize) -> Result<Arc<Self>> {
		if moduli.is_empty() {
			return Err(Error::InvalidParameter("empty modulus list".to_string()));
		}
		let moduli_ops = moduli
			.iter()
			.map(|&p| Modulus::new(p))
			.collect::<Result<Vec<_>>>()?;
		let ntt_ops = moduli_ops
			.iter()
			.map(|m| NttOperator::new(m, degree).map(Arc::new))
			.collect::<Result<Vec<_>>>()?;
		Ok(Self::build_chain(moduli, &moduli_ops, &ntt_ops, degree))
	}

	fn build_chain(
		moduli: &[u64],
		moduli_ops: &[Modulus],
		ntt_ops: &[Arc<NttOperator>],
		degree: usize,
	) -> Arc<Self> {
		let len = moduli.len();
		let next = if len > 1 {
			Some(Self::build_chain(
				&moduli[..len - 1],
				&moduli_ops[..len - 1],
				&ntt_ops[..len - 1],
				degree,
			))
		} else {
			None
		};
		Arc::new(Self {
			moduli: moduli.to_vec(),
			moduli_ops: moduli_ops.to_vec(),
			ntt_ops: Some(ntt_ops.to_vec()),
			degree,
			next,
		})
	}

	/// Creates a single-modulus context without NTT tables, for plaintext
	/// polynomials over a modulus that need not be NTT-friendly.
	pub fn new_plaintext(modulus: u64, degree: usize) -> Result<Arc<Self>> {
		Ok(Arc::new(Self {
			moduli: vec![modulus],
			moduli_ops: vec![Modulus::new(modulus)?],
			ntt_ops: None,
			degree,
			next: None,
		}))
	}

	/// Polynomial degree `N`.
	pub fn degree(&self) -> usize {
		self.degree
	}

	/// The RNS moduli, in order.
	pub fn moduli(&self) -> &[u64] {
		&self.moduli
	}

	/// The modular arithmetic operators, one per modulus.
	pub fn moduli_ops(&self) -> &[Modulus] {
		&self.moduli_ops
	}

	/// Number of RNS moduli.
	pub fn modulus_count(&self) -> usize {
		self.moduli.len()
	}

	/// The NTT operators, or an error for contexts built without them.
	pub fn ntt_ops(&self) -> Result<&[Arc<NttOperator>]> {
		self.ntt_ops
			.as_deref()
			.ok_or_else(|| Error::InvalidContext("context has no NTT tables".to_string()))
	}

	/// The next context in the mod-switch chain.
	pub fn next(&self) -> Option<&Arc<PolyContext>> {
		self.next.as_ref()
	}

	/// The full modulus `Q`, the product of the RNS moduli.
	pub fn modulus(&self) -> BigUint {
		self.moduli
			.iter()
			.fold(BigUint::one(), |acc, &q| acc * BigUint::from(q))
	}

	/// The CRT garner coefficients `(Q/q_j) * [(Q/q_j)^-1]_{q_j}`, which
	/// reconstruct an integer from its residue rows:
	/// `x = sum_j [x]_{q_j} * garner_j mod Q`.
	pub fn garner(&self) -> Result<Vec<BigUint>> {
		let q = self.modulus();
		self.moduli
			.iter()
			.zip(self.moduli_ops.iter())
			.map(|(&qj, op)| {
				let q_hat = &q / qj;
				let q_hat_mod = (&q_hat % qj).to_u64().unwrap_or(0);
				let inv = op.inverse_vartime(q_hat_mod).ok_or_else(|| {
					Error::InvalidParameter(format!("moduli are not pairwise coprime at {qj}"))
				})?;
				Ok(q_hat * inv)
			})
			.collect()
	}
}

/// An RNS polynomial: residue rows over a shared [`PolyContext`].
#[derive(Debug, Clone, PartialEq)]
pub struct Poly {
	context: Arc<PolyContext>,
	representation: Representation,
	coefficients: Vec<u64>,
}

impl Poly {
	/// The all-zero polynomial.
	pub fn zero(context: &Arc<PolyContext>, representation: Representation) -> Self {
		Self {
			context: context.clone(),
			representation,
			coefficients: vec![0u64; context.modulus_count() * context.degree()],
		}
	}

	/// Builds a polynomial from raw rows. Lengths must match the context.
	pub(crate) fn from_rows(
		context: &Arc<PolyContext>,
		representation: Representation,
		coefficients: Vec<u64>,
	) -> Self {
		debug_assert_eq!(
			coefficients.len(),
			context.modulus_count() * context.degree()
		);
		Self {
			context: context.clone(),
			representation,
			coefficients,
		}
	}

	/// Spreads integer residues `values[i] in [0, B)` across every RNS row,
	/// reducing per modulus.
	pub(crate) fn from_residues(
		values: &[u64],
		context: &Arc<PolyContext>,
		representation: Representation,
	) -> Self {
		debug_assert_eq!(values.len(), context.degree());
		let n = context.degree();
		let mut coefficients = vec![0u64; context.modulus_count() * n];
		for (row, op) in coefficients.chunks_exact_mut(n).zip(context.moduli_ops()) {
			for (slot, &v) in row.iter_mut().zip(values) {
				*slot = op.reduce(v);
			}
		}
		Self {
			context: context.clone(),
			representation,
			coefficients,
		}
	}

	/// Spreads signed values across every row in balanced form: `-1` becomes
	/// `q_i - 1` on each row.
	pub(crate) fn from_signed(
		values: &[i64],
		context: &Arc<PolyContext>,
		representation: Representation,
	) -> Self {
		debug_assert_eq!(values.len(), context.degree());
		let n = context.degree();
		let mut coefficients = vec![0u64; context.modulus_count() * n];
		for (row, op) in coefficients.chunks_exact_mut(n).zip(context.moduli_ops()) {
			let q = op.value();
			for (slot, &v) in row.iter_mut().zip(values) {
				*slot = if v < 0 {
					op.reduce(q - ((-v) as u64 % q))
				} else {
					op.reduce(v as u64)
				};
			}
		}
		Self {
			context: context.clone(),
			representation,
			coefficients,
		}
	}

	/// Uniformly random polynomial, sampled by rejection per residue:
	/// draw a 64-bit word, mask to the modulus bit length, retry while the
	/// value is out of range. Rows are filled in modulus order.
	pub fn random<R: RngCore>(
		context: &Arc<PolyContext>,
		representation: Representation,
		rng: &mut R,
	) -> Self {
		let n = context.degree();
		let mut coefficients = vec![0u64; context.modulus_count() * n];
		for (row, &q) in coefficients.chunks_exact_mut(n).zip(context.moduli()) {
			let bits = 64 - (q - 1).leading_zeros();
			let mask = if bits >= 64 {
				u64::MAX
			} else {
				(1u64 << bits) - 1
			};
			for slot in row.iter_mut() {
				*slot = loop {
					let v = rng.next_u64() & mask;
					if v < q {
						break v;
					}
				};
			}
		}
		Self {
			context: context.clone(),
			representation,
			coefficients,
		}
	}

	/// Ternary polynomial with one balanced `{-1, 0, 1}` draw per
	/// coefficient, cast identically to every row. Each draw takes the low
	/// two bits of one stream byte, rejecting the value 3.
	pub fn random_ternary<R: RngCore>(context: &Arc<PolyContext>, rng: &mut R) -> Self {
		let n = context.degree();
		let mut signs = vec![0i64; n];
		let mut byte = [0u8; 1];
		for sign in signs.iter_mut() {
			*sign = loop {
				rng.fill_bytes(&mut byte);
				match byte[0] & 3 {
					3 => continue,
					v => break v as i64 - 1,
				}
			};
		}
		Self::from_signed(&signs, context, Representation::Coefficient)
	}

	/// Centered binomial error polynomial: 20 fair coin pairs per coefficient
	/// (five stream bytes), summing `b_i - b'_i` over even/odd bit pairs.
	pub fn random_cbd<R: RngCore>(context: &Arc<PolyContext>, rng: &mut R) -> Self {
		const EVEN_BITS: u64 = 0x5555_5555_55;
		let n = context.degree();
		let mut values = vec![0i64; n];
		let mut bytes = [0u8; 8];
		for value in values.iter_mut() {
			rng.fill_bytes(&mut bytes[..5]);
			let word = u64::from_le_bytes(bytes) & 0xff_ffff_ffff;
			let pos = (word & EVEN_BITS).count_ones() as i64;
			let neg = ((word >> 1) & EVEN_BITS).count_ones() as i64;
			*value = pos - neg;
		}
		Self::from_signed(&values, context, Representation::Coefficient)
	}

	/// The polynomial's context.
	pub fn context(&self) -> &Arc<PolyContext> {
		&self.context
	}

	/// The storage form.
	pub fn representation(&self) -> Representation {
		self.representation
	}

	/// Residue row for modulus index `i`.
	pub fn row(&self, i: usize) -> &[u64] {
		let n = self.context.degree();
		&self.coefficients[i * n..(i + 1) * n]
	}

	pub(crate) fn row_mut(&mut self, i: usize) -> &mut [u64] {
		let n = self.context.degree();
		&mut self.coefficients[i * n..(i + 1) * n]
	}

	/// Iterates over residue rows.
	pub fn rows(&self) -> impl Iterator<Item = &[u64]> {
		self.coefficients.chunks_exact(self.context.degree())
	}

	/// True when every residue is zero.
	pub fn is_zero(&self) -> bool {
		self.coefficients.iter().all(|&c| c == 0)
	}

	/// `self += other`. Contexts and representations must agree.
	pub fn add_assign(&mut self, other: &Poly) {
		debug_assert_eq!(self.context, other.context);
		debug_assert_eq!(self.representation, other.representation);
		let n = self.context.degree();
		for (row, other_row, op) in izip!(
			self.coefficients.chunks_exact_mut(n),
			other.coefficients.chunks_exact(n),
			self.context.moduli_ops()
		) {
			op.add_vec(row, other_row);
		}
	}

	/// `self -= other`. Contexts and representations must agree.
	pub fn sub_assign(&mut self, other: &Poly) {
		debug_assert_eq!(self.context, other.context);
		debug_assert_eq!(self.representation, other.representation);
		let n = self.context.degree();
		for (row, other_row, op) in izip!(
			self.coefficients.chunks_exact_mut(n),
			other.coefficients.chunks_exact(n),
			self.context.moduli_ops()
		) {
			op.sub_vec(row, other_row);
		}
	}

	/// `self = -self`.
	pub fn neg_assign(&mut self) {
		let n = self.context.degree();
		for (row, op) in self
			.coefficients
			.chunks_exact_mut(n)
			.zip(self.context.moduli_ops())
		{
			op.neg_vec(row);
		}
	}

	/// Pointwise `self *= other`. Both operands must hold evaluations.
	pub fn mul_assign(&mut self, other: &Poly) {
		debug_assert_eq!(self.context, other.context);
		debug_assert_eq!(self.representation, Representation::Evaluation);
		debug_assert_eq!(other.representation, Representation::Evaluation);
		let n = self.context.degree();
		for (row, other_row, op) in izip!(
			self.coefficients.chunks_exact_mut(n),
			other.coefficients.chunks_exact(n),
			self.context.moduli_ops()
		) {
			op.mul_vec(row, other_row);
		}
	}

	/// `self *= s` with a single scalar applied to every row.
	pub fn scalar_mul_assign(&mut self, s: u64) {
		let n = self.context.degree();
		for (row, op) in self
			.coefficients
			.chunks_exact_mut(n)
			.zip(self.context.moduli_ops())
		{
			op.scalar_mul_vec(row, s);
		}
	}

	/// `self *= s_i` with one scalar per RNS row.
	pub(crate) fn scalar_mul_rns_assign(&mut self, scalars: &[u64]) {
		debug_assert_eq!(scalars.len(), self.context.modulus_count());
		let n = self.context.degree();
		for (row, op, &s) in izip!(
			self.coefficients.chunks_exact_mut(n),
			self.context.moduli_ops(),
			scalars
		) {
			op.scalar_mul_vec(row, s);
		}
	}

	/// Converts between coefficient and evaluation form in place.
	pub fn change_representation(&mut self, target: Representation) -> Result<()> {
		if self.representation == target {
			return Ok(());
		}
		let ntt_ops = self.context.ntt_ops()?.to_vec();
		let n = self.context.degree();
		for (row, op) in self.coefficients.chunks_exact_mut(n).zip(ntt_ops.iter()) {
			match target {
				Representation::Evaluation => op.forward(row),
				Representation::Coefficient => op.inverse(row),
			}
		}
		self.representation = target;
		Ok(())
	}

	/// Applies the Galois automorphism `x -> x^g` for an odd Galois element,
	/// in whichever form the polynomial currently holds. The two paths agree:
	/// permuting evaluations matches permuting-and-negating coefficients.
	pub fn apply_galois(&self, g: u64) -> Result<Poly> {
		let n = self.context.degree() as u64;
		let m = 2 * n;
		if g % 2 == 0 || g % m == 0 {
			return Err(Error::InvalidParameter(format!(
				"galois element {g} is not an odd unit mod {m}"
			)));
		}
		let g = g % m;
		let mut out = Poly::zero(&self.context, self.representation);
		match self.representation {
			Representation::Coefficient => {
				for (src, dst, op) in izip!(
					self.rows(),
					out.coefficients.chunks_exact_mut(n as usize),
					self.context.moduli_ops()
				) {
					for (i, &c) in src.iter().enumerate() {
						let raw = (i as u64 * g) % m;
						if raw < n {
							dst[raw as usize] = c;
						} else {
							dst[(raw - n) as usize] = op.neg(c);
						}
					}
				}
			}
			Representation::Evaluation => {
				let ntt_ops = self.context.ntt_ops()?.to_vec();
				for (src, dst, op) in izip!(
					self.rows(),
					out.coefficients.chunks_exact_mut(n as usize),
					ntt_ops.iter()
				) {
					op.galois_permutation(src, g, dst);
				}
			}
		}
		Ok(out)
	}

	/// Multiplies by `x^k` in the negacyclic ring; `k` may be negative.
	/// Defined on coefficient form only.
	pub fn multiply_power_of_x(&self, k: i64) -> Result<Poly> {
		if self.representation != Representation::Coefficient {
			return Err(Error::InvalidContext(
				"power-of-x multiplication requires coefficient form".to_string(),
			));
		}
		let n = self.context.degree() as u64;
		let m = 2 * n;
		let shift = k.rem_euclid(m as i64) as u64;
		let mut out = Poly::zero(&self.context, Representation::Coefficient);
		for (src, dst, op) in izip!(
			self.rows(),
			out.coefficients.chunks_exact_mut(n as usize),
			self.context.moduli_ops()
		) {
			for (i, &c) in src.iter().enumerate() {
				let raw = (i as u64 + shift) % m;
				if raw < n {
					dst[raw as usize] = c;
				} else {
					dst[(raw - n) as usize] = op.neg(c);
				}
			}
		}
		Ok(out)
	}

	/// Drops the last `k` RNS rows and advances the context `k` steps down
	/// the chain. Fails with [`Error::InvalidContext`] if the chain is too
	/// short.
	pub fn remove_last_moduli(&mut self, k: usize) -> Result<()> {
		let mut context = self.context.clone();
		for _ in 0..k {
			context = context
				.next()
				.cloned()
				.ok_or_else(|| Error::InvalidContext("mod-switch past end of chain".to_string()))?;
		}
		self.coefficients
			.truncate(context.modulus_count() * context.degree());
		self.context = context;
		Ok(())
	}

	/// CRT-reconstructs every coefficient into `[0, Q)`. Coefficient form
	/// only; off the hot path.
	pub fn to_biguint_coeffs(&self) -> Result<Vec<BigUint>> {
		if self.representation != Representation::Coefficient {
			return Err(Error::InvalidContext(
				"CRT reconstruction requires coefficient form".to_string(),
			));
		}
		let q = self.context.modulus();
		let garner = self.context.garner()?;
		let n = self.context.degree();
		let mut out = vec![BigUint::zero(); n];
		for (row, g) in self.rows().zip(garner.iter()) {
			for (acc, &c) in out.iter_mut().zip(row) {
				*acc += g * c;
			}
		}
		for v in out.iter_mut() {
			*v %= &q;
		}
		Ok(out)
	}

	/// CRT-reconstructs every coefficient into the centered range
	/// `(-Q/2, Q/2]`.
	pub fn to_centered_bigint_coeffs(&self) -> Result<Vec<BigInt>> {
		let q = BigInt::from(self.context.modulus());
		let half = &q / 2;
		Ok(self
			.to_biguint_coeffs()?
			.into_iter()
			.map(|v| {
				let v = BigInt::from(v);
				if v > half {
					v - &q
				} else {
					v
				}
			})
			.collect())
	}

	/// Reduces arbitrary-precision coefficients into a polynomial over
	/// `context`.
	pub fn try_from_bigint_coeffs(
		values: &[BigInt],
		context: &Arc<PolyContext>,
		representation: Representation,
	) -> Result<Poly> {
		if values.len() > context.degree() {
			return Err(Error::InvalidContext(format!(
				"{} coefficients exceed degree {}",
				values.len(),
				context.degree()
			)));
		}
		let n = context.degree();
		let mut coefficients = vec![0u64; context.modulus_count() * n];
		for (row, &q) in coefficients.chunks_exact_mut(n).zip(context.moduli()) {
			let q_big = BigInt::from(q);
			for (slot, v) in row.iter_mut().zip(values) {
				let mut r = v % &q_big;
				if r.is_negative() {
					r += &q_big;
				}
				*slot = r.to_u64().unwrap_or(0);
			}
		}
		Ok(Poly {
			context: context.clone(),
			representation,
			coefficients,
		})
	}
}
