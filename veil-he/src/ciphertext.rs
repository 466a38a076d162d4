//! Ciphertexts and their seeded compact form.

use rand::SeedableRng;

use crate::error::{Error, Result};
use crate::poly::{Poly, PolyContext, Representation};
use crate::rng::BlockRng;
use std::sync::Arc;

/// A BFV ciphertext: an ordered sequence of polynomials over a shared
/// context, with an optional 32-byte seed and a correction factor.
///
/// A fresh ciphertext has two polynomials `(c_0, c_1)`; unrelinearized
/// products grow longer. The ciphertext is *seeded* when only `c_0` is
/// materialized and `c_1` is the deterministic expansion of the seed through
/// [`BlockRng`]; the seed is metadata, cleared as soon as an operation has to
/// touch `c_1`. The correction factor `f ∈ [1, t)` tracks the scalar the
/// decrypted message must be divided by.
#[derive(Debug, Clone, PartialEq)]
pub struct Ciphertext {
	polys: Vec<Poly>,
	seed: Option<[u8; 32]>,
	correction_factor: u64,
}

impl Ciphertext {
	/// A ciphertext from fully materialized polynomials.
	pub fn new(polys: Vec<Poly>, correction_factor: u64) -> Self {
		debug_assert!(!polys.is_empty());
		Self {
			polys,
			seed: None,
			correction_factor,
		}
	}

	/// A seeded ciphertext: `c_0` plus the seed that regenerates `c_1`.
	pub fn new_seeded(c0: Poly, seed: [u8; 32], correction_factor: u64) -> Self {
		Self {
			polys: vec![c0],
			seed: Some(seed),
			correction_factor,
		}
	}

	/// The context the ciphertext lives under.
	pub fn context(&self) -> &Arc<PolyContext> {
		self.polys[0].context()
	}

	/// The storage form of the polynomials.
	pub fn representation(&self) -> Representation {
		self.polys[0].representation()
	}

	/// Number of polynomials, counting the implicit seeded one.
	pub fn poly_count(&self) -> usize {
		self.polys.len() + usize::from(self.seed.is_some())
	}

	/// The attached seed, if the ciphertext is still in seeded form.
	pub fn seed(&self) -> Option<&[u8; 32]> {
		self.seed.as_ref()
	}

	/// The correction factor.
	pub fn correction_factor(&self) -> u64 {
		self.correction_factor
	}

	pub(crate) fn set_correction_factor(&mut self, f: u64) {
		self.correction_factor = f;
	}

	/// The materialized polynomials. Fails while the ciphertext is seeded.
	pub fn polys(&self) -> Result<&[Poly]> {
		if self.seed.is_some() {
			return Err(Error::InvalidContext(
				"ciphertext is seeded; materialize it first".to_string(),
			));
		}
		Ok(&self.polys)
	}

	pub(crate) fn polys_mut(&mut self) -> Result<&mut Vec<Poly>> {
		if self.seed.is_some() {
			return Err(Error::InvalidContext(
				"ciphertext is seeded; materialize it first".to_string(),
			));
		}
		Ok(&mut self.polys)
	}

	/// The first polynomial, available in either form.
	pub fn c0(&self) -> &Poly {
		&self.polys[0]
	}

	/// Expands the seed into `c_1` without attaching it.
	pub(crate) fn expand_seed(&self) -> Result<Poly> {
		let seed = self.seed.ok_or_else(|| {
			Error::InvalidContext("ciphertext carries no seed".to_string())
		})?;
		let mut rng = BlockRng::from_seed(seed);
		let mut c1 = Poly::random(self.context(), Representation::Evaluation, &mut rng);
		c1.change_representation(self.representation())?;
		Ok(c1)
	}

	/// Materializes the seeded polynomial and clears the seed.
	pub fn materialize(&mut self) -> Result<()> {
		if self.seed.is_some() {
			let c1 = self.expand_seed()?;
			self.polys.push(c1);
			self.seed = None;
		}
		Ok(())
	}

	/// True when decryption needs no key: every polynomial beyond the first
	/// is zero. A seeded ciphertext is never transparent.
	pub fn is_transparent(&self) -> bool {
		self.seed.is_none() && self.polys[1..].iter().all(Poly::is_zero)
	}

	/// The all-zero (transparent) ciphertext encrypting zero.
	pub fn transparent_zero(context: &Arc<PolyContext>, representation: Representation) -> Self {
		Self {
			polys: vec![
				Poly::zero(context, representation),
				Poly::zero(context, representation),
			],
			seed: None,
			correction_factor: 1,
		}
	}

	/// Converts the stored polynomials to the given form. A seed survives the
	/// conversion: the seeded polynomial follows the new form when expanded.
	pub fn change_representation(&mut self, target: Representation) -> Result<()> {
		for poly in &mut self.polys {
			poly.change_representation(target)?;
		}
		Ok(())
	}
}
