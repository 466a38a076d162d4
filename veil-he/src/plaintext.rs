//! Plaintext polynomials.

use crate::context::Context;
use crate::error::{Error, Result};
use crate::poly::{Poly, Representation};

/// An encoded plaintext.
///
/// The canonical form is a coefficient polynomial over the single-modulus
/// plaintext context. For fast plaintext-ciphertext multiplication a
/// plaintext can instead hold evaluations over a ciphertext context at some
/// chain level; [`Plaintext::to_evaluation`] produces that form.
#[derive(Debug, Clone, PartialEq)]
pub struct Plaintext {
	poly: Poly,
}

impl Plaintext {
	pub(crate) fn new(poly: Poly) -> Self {
		Self {
			poly,
		}
	}

	/// The underlying polynomial.
	pub fn poly(&self) -> &Poly {
		&self.poly
	}

	/// The storage form.
	pub fn representation(&self) -> Representation {
		self.poly.representation()
	}

	/// True when every coefficient is zero.
	pub fn is_zero(&self) -> bool {
		self.poly.is_zero()
	}

	/// The raw coefficient values modulo `t`. Only meaningful for the
	/// canonical coefficient form.
	pub fn values(&self) -> Result<&[u64]> {
		if self.poly.representation() != Representation::Coefficient
			|| self.poly.context().modulus_count() != 1
		{
			return Err(Error::InvalidContext(
				"plaintext values require the canonical coefficient form".to_string(),
			));
		}
		Ok(self.poly.row(0))
	}

	/// Converts the canonical form into evaluations over the ciphertext
	/// context at `level`, the form plaintext-ciphertext multiplication
	/// consumes. The residues are the unscaled values modulo each `q_i`.
	pub fn to_evaluation(&self, context: &Context, level: usize) -> Result<Plaintext> {
		let values = self.values()?;
		let target = context.poly_context(level)?;
		let mut poly = Poly::from_residues(values, target, Representation::Coefficient);
		poly.change_representation(Representation::Evaluation)?;
		Ok(Plaintext {
			poly,
		})
	}
}
