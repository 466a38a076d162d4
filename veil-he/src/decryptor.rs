//! Decryption and noise measurement.

use num_bigint::BigUint;
use num_traits::{One, ToPrimitive, Zero};

use crate::ciphertext::Ciphertext;
use crate::context::Context;
use crate::error::{Error, Result};
use crate::key_generator::SecretKey;
use crate::plaintext::Plaintext;
use crate::poly::{Poly, PolyContext, Representation};
use std::sync::Arc;

/// Decrypts ciphertexts at any level of the modulus chain.
pub struct Decryptor {
	context: Context,
	secret_key: SecretKey,
}

impl Decryptor {
	/// Creates a decryptor borrowing a copy of the secret key.
	pub fn new(context: &Context, secret_key: &SecretKey) -> Self {
		Self {
			context: context.clone(),
			secret_key: secret_key.clone(),
		}
	}

	/// The secret key reduced to a lower-level context, in evaluation form.
	fn secret_key_at(&self, target: &Arc<PolyContext>) -> Result<Poly> {
		let level = self.context.level_of(target)?;
		if level == 0 {
			return Ok(self.secret_key.poly.clone());
		}
		let mut sk = self.secret_key.poly.clone();
		sk.change_representation(Representation::Coefficient)?;
		sk.remove_last_moduli(level)?;
		sk.change_representation(Representation::Evaluation)?;
		Ok(sk)
	}

	/// Computes `sum_i c_i * s^i` in coefficient form.
	fn phase(&self, ciphertext: &Ciphertext) -> Result<Poly> {
		let mut ct = ciphertext.clone();
		ct.materialize()?;
		ct.change_representation(Representation::Evaluation)?;
		let s = self.secret_key_at(ct.context())?;
		let polys = ct.polys()?;
		let mut acc = polys[0].clone();
		let mut s_power = s.clone();
		for (i, poly) in polys.iter().enumerate().skip(1) {
			let mut term = poly.clone();
			term.mul_assign(&s_power);
			acc.add_assign(&term);
			if i + 1 < polys.len() {
				s_power.mul_assign(&s);
			}
		}
		acc.change_representation(Representation::Coefficient)?;
		Ok(acc)
	}

	/// Decrypts a ciphertext: scales the phase by `t/Q` with rounding and
	/// divides out the correction factor.
	pub fn decrypt(&self, ciphertext: &Ciphertext) -> Result<Plaintext> {
		let phase = self.phase(ciphertext)?;
		let q = phase.context().modulus();
		let half_q = &q / 2u32;
		let t = self.context.params().plaintext_modulus();
		let plain = self.context.plain_modulus();
		let f_inv = plain
			.inverse_vartime(ciphertext.correction_factor())
			.ok_or_else(|| {
				Error::InvalidParameter(format!(
					"correction factor {} is not invertible modulo {t}",
					ciphertext.correction_factor()
				))
			})?;
		let mut poly = Poly::zero(self.context.plaintext_context(), Representation::Coefficient);
		for (slot, v) in poly.row_mut(0).iter_mut().zip(phase.to_biguint_coeffs()?) {
			let rounded = (v * t + &half_q) / &q;
			let m = (rounded % t).to_u64().unwrap_or(0);
			*slot = plain.mul(m, f_inv);
		}
		Ok(Plaintext::new(poly))
	}

	/// Measures the noise budget in bits:
	/// `log2(Q) - log2(2*max|e|) - 1` over the centered error
	/// `e = phase - round(Q*m/t)`. A transparent ciphertext reports negative
	/// infinity.
	///
	/// Variable time: this inspects the secret key and the plaintext.
	pub fn noise_budget_vartime(&self, ciphertext: &Ciphertext) -> Result<f64> {
		if ciphertext.is_transparent() {
			return Ok(f64::NEG_INFINITY);
		}
		let phase = self.phase(ciphertext)?;
		let q = phase.context().modulus();
		let half_q = &q / 2u32;
		let t = self.context.params().plaintext_modulus();
		let mut max_error = BigUint::zero();
		for v in phase.to_biguint_coeffs()? {
			// The message the phase scales to, before correction-factor
			// division.
			let m = ((&v * t + &half_q) / &q) % t;
			let expected = (&q * m + (t / 2)) / t;
			let diff = (&q + v - expected) % &q;
			let centered = if diff > half_q { &q - diff } else { diff };
			if centered > max_error {
				max_error = centered;
			}
		}
		if max_error.is_zero() {
			max_error = BigUint::one();
		}
		Ok(log2_biguint(&q) - log2_biguint(&(max_error << 1)) - 1.0)
	}
}

/// `log2` of a positive big integer, with the fractional part taken from the
/// top word.
fn log2_biguint(v: &BigUint) -> f64 {
	let bits = v.bits();
	if bits <= 52 {
		return v.to_f64().unwrap_or(1.0).log2();
	}
	let shift = bits - 52;
	let top = (v >> shift).to_f64().unwrap_or(1.0);
	top.log2() + shift as f64
}
