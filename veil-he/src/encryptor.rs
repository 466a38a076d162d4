//! Secret-key encryption.

use rand::{CryptoRng, RngCore};

use crate::ciphertext::Ciphertext;
use crate::context::Context;
use crate::error::Result;
use crate::key_generator::SecretKey;
use crate::plaintext::Plaintext;
use crate::poly::{Poly, Representation};
use crate::rng::BlockRng;

/// Encrypts plaintexts under a secret key, producing seeded ciphertexts.
///
/// The mask polynomial `a = c_1` is the deterministic expansion of a fresh
/// 32-byte seed, so only `c_0` and the seed travel:
/// `c_0 = round(Q*m/t) - (a*s + e)`. The error `e` is drawn from the caller's
/// entropy, never from the published seed.
pub struct SymmetricEncryptor {
	context: Context,
	secret_key: SecretKey,
}

impl SymmetricEncryptor {
	/// Creates an encryptor borrowing a copy of the secret key.
	pub fn new(context: &Context, secret_key: &SecretKey) -> Self {
		Self {
			context: context.clone(),
			secret_key: secret_key.clone(),
		}
	}

	/// Encrypts a canonical-form plaintext at the top of the modulus chain.
	pub fn encrypt<R: RngCore + CryptoRng>(
		&self,
		plaintext: &Plaintext,
		rng: &mut R,
	) -> Result<Ciphertext> {
		let top = self.context.top_context();
		let (seed, mut seed_rng) = BlockRng::from_entropy(rng);
		let a = Poly::random(top, Representation::Evaluation, &mut seed_rng);

		let mut e = Poly::random_cbd(top, rng);
		e.change_representation(Representation::Evaluation)?;

		let mut c0 = self.context.scale_plaintext(plaintext.values()?, 0)?;
		c0.change_representation(Representation::Evaluation)?;

		let mut mask = a;
		mask.mul_assign(&self.secret_key.poly);
		mask.add_assign(&e);
		c0.sub_assign(&mask);

		Ok(Ciphertext::new_seeded(c0, seed, 1))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::encoder::{EncodeFormat, Encoder};
	use crate::parameters::{EncryptionParametersBuilder, SecurityLevel};
	use rand::thread_rng;

	#[test]
	fn fresh_ciphertexts_are_seeded_and_distinct() {
		let params = EncryptionParametersBuilder::new()
			.set_poly_degree(8)
			.set_plaintext_modulus(17)
			.set_coefficient_moduli_sizes(&[18, 18, 18])
			.set_security_level(SecurityLevel::Unchecked)
			.build()
			.unwrap();
		let ctx = Context::new(&params).unwrap();
		let mut rng = thread_rng();
		let sk = ctx.generate_secret_key(&mut rng).unwrap();
		let encryptor = SymmetricEncryptor::new(&ctx, &sk);
		let encoder = Encoder::new(&ctx);
		let pt = encoder.encode(&[1, 2, 3], EncodeFormat::Coefficient).unwrap();

		let c1 = encryptor.encrypt(&pt, &mut rng).unwrap();
		let c2 = encryptor.encrypt(&pt, &mut rng).unwrap();
		assert!(c1.seed().is_some());
		assert_eq!(c1.poly_count(), 2);
		assert_ne!(c1, c2);
		assert!(!c1.is_transparent());

		let mut materialized = c1.clone();
		materialized.materialize().unwrap();
		assert!(materialized.seed().is_none());
		assert_eq!(materialized.polys().unwrap().len(), 2);
		assert_eq!(materialized.c0(), c1.c0());
	}
}
