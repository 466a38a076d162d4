//! BFV homomorphic encryption over `R_q = Z_q[x]/(x^N+1)`.
//!
//! The crate is layered bottom-up: Barrett modular arithmetic ([`zq`]), the
//! negacyclic NTT ([`ntt`]), RNS polynomials with a mod-switch context chain
//! ([`poly`]), and the BFV scheme on top: parameter validation, encoding
//! (coefficient and SIMD), secret-key encryption, homomorphic evaluation,
//! Galois automorphisms and relinearization through key switching, and
//! canonical serialization with seeded compact ciphertexts.
//!
//! # Example
//!
//! ```rust
//! use rand::thread_rng;
//! use veil_he::{
//!     BfvEvaluator, Context, Decryptor, EncodeFormat, Encoder, EncryptionParametersBuilder,
//!     Evaluator, SecurityLevel, SymmetricEncryptor,
//! };
//!
//! fn main() -> anyhow::Result<()> {
//!     let params = EncryptionParametersBuilder::new()
//!         .set_poly_degree(4096)
//!         .set_plaintext_modulus(65537)
//!         .set_coefficient_moduli_sizes(&[33, 33, 33])
//!         .set_security_level(SecurityLevel::Quantum128)
//!         .build()?;
//!     let ctx = Context::new(&params)?;
//!
//!     let mut rng = thread_rng();
//!     let secret_key = ctx.generate_secret_key(&mut rng)?;
//!     let encoder = Encoder::new(&ctx);
//!     let encryptor = SymmetricEncryptor::new(&ctx, &secret_key);
//!     let decryptor = Decryptor::new(&ctx, &secret_key);
//!     let evaluator = BfvEvaluator::new(&ctx);
//!
//!     let plaintext = encoder.encode(&[1, 2, 3], EncodeFormat::Simd)?;
//!     let ciphertext = encryptor.encrypt(&plaintext, &mut rng)?;
//!     let doubled = evaluator.add(&ciphertext, &ciphertext)?;
//!
//!     let decoded = encoder.decode(&decryptor.decrypt(&doubled)?, EncodeFormat::Simd)?;
//!     assert_eq!(&decoded[..3], &[2, 4, 6]);
//!     Ok(())
//! }
//! ```

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

mod ciphertext;
mod context;
mod decryptor;
mod encoder;
mod encryptor;
mod error;
mod evaluator;
mod key_generator;
pub mod ntt;
mod parameters;
mod plaintext;
pub mod poly;
pub mod rng;
mod serialization;
pub mod zq;

pub use ciphertext::Ciphertext;
pub use context::Context;
pub use decryptor::Decryptor;
pub use encoder::{EncodeFormat, Encoder};
pub use encryptor::SymmetricEncryptor;
pub use error::{Error, Result};
pub use evaluator::{BfvEvaluator, Evaluator};
pub use key_generator::{
	EvaluationKey, EvaluationKeyConfig, GaloisElement, KeyCompression, KeyGenerator,
	KeySwitchingKey, SecretKey,
};
pub use parameters::{
	EncryptionParameters, EncryptionParametersBuilder, ErrorStdDev, SecurityLevel,
};
pub use plaintext::Plaintext;
pub use poly::{Poly, PolyContext, Representation};
pub use rng::BlockRng;
pub use serialization::{CiphertextState, FromBytes, PlaintextState, ToBytes};
