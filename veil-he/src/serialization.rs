//! Canonical byte layouts.
//!
//! All integers are little-endian. Polynomial rows are bit-packed at the bit
//! length of their modulus and padded to a byte boundary per row. Ciphertexts
//! serialize as a tagged union: tag 0 is the seeded form (`c_0` plus the
//! 32-byte seed), tag 1 the full form (all polynomials, a skip-LSB count per
//! polynomial, and the correction factor). Skip-LSB serialization zeroes the
//! low bits of decryption-bound ciphertexts; deserialization reinflates them
//! with zeros.

use crate::ciphertext::Ciphertext;
use crate::context::Context;
use crate::error::{Error, Result};
use crate::key_generator::{EvaluationKey, KeySwitchingKey};
use crate::plaintext::Plaintext;
use crate::poly::{Poly, PolyContext, Representation};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Serializes an object into its canonical bytes.
pub trait ToBytes {
	/// Returns the object as a byte array.
	fn as_bytes(&self) -> Result<Vec<u8>>;
}

/// Deserializes an object from bytes under some contextual state.
pub trait FromBytes {
	/// State needed to interpret the bytes.
	type State;
	/// Deserializes an object from the given bytes using the given state.
	fn from_bytes(state: &Self::State, bytes: &[u8]) -> Result<Self>
	where
		Self: Sized;
}

/// Bit length of a modulus: the field width its residues serialize at.
fn modulus_bits(q: u64) -> usize {
	(64 - q.leading_zeros()) as usize
}

/// Packs values into a little-endian bitstream at `width` bits each.
pub(crate) fn pack_bits(values: &[u64], width: usize) -> Vec<u8> {
	debug_assert!(width > 0 && width <= 64);
	let mut out = vec![0u8; (values.len() * width + 7) / 8];
	let mut bit = 0usize;
	for &value in values {
		debug_assert!(width == 64 || value < 1u64 << width);
		let mut remaining = width;
		let mut v = value;
		while remaining > 0 {
			let byte = bit / 8;
			let offset = bit % 8;
			let take = (8 - offset).min(remaining);
			out[byte] |= (((v & ((1u64 << take) - 1)) as u8) << offset) as u8;
			v >>= take;
			bit += take;
			remaining -= take;
		}
	}
	out
}

/// Unpacks `count` values of `width` bits from a little-endian bitstream,
/// treating missing trailing bytes as zero.
pub(crate) fn unpack_bits(bytes: &[u8], width: usize, count: usize) -> Vec<u64> {
	debug_assert!(width > 0 && width <= 64);
	let mut out = Vec::with_capacity(count);
	let mut bit = 0usize;
	for _ in 0..count {
		let mut value = 0u64;
		let mut filled = 0usize;
		let mut remaining = width;
		while remaining > 0 {
			let byte = bit / 8;
			let offset = bit % 8;
			let take = (8 - offset).min(remaining);
			let chunk = if byte < bytes.len() {
				(bytes[byte] >> offset) as u64 & ((1u64 << take) - 1)
			} else {
				0
			};
			value |= chunk << filled;
			filled += take;
			bit += take;
			remaining -= take;
		}
		out.push(value);
	}
	out
}

/// Cursor over a serialized buffer.
struct ByteReader<'a> {
	bytes: &'a [u8],
	pos: usize,
}

impl<'a> ByteReader<'a> {
	fn new(bytes: &'a [u8]) -> Self {
		Self {
			bytes,
			pos: 0,
		}
	}

	fn take(&mut self, n: usize) -> Result<&'a [u8]> {
		if self.pos + n > self.bytes.len() {
			return Err(Error::CorruptedData(format!(
				"buffer too short: wanted {n} bytes at offset {}, have {}",
				self.pos,
				self.bytes.len()
			)));
		}
		let slice = &self.bytes[self.pos..self.pos + n];
		self.pos += n;
		Ok(slice)
	}

	fn take_u8(&mut self) -> Result<u8> {
		Ok(self.take(1)?[0])
	}

	fn take_u32(&mut self) -> Result<u32> {
		let b = self.take(4)?;
		Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
	}

	fn take_u64(&mut self) -> Result<u64> {
		let b = self.take(8)?;
		Ok(u64::from_le_bytes([
			b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
		]))
	}

	fn finished(&self) -> bool {
		self.pos == self.bytes.len()
	}
}

fn row_byte_count(degree: usize, width: usize) -> usize {
	(degree * width + 7) / 8
}

/// Bytes one polynomial over `context` occupies, with `skip` bits dropped
/// from every coefficient.
fn poly_byte_count(context: &PolyContext, skip: usize) -> usize {
	context
		.moduli()
		.iter()
		.map(|&q| row_byte_count(context.degree(), modulus_bits(q).saturating_sub(skip).max(1)))
		.sum()
}

fn serialize_poly(poly: &Poly, skip: usize, out: &mut Vec<u8>) {
	for (row, &q) in poly.rows().zip(poly.context().moduli()) {
		let width = modulus_bits(q).saturating_sub(skip).max(1);
		if skip == 0 {
			out.extend_from_slice(&pack_bits(row, width));
		} else {
			let shifted: Vec<u64> = row.iter().map(|&v| v >> skip).collect();
			out.extend_from_slice(&pack_bits(&shifted, width));
		}
	}
}

fn deserialize_poly(
	reader: &mut ByteReader<'_>,
	context: &Arc<PolyContext>,
	representation: Representation,
	skip: usize,
) -> Result<Poly> {
	let degree = context.degree();
	let mut rows = Vec::with_capacity(context.modulus_count() * degree);
	for &q in context.moduli() {
		let width = modulus_bits(q).saturating_sub(skip).max(1);
		let bytes = reader.take(row_byte_count(degree, width))?;
		let mut values = unpack_bits(bytes, width, degree);
		if skip > 0 {
			for v in values.iter_mut() {
				*v <<= skip;
			}
		}
		if let Some(&v) = values.iter().find(|&&v| v >= q) {
			return Err(Error::CorruptedData(format!(
				"coefficient {v} is not reduced modulo {q}"
			)));
		}
		rows.extend_from_slice(&values);
	}
	Ok(Poly::from_rows(context, representation, rows))
}

/// Where a serialized plaintext lives.
#[derive(Debug, Clone)]
pub struct PlaintextState {
	/// The context the plaintext belongs to.
	pub context: Context,
	/// `None` for the canonical single-modulus coefficient form; otherwise
	/// the chain level of the evaluation form.
	pub evaluation_level: Option<usize>,
}

impl ToBytes for Plaintext {
	fn as_bytes(&self) -> Result<Vec<u8>> {
		let mut out = Vec::with_capacity(poly_byte_count(self.poly().context(), 0));
		serialize_poly(self.poly(), 0, &mut out);
		Ok(out)
	}
}

impl FromBytes for Plaintext {
	type State = PlaintextState;

	fn from_bytes(state: &Self::State, bytes: &[u8]) -> Result<Self> {
		let mut reader = ByteReader::new(bytes);
		let poly = match state.evaluation_level {
			None => deserialize_poly(
				&mut reader,
				state.context.plaintext_context(),
				Representation::Coefficient,
				0,
			)?,
			Some(level) => deserialize_poly(
				&mut reader,
				state.context.poly_context(level)?,
				Representation::Evaluation,
				0,
			)?,
		};
		Ok(Plaintext::new(poly))
	}
}

const CIPHERTEXT_TAG_SEEDED: u8 = 0;
const CIPHERTEXT_TAG_FULL: u8 = 1;

/// What a serialized ciphertext deserializes into.
#[derive(Debug, Clone)]
pub struct CiphertextState {
	/// The context the ciphertext belongs to.
	pub context: Context,
	/// Chain level of the ciphertext's polynomial context.
	pub level: usize,
	/// Number of polynomials, counting a seeded one.
	pub poly_count: usize,
	/// Storage form of the serialized polynomials.
	pub representation: Representation,
}

impl Ciphertext {
	/// Bytes [`ToBytes::as_bytes`] will produce for this ciphertext.
	pub fn serialized_byte_count(&self) -> usize {
		let per_poly = poly_byte_count(self.context(), 0);
		if self.seed().is_some() {
			1 + per_poly + 32
		} else {
			1 + self.poly_count() * (per_poly + 4) + 8
		}
	}

	/// Serializes the full form, dropping `skip_lsbs[i]` low bits from
	/// polynomial `i`. Non-zero skips are only sound for single-modulus
	/// (decryption-bound) ciphertexts.
	pub fn as_bytes_with_skip_lsbs(&self, skip_lsbs: &[u32]) -> Result<Vec<u8>> {
		let mut ct = self.clone();
		ct.materialize()?;
		let polys = ct.polys()?;
		if skip_lsbs.len() != polys.len() {
			return Err(Error::InvalidParameter(format!(
				"{} skip entries for {} polynomials",
				skip_lsbs.len(),
				polys.len()
			)));
		}
		if skip_lsbs.iter().any(|&s| s > 0) && ct.context().modulus_count() != 1 {
			return Err(Error::InvalidParameter(
				"skip-LSB serialization requires a single-modulus ciphertext".to_string(),
			));
		}
		let mut out = Vec::new();
		out.push(CIPHERTEXT_TAG_FULL);
		for (poly, &skip) in polys.iter().zip(skip_lsbs) {
			serialize_poly(poly, skip as usize, &mut out);
		}
		for &skip in skip_lsbs {
			out.extend_from_slice(&skip.to_le_bytes());
		}
		out.extend_from_slice(&ct.correction_factor().to_le_bytes());
		Ok(out)
	}

	/// Skip-LSB counts that keep a single-modulus ciphertext decryptable:
	/// the `c_0` bits stay well under `q/t`, and the `c_1` bits additionally
	/// absorb the secret-key convolution.
	pub fn skip_lsbs_for_decryption(&self, plaintext_modulus: u64) -> Vec<u32> {
		let context = self.context();
		if context.modulus_count() != 1 {
			return vec![0; self.poly_count()];
		}
		let q_bits = modulus_bits(context.moduli()[0]) as i64;
		let t_bits = modulus_bits(plaintext_modulus) as i64;
		let degree_bits = context.degree().trailing_zeros() as i64;
		let c0_skip = (q_bits - t_bits - 5).max(0) as u32;
		let c1_skip = (c0_skip as i64 - degree_bits - 1).max(0) as u32;
		let mut skips = vec![c1_skip; self.poly_count()];
		skips[0] = c0_skip;
		skips
	}
}

impl ToBytes for Ciphertext {
	fn as_bytes(&self) -> Result<Vec<u8>> {
		if let Some(seed) = self.seed() {
			let mut out = Vec::with_capacity(self.serialized_byte_count());
			out.push(CIPHERTEXT_TAG_SEEDED);
			serialize_poly(self.c0(), 0, &mut out);
			out.extend_from_slice(seed);
			return Ok(out);
		}
		self.as_bytes_with_skip_lsbs(&vec![0; self.poly_count()])
	}
}

impl FromBytes for Ciphertext {
	type State = CiphertextState;

	fn from_bytes(state: &Self::State, bytes: &[u8]) -> Result<Self> {
		let context = state.context.poly_context(state.level)?.clone();
		let mut reader = ByteReader::new(bytes);
		match reader.take_u8()? {
			CIPHERTEXT_TAG_SEEDED => {
				let c0 = deserialize_poly(&mut reader, &context, state.representation, 0)?;
				let seed_bytes = reader.take(32)?;
				let mut seed = [0u8; 32];
				seed.copy_from_slice(seed_bytes);
				Ok(Ciphertext::new_seeded(c0, seed, 1))
			}
			CIPHERTEXT_TAG_FULL => {
				// The polynomial payload precedes the skip counts; read the
				// trailer first.
				let trailer = 4 * state.poly_count + 8;
				if bytes.len() < 1 + trailer {
					return Err(Error::CorruptedData(
						"full ciphertext shorter than its trailer".to_string(),
					));
				}
				let mut tail = ByteReader::new(&bytes[bytes.len() - trailer..]);
				let mut skips = Vec::with_capacity(state.poly_count);
				for _ in 0..state.poly_count {
					skips.push(tail.take_u32()?);
				}
				let correction_factor = tail.take_u64()?;
				let plaintext_modulus = state.context.params().plaintext_modulus();
				if correction_factor == 0 || correction_factor >= plaintext_modulus {
					return Err(Error::CorruptedData(format!(
						"correction factor {correction_factor} outside [1, {plaintext_modulus})"
					)));
				}
				let mut polys = Vec::with_capacity(state.poly_count);
				for &skip in &skips {
					polys.push(deserialize_poly(
						&mut reader,
						&context,
						state.representation,
						skip as usize,
					)?);
				}
				Ok(Ciphertext::new(polys, correction_factor))
			}
			tag => Err(Error::CorruptedData(format!("unknown ciphertext tag {tag}"))),
		}
	}
}

impl KeySwitchingKey {
	fn serialized_byte_count(&self) -> usize {
		4 + 32 + self.c0s.len() * poly_byte_count(self.c0s[0].context(), 0)
	}
}

impl ToBytes for KeySwitchingKey {
	fn as_bytes(&self) -> Result<Vec<u8>> {
		let mut out = Vec::with_capacity(self.serialized_byte_count());
		out.extend_from_slice(&(self.c0s.len() as u32).to_le_bytes());
		out.extend_from_slice(&self.seed);
		for c0 in &self.c0s {
			serialize_poly(c0, 0, &mut out);
		}
		Ok(out)
	}
}

fn read_key_switching_key(
	reader: &mut ByteReader<'_>,
	context: &Context,
) -> Result<KeySwitchingKey> {
	let count = reader.take_u32()? as usize;
	let top = context.top_context();
	if count != top.modulus_count() {
		return Err(Error::CorruptedData(format!(
			"key-switching key has {count} parts, expected {}",
			top.modulus_count()
		)));
	}
	let seed_bytes = reader.take(32)?;
	let mut seed = [0u8; 32];
	seed.copy_from_slice(seed_bytes);
	let mut c0s = Vec::with_capacity(count);
	for _ in 0..count {
		c0s.push(deserialize_poly(
			reader,
			top,
			Representation::Evaluation,
			0,
		)?);
	}
	let c1s = KeySwitchingKey::expand_c1s(context, seed, count)?;
	Ok(KeySwitchingKey {
		c0s,
		c1s,
		seed,
	})
}

impl ToBytes for EvaluationKey {
	fn as_bytes(&self) -> Result<Vec<u8>> {
		let mut out = Vec::new();
		out.extend_from_slice(&(self.galois.len() as u32).to_le_bytes());
		for (element, key) in &self.galois {
			out.extend_from_slice(&element.to_le_bytes());
			out.extend_from_slice(&key.as_bytes()?);
		}
		match &self.relin {
			Some(key) => {
				out.push(1);
				out.extend_from_slice(&key.as_bytes()?);
			}
			None => out.push(0),
		}
		Ok(out)
	}
}

impl FromBytes for EvaluationKey {
	type State = Context;

	fn from_bytes(state: &Self::State, bytes: &[u8]) -> Result<Self> {
		let mut reader = ByteReader::new(bytes);
		let galois_count = reader.take_u32()? as usize;
		let mut galois = BTreeMap::new();
		for _ in 0..galois_count {
			let element = reader.take_u64()?;
			let key = read_key_switching_key(&mut reader, state)?;
			galois.insert(element, key);
		}
		let relin = match reader.take_u8()? {
			0 => None,
			1 => Some(read_key_switching_key(&mut reader, state)?),
			tag => {
				return Err(Error::CorruptedData(format!(
					"unknown relinearization tag {tag}"
				)))
			}
		};
		if !reader.finished() {
			return Err(Error::CorruptedData(
				"trailing bytes after evaluation key".to_string(),
			));
		}
		Ok(EvaluationKey {
			galois,
			relin,
		})
	}
}
