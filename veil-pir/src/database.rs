//! Processed databases.
//!
//! A processed database is the server-side form of the plaintext entries: an
//! ordered sequence of evaluation-form plaintexts over the top ciphertext
//! context, with all-zero groups elided. The serialized layout is
//! `version(=1) | plaintext_count: u32 | (tag: u8 | plaintext?)*`, where tag
//! 0 marks an elided zero plaintext and tag 1 a full one. Files are written
//! atomically: the bytes land in a sibling temporary file that is renamed
//! over the target.

use std::fs;
use std::path::Path;

use veil_he::{Context, FromBytes, Plaintext, PlaintextState, Representation, ToBytes};

use crate::error::{Error, Result};

const SERIALIZATION_VERSION: u8 = 1;

/// Server-side database: one optional plaintext per hyper-rectangle cell.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedDatabase {
	pub(crate) plaintexts: Vec<Option<Plaintext>>,
}

/// Fixed byte size of one evaluation-form plaintext over the top context.
fn plaintext_byte_count(context: &Context) -> usize {
	let top = context.top_context();
	top.moduli()
		.iter()
		.map(|&q| (top.degree() * (64 - q.leading_zeros()) as usize + 7) / 8)
		.sum()
}

impl ProcessedDatabase {
	pub(crate) fn new(plaintexts: Vec<Option<Plaintext>>) -> Self {
		Self {
			plaintexts,
		}
	}

	/// Number of cells, elided zeros included.
	pub fn plaintext_count(&self) -> usize {
		self.plaintexts.len()
	}

	/// The cells, `None` marking an all-zero plaintext.
	pub fn plaintexts(&self) -> &[Option<Plaintext>] {
		&self.plaintexts
	}

	/// Bytes [`ToBytes::as_bytes`] will produce.
	pub fn serialized_byte_count(&self, context: &Context) -> usize {
		let per_plaintext = plaintext_byte_count(context);
		5 + self
			.plaintexts
			.iter()
			.map(|p| 1 + p.as_ref().map_or(0, |_| per_plaintext))
			.sum::<usize>()
	}

	/// Serializes the database.
	pub fn to_bytes(&self) -> Result<Vec<u8>> {
		let mut out = Vec::new();
		out.push(SERIALIZATION_VERSION);
		out.extend_from_slice(&(self.plaintexts.len() as u32).to_le_bytes());
		for plaintext in &self.plaintexts {
			match plaintext {
				None => out.push(0),
				Some(plaintext) => {
					out.push(1);
					out.extend_from_slice(&plaintext.as_bytes()?);
				}
			}
		}
		Ok(out)
	}

	/// Deserializes a database processed under `context`.
	pub fn from_bytes(context: &Context, bytes: &[u8]) -> Result<Self> {
		let version = *bytes.first().ok_or_else(|| {
			Error::He(veil_he::Error::CorruptedData("empty database buffer".to_string()))
		})?;
		if version != SERIALIZATION_VERSION {
			return Err(Error::InvalidDatabase(format!(
				"serialization version {version}, expected {SERIALIZATION_VERSION}"
			)));
		}
		if bytes.len() < 5 {
			return Err(veil_he::Error::CorruptedData(
				"database buffer shorter than its header".to_string(),
			)
			.into());
		}
		let count = u32::from_le_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]) as usize;
		let per_plaintext = plaintext_byte_count(context);
		let state = PlaintextState {
			context: context.clone(),
			evaluation_level: Some(0),
		};
		let mut plaintexts = Vec::with_capacity(count);
		let mut pos = 5usize;
		for _ in 0..count {
			let tag = *bytes.get(pos).ok_or_else(|| {
				Error::He(veil_he::Error::CorruptedData(
					"database buffer ends mid-entry".to_string(),
				))
			})?;
			pos += 1;
			match tag {
				0 => plaintexts.push(None),
				1 => {
					if pos + per_plaintext > bytes.len() {
						return Err(veil_he::Error::CorruptedData(
							"database buffer ends mid-plaintext".to_string(),
						)
						.into());
					}
					let plaintext =
						Plaintext::from_bytes(&state, &bytes[pos..pos + per_plaintext])?;
					pos += per_plaintext;
					plaintexts.push(Some(plaintext));
				}
				tag => {
					return Err(veil_he::Error::CorruptedData(format!(
						"unknown database entry tag {tag}"
					))
					.into())
				}
			}
		}
		Ok(Self {
			plaintexts,
		})
	}

	/// Writes the database to `path` atomically.
	pub fn save(&self, path: &Path) -> Result<()> {
		let bytes = self.to_bytes()?;
		let temp = path.with_extension("tmp");
		fs::write(&temp, &bytes).map_err(|e| Error::Io(e.to_string()))?;
		fs::rename(&temp, path).map_err(|e| Error::Io(e.to_string()))?;
		tracing::debug!(path = %path.display(), bytes = bytes.len(), "processed database saved");
		Ok(())
	}

	/// Reads a database written by [`ProcessedDatabase::save`].
	pub fn load(context: &Context, path: &Path) -> Result<Self> {
		let bytes = fs::read(path).map_err(|e| Error::Io(e.to_string()))?;
		Self::from_bytes(context, &bytes)
	}

	/// Checks every stored plaintext is in evaluation form over `context`.
	pub(crate) fn validate(&self, context: &Context) -> Result<()> {
		for plaintext in self.plaintexts.iter().flatten() {
			if plaintext.representation() != Representation::Evaluation
				|| plaintext.poly().context() != context.top_context()
			{
				return Err(veil_he::Error::InvalidContext(
					"processed plaintexts must be evaluations over the top context".to_string(),
				)
				.into());
			}
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use veil_he::{EncodeFormat, Encoder, EncryptionParametersBuilder, SecurityLevel};

	fn context() -> Context {
		let params = EncryptionParametersBuilder::new()
			.set_poly_degree(8)
			.set_plaintext_modulus(17)
			.set_coefficient_moduli_sizes(&[18, 18])
			.set_security_level(SecurityLevel::Unchecked)
			.build()
			.unwrap();
		Context::new(&params).unwrap()
	}

	fn sample_database(context: &Context) -> ProcessedDatabase {
		let encoder = Encoder::new(context);
		let plaintext = encoder
			.encode(&[1, 2, 3, 4], EncodeFormat::Coefficient)
			.unwrap()
			.to_evaluation(context, 0)
			.unwrap();
		ProcessedDatabase::new(vec![Some(plaintext), None, None])
	}

	#[test]
	fn serialization_roundtrip_with_zero_tags() {
		let ctx = context();
		let db = sample_database(&ctx);
		let bytes = db.to_bytes().unwrap();
		assert_eq!(bytes.len(), db.serialized_byte_count(&ctx));
		let back = ProcessedDatabase::from_bytes(&ctx, &bytes).unwrap();
		assert_eq!(back, db);
	}

	#[test]
	fn version_and_tag_checks() {
		let ctx = context();
		let db = sample_database(&ctx);
		let mut bytes = db.to_bytes().unwrap();
		bytes[0] = 2;
		assert!(matches!(
			ProcessedDatabase::from_bytes(&ctx, &bytes).unwrap_err(),
			Error::InvalidDatabase(_)
		));
		bytes[0] = 1;
		bytes[5] = 7;
		assert!(matches!(
			ProcessedDatabase::from_bytes(&ctx, &bytes).unwrap_err(),
			Error::He(veil_he::Error::CorruptedData(_))
		));
		let short = &db.to_bytes().unwrap()[..8];
		assert!(matches!(
			ProcessedDatabase::from_bytes(&ctx, short).unwrap_err(),
			Error::He(veil_he::Error::CorruptedData(_))
		));
	}

	#[test]
	fn save_and_load_roundtrip() {
		let ctx = context();
		let db = sample_database(&ctx);
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("shard-0.bin");
		db.save(&path).unwrap();
		assert!(!path.with_extension("tmp").exists());
		let back = ProcessedDatabase::load(&ctx, &path).unwrap();
		assert_eq!(back, db);
	}
}
