//! Index PIR with the MulPIR algorithm.
//!
//! The database is packed into a hyper-rectangle of plaintexts. A client
//! query is a binary indicator per dimension, compressed into a handful of
//! ciphertext coefficients; the server obliviously expands the compressed
//! ciphertexts through Galois automorphisms into one indicator ciphertext
//! per hyper-rectangle coordinate, collapses the second dimension with
//! plaintext products, and the first with ciphertext products. The response
//! is mod-switched to a single modulus and serialized with its trailing
//! coefficient bits dropped.

use rand::{CryptoRng, RngCore};

use veil_he::{
	BfvEvaluator, Ciphertext, CiphertextState, Context, Decryptor, EncodeFormat, Encoder,
	EvaluationKey, EvaluationKeyConfig, Evaluator, FromBytes, KeyCompression, KeyGenerator,
	Representation, SecretKey, SymmetricEncryptor, ToBytes,
};

use crate::config::PirConfig;
use crate::database::ProcessedDatabase;
use crate::error::{Error, Result};

/// Bits of noise budget a response must retain to be accepted at decryption.
pub const MIN_NOISE_BUDGET: f64 = 2.0;

fn ceil_log2(x: usize) -> usize {
	if x <= 1 {
		0
	} else {
		(usize::BITS - (x - 1).leading_zeros()) as usize
	}
}

/// The resolved shape of an index PIR deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexPirParameter {
	/// Number of database entries.
	pub entry_count: u64,
	/// Fixed byte size of every entry.
	pub entry_size_in_bytes: usize,
	/// Plaintext counts per hyper-rectangle axis.
	pub dimensions: Vec<usize>,
	/// Queries packed into one request.
	pub batch_size: usize,
	/// The evaluation key the server needs.
	pub evaluation_key_config: EvaluationKeyConfig,
}

impl IndexPirParameter {
	/// Entries packed into one plaintext.
	pub fn entries_per_plaintext(&self, context: &Context) -> usize {
		context.params().bytes_per_plaintext() / self.entry_size_in_bytes
	}

	/// Indicator positions per query.
	pub fn indicator_length(&self) -> usize {
		self.dimensions.iter().sum()
	}

	/// Compressed ciphertexts per query batch.
	pub fn query_ciphertext_count(&self, context: &Context) -> usize {
		let total = self.batch_size * self.indicator_length();
		total.div_ceil(context.params().poly_degree())
	}
}

/// Parameter selection and evaluation-key sizing for MulPIR.
pub struct MulPir;

impl MulPir {
	/// Resolves a [`PirConfig`] against a context.
	pub fn parameter(config: &PirConfig, context: &Context) -> Result<IndexPirParameter> {
		if config.entry_count == 0 || config.entry_size_in_bytes == 0 || config.batch_size == 0 {
			return Err(veil_he::Error::InvalidParameter(
				"entry count, entry size and batch size must be positive".to_string(),
			)
			.into());
		}
		if !(1..=2).contains(&config.dimension_count) {
			return Err(veil_he::Error::InvalidParameter(format!(
				"dimension count {} outside [1, 2]",
				config.dimension_count
			))
			.into());
		}
		let bytes_per_plaintext = context.params().bytes_per_plaintext();
		if config.entry_size_in_bytes > bytes_per_plaintext {
			return Err(veil_he::Error::InvalidParameter(format!(
				"entry size {} exceeds plaintext capacity {bytes_per_plaintext}",
				config.entry_size_in_bytes
			))
			.into());
		}
		let entries_per_plaintext = bytes_per_plaintext / config.entry_size_in_bytes;
		let plaintext_count =
			(config.entry_count as usize).div_ceil(entries_per_plaintext).max(1);
		let degree = context.params().poly_degree();

		let dimensions = match config.dimension_count {
			1 => vec![plaintext_count],
			_ => Self::two_dimensions(
				plaintext_count,
				degree,
				config.batch_size,
				config.uneven_dimensions,
				config.key_compression,
			)?,
		};
		let expanded_query_count = config.batch_size * dimensions.iter().sum::<usize>();
		let evaluation_key_config = Self::evaluation_key_config(
			expanded_query_count,
			degree,
			config.key_compression,
			config.dimension_count == 2,
		);
		Ok(IndexPirParameter {
			entry_count: config.entry_count,
			entry_size_in_bytes: config.entry_size_in_bytes,
			dimensions,
			batch_size: config.batch_size,
			evaluation_key_config,
		})
	}

	fn two_dimensions(
		plaintext_count: usize,
		degree: usize,
		batch_size: usize,
		uneven: bool,
		compression: KeyCompression,
	) -> Result<Vec<usize>> {
		if !uneven {
			let d0 = (plaintext_count as f64).sqrt().ceil() as usize;
			let d1 = plaintext_count.div_ceil(d0);
			if d0 + d1 > degree {
				return Err(veil_he::Error::InvalidParameter(format!(
					"{plaintext_count} plaintexts do not fit two dimensions at degree {degree}"
				))
				.into());
			}
			return Ok(vec![d0, d1]);
		}
		// Search for the split minimizing the evaluation key, then the
		// expanded query count, then lexicographically.
		let mut best: Option<(usize, usize, Vec<usize>)> = None;
		for d0 in 1..=plaintext_count.min(degree - 1) {
			let d1 = plaintext_count.div_ceil(d0);
			let sum = d0 + d1;
			if sum > degree {
				continue;
			}
			let per_ciphertext = degree.min(batch_size * sum);
			let keys =
				Self::expansion_galois_exponents(per_ciphertext, degree, compression).len();
			let candidate = (keys, sum, vec![d0, d1]);
			if best.as_ref().map_or(true, |b| candidate < *b) {
				best = Some(candidate);
			}
		}
		best.map(|(_, _, dims)| dims).ok_or_else(|| {
			veil_he::Error::InvalidParameter(format!(
				"{plaintext_count} plaintexts do not fit two dimensions at degree {degree}"
			))
			.into()
		})
	}

	/// The exponents `e` of the expansion Galois elements `2^e + 1`,
	/// thinned by the compression mode. Exponents below the
	/// self-composition threshold are always kept: a key `2^j + 1` only
	/// reaches `2^(j+1) + 1` by repeated application when `2j >= log2(2N)`.
	fn expansion_galois_exponents(
		per_ciphertext_outputs: usize,
		degree: usize,
		compression: KeyCompression,
	) -> Vec<usize> {
		if per_ciphertext_outputs <= 1 {
			return Vec::new();
		}
		let height = ceil_log2(per_ciphertext_outputs);
		let log_degree = degree.trailing_zeros() as usize;
		let threshold = (log_degree + 2) / 2;
		let all: Vec<usize> = (log_degree + 1 - height..=log_degree).collect();
		let (low, high): (Vec<usize>, Vec<usize>) = all.iter().partition(|&&e| e < threshold);
		let mut selected = low;
		match compression {
			KeyCompression::None => selected.extend(high),
			KeyCompression::Hybrid => selected.extend(high.iter().copied().step_by(2)),
			KeyCompression::Max => selected.extend(high.first().copied()),
		}
		selected
	}

	/// The evaluation key an expansion of `expanded_query_count` outputs
	/// needs at this degree and compression level.
	pub fn evaluation_key_config(
		expanded_query_count: usize,
		degree: usize,
		compression: KeyCompression,
		has_relinearization_key: bool,
	) -> EvaluationKeyConfig {
		let per_ciphertext = degree.min(expanded_query_count);
		let galois_elements = Self::expansion_galois_exponents(per_ciphertext, degree, compression)
			.into_iter()
			.map(|e| (1u64 << e) + 1)
			.collect();
		EvaluationKeyConfig {
			galois_elements,
			has_relinearization_key,
		}
	}
}

/// Mixed-radix coordinates of a plaintext index over the dimensions.
fn coordinates(mut index: usize, dimensions: &[usize]) -> Vec<usize> {
	let mut coords = vec![0usize; dimensions.len()];
	for (i, &d) in dimensions.iter().enumerate().rev() {
		coords[i] = index % d;
		index /= d;
	}
	coords
}

/// A compressed client query.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
	ciphertexts: Vec<Ciphertext>,
}

/// A server response, one ciphertext per batched query.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
	ciphertexts: Vec<Ciphertext>,
}

fn ciphertexts_to_bytes(
	ciphertexts: &[Ciphertext],
	serialize: impl Fn(&Ciphertext) -> Result<Vec<u8>>,
) -> Result<Vec<u8>> {
	let mut out = Vec::new();
	out.extend_from_slice(&(ciphertexts.len() as u32).to_le_bytes());
	for ct in ciphertexts {
		let bytes = serialize(ct)?;
		out.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
		out.extend_from_slice(&bytes);
	}
	Ok(out)
}

fn ciphertexts_from_bytes(bytes: &[u8], state: &CiphertextState) -> Result<Vec<Ciphertext>> {
	let short =
		|| Error::He(veil_he::Error::CorruptedData("ciphertext list too short".to_string()));
	if bytes.len() < 4 {
		return Err(short());
	}
	let count = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
	let mut pos = 4usize;
	let mut out = Vec::with_capacity(count);
	for _ in 0..count {
		if pos + 4 > bytes.len() {
			return Err(short());
		}
		let len = u32::from_le_bytes([
			bytes[pos],
			bytes[pos + 1],
			bytes[pos + 2],
			bytes[pos + 3],
		]) as usize;
		pos += 4;
		if pos + len > bytes.len() {
			return Err(short());
		}
		out.push(Ciphertext::from_bytes(state, &bytes[pos..pos + len])?);
		pos += len;
	}
	Ok(out)
}

impl Query {
	/// The compressed ciphertexts.
	pub fn ciphertexts(&self) -> &[Ciphertext] {
		&self.ciphertexts
	}

	/// Serializes the query; fresh queries stay in seeded form.
	pub fn to_bytes(&self) -> Result<Vec<u8>> {
		ciphertexts_to_bytes(&self.ciphertexts, |ct| Ok(ct.as_bytes()?))
	}

	/// Deserializes a query at the top of the modulus chain.
	pub fn from_bytes(context: &Context, bytes: &[u8]) -> Result<Self> {
		let state = CiphertextState {
			context: context.clone(),
			level: 0,
			poly_count: 2,
			representation: Representation::Coefficient,
		};
		Ok(Self {
			ciphertexts: ciphertexts_from_bytes(bytes, &state)?,
		})
	}
}

impl Response {
	/// The response ciphertexts, in query order.
	pub fn ciphertexts(&self) -> &[Ciphertext] {
		&self.ciphertexts
	}

	/// Serializes the response, dropping low coefficient bits that do not
	/// affect decryption.
	pub fn to_bytes(&self, context: &Context) -> Result<Vec<u8>> {
		let t = context.params().plaintext_modulus();
		ciphertexts_to_bytes(&self.ciphertexts, |ct| {
			let skips = ct.skip_lsbs_for_decryption(t);
			Ok(ct.as_bytes_with_skip_lsbs(&skips)?)
		})
	}

	/// Deserializes a response at the bottom of the modulus chain.
	pub fn from_bytes(context: &Context, bytes: &[u8]) -> Result<Self> {
		let state = CiphertextState {
			context: context.clone(),
			level: context.chain_length() - 1,
			poly_count: 2,
			representation: Representation::Coefficient,
		};
		Ok(Self {
			ciphertexts: ciphertexts_from_bytes(bytes, &state)?,
		})
	}
}

/// The querying side of index PIR.
pub struct IndexPirClient {
	context: Context,
	parameter: IndexPirParameter,
	secret_key: SecretKey,
	encoder: Encoder,
	encryptor: SymmetricEncryptor,
	decryptor: Decryptor,
}

impl IndexPirClient {
	/// Creates a client for one deployment.
	pub fn new(context: &Context, parameter: IndexPirParameter, secret_key: &SecretKey) -> Self {
		Self {
			context: context.clone(),
			parameter,
			secret_key: secret_key.clone(),
			encoder: Encoder::new(context),
			encryptor: SymmetricEncryptor::new(context, secret_key),
			decryptor: Decryptor::new(context, secret_key),
		}
	}

	/// The resolved parameters.
	pub fn parameter(&self) -> &IndexPirParameter {
		&self.parameter
	}

	/// Generates the evaluation key the server needs for this deployment.
	pub fn generate_evaluation_key<R: RngCore + CryptoRng>(
		&self,
		rng: &mut R,
	) -> Result<EvaluationKey> {
		let generator = KeyGenerator::from_secret_key(&self.context, self.secret_key.clone());
		Ok(generator.create_evaluation_key(&self.parameter.evaluation_key_config, rng)?)
	}

	/// Builds the compressed query for one entry index per batch position.
	///
	/// Each index turns into a binary indicator over the hyper-rectangle
	/// coordinates; the indicators are concatenated and packed into
	/// coefficients carrying `inverse(2^height)` so the expansion's doubling
	/// cancels exactly.
	pub fn generate_query<R: RngCore + CryptoRng>(
		&self,
		indices: &[u64],
		rng: &mut R,
	) -> Result<Query> {
		if indices.len() != self.parameter.batch_size {
			return Err(veil_he::Error::InvalidParameter(format!(
				"{} indices for batch size {}",
				indices.len(),
				self.parameter.batch_size
			))
			.into());
		}
		let degree = self.context.params().poly_degree();
		let entries_per_plaintext = self.parameter.entries_per_plaintext(&self.context);
		let indicator_length = self.parameter.indicator_length();
		let total = self.parameter.batch_size * indicator_length;
		let plain = self.context.plain_modulus();

		let mut positions = Vec::with_capacity(indices.len() * self.parameter.dimensions.len());
		for (query_index, &index) in indices.iter().enumerate() {
			if index >= self.parameter.entry_count {
				return Err(veil_he::Error::InvalidParameter(format!(
					"index {index} outside [0, {})",
					self.parameter.entry_count
				))
				.into());
			}
			let plaintext_index = index as usize / entries_per_plaintext;
			let coords = coordinates(plaintext_index, &self.parameter.dimensions);
			let mut offset = query_index * indicator_length;
			for (coord, &dim) in coords.iter().zip(&self.parameter.dimensions) {
				positions.push(offset + coord);
				offset += dim;
			}
		}

		let mut ciphertexts = Vec::with_capacity(total.div_ceil(degree));
		for chunk_index in 0..total.div_ceil(degree) {
			let base = chunk_index * degree;
			let input_count = degree.min(total - base);
			let height = ceil_log2(input_count);
			let value = plain
				.inverse_vartime(plain.pow_vartime(2, height as u64))
				.ok_or_else(|| {
					veil_he::Error::InvalidParameter(
						"expansion scaling is not invertible modulo t".to_string(),
					)
				})?;
			let mut coefficients = vec![0u64; degree];
			for &position in positions.iter() {
				if position >= base && position < base + input_count {
					coefficients[position - base] = value;
				}
			}
			let plaintext = self.encoder.encode(&coefficients, EncodeFormat::Coefficient)?;
			let mut ciphertext = self.encryptor.encrypt(&plaintext, rng)?;
			ciphertext.change_representation(Representation::Coefficient)?;
			ciphertexts.push(ciphertext);
		}
		Ok(Query {
			ciphertexts,
		})
	}

	/// Decrypts a response for the indices the query was built from.
	///
	/// Fails with [`veil_he::Error::NoiseBudgetExhausted`] when a response
	/// ciphertext retains less than [`MIN_NOISE_BUDGET`] bits.
	pub fn decrypt_response(&self, response: &Response, indices: &[u64]) -> Result<Vec<Vec<u8>>> {
		if response.ciphertexts.len() != indices.len() {
			return Err(veil_he::Error::InvalidParameter(format!(
				"{} response ciphertexts for {} indices",
				response.ciphertexts.len(),
				indices.len()
			))
			.into());
		}
		let entries_per_plaintext = self.parameter.entries_per_plaintext(&self.context);
		let entry_size = self.parameter.entry_size_in_bytes;
		let mut entries = Vec::with_capacity(indices.len());
		for (ciphertext, &index) in response.ciphertexts.iter().zip(indices) {
			let budget = self.decryptor.noise_budget_vartime(ciphertext)?;
			if budget < MIN_NOISE_BUDGET {
				return Err(veil_he::Error::NoiseBudgetExhausted {
					budget,
				}
				.into());
			}
			let plaintext = self.decryptor.decrypt(ciphertext)?;
			let bytes = self
				.encoder
				.decode_bytes(&plaintext, self.context.params().bytes_per_plaintext())?;
			let offset = (index as usize % entries_per_plaintext) * entry_size;
			entries.push(bytes[offset..offset + entry_size].to_vec());
		}
		Ok(entries)
	}

	/// The smallest noise budget across a response's ciphertexts.
	pub fn response_noise_budget(&self, response: &Response) -> Result<f64> {
		let mut min = f64::INFINITY;
		for ciphertext in &response.ciphertexts {
			min = min.min(self.decryptor.noise_budget_vartime(ciphertext)?);
		}
		Ok(min)
	}
}

/// The serving side of index PIR.
pub struct IndexPirServer {
	context: Context,
	parameter: IndexPirParameter,
	database: ProcessedDatabase,
	evaluator: BfvEvaluator,
}

impl IndexPirServer {
	/// Packs raw entries into the hyper-rectangle of plaintexts.
	pub fn process_database(
		context: &Context,
		parameter: &IndexPirParameter,
		entries: &[Vec<u8>],
	) -> Result<ProcessedDatabase> {
		if entries.is_empty() {
			return Err(Error::InvalidDatabase("empty database".to_string()));
		}
		if entries.len() as u64 != parameter.entry_count {
			return Err(Error::InvalidDatabase(format!(
				"{} entries, parameters expect {}",
				entries.len(),
				parameter.entry_count
			)));
		}
		let entry_size = parameter.entry_size_in_bytes;
		if let Some(oversized) = entries.iter().find(|e| e.len() > entry_size) {
			return Err(Error::InvalidDatabase(format!(
				"entry of {} bytes exceeds the configured size {entry_size}",
				oversized.len()
			)));
		}
		let encoder = Encoder::new(context);
		let entries_per_plaintext = parameter.entries_per_plaintext(context);
		let cell_count: usize = parameter.dimensions.iter().product();
		let mut plaintexts = Vec::with_capacity(cell_count);
		for group in entries.chunks(entries_per_plaintext) {
			let mut buffer = vec![0u8; entries_per_plaintext * entry_size];
			for (i, entry) in group.iter().enumerate() {
				buffer[i * entry_size..i * entry_size + entry.len()].copy_from_slice(entry);
			}
			if buffer.iter().all(|&b| b == 0) {
				plaintexts.push(None);
			} else {
				let plaintext = encoder.encode_bytes(&buffer)?.to_evaluation(context, 0)?;
				plaintexts.push(Some(plaintext));
			}
		}
		if plaintexts.len() > cell_count {
			return Err(Error::InvalidDatabase(format!(
				"{} plaintexts overflow the {cell_count}-cell hyper-rectangle",
				plaintexts.len()
			)));
		}
		plaintexts.resize(cell_count, None);
		tracing::info!(
			entries = entries.len(),
			plaintexts = cell_count,
			dimensions = ?parameter.dimensions,
			"database processed"
		);
		Ok(ProcessedDatabase::new(plaintexts))
	}

	/// Creates a server over a processed database.
	pub fn new(
		context: &Context,
		parameter: IndexPirParameter,
		database: ProcessedDatabase,
	) -> Result<Self> {
		database.validate(context)?;
		let cell_count: usize = parameter.dimensions.iter().product();
		if database.plaintext_count() != cell_count {
			return Err(Error::InvalidDatabase(format!(
				"database holds {} plaintexts, parameters expect {cell_count}",
				database.plaintext_count()
			)));
		}
		Ok(Self {
			context: context.clone(),
			parameter,
			database,
			evaluator: BfvEvaluator::new(context),
		})
	}

	/// The resolved parameters.
	pub fn parameter(&self) -> &IndexPirParameter {
		&self.parameter
	}

	/// Expands a query and multiplies it through the database dimensions.
	pub fn compute_response(
		&self,
		query: &Query,
		evaluation_key: &EvaluationKey,
	) -> Result<Response> {
		let expanded = self.expand_query(query, evaluation_key)?;
		let indicator_length = self.parameter.indicator_length();
		let mut ciphertexts = Vec::with_capacity(self.parameter.batch_size);
		for batch_index in 0..self.parameter.batch_size {
			let slice = &expanded[batch_index * indicator_length..][..indicator_length];
			let ciphertext = self.compute_single_response(slice, evaluation_key)?;
			let switched = self.evaluator.mod_switch_down_to_single(&ciphertext)?;
			let mut coefficient = switched;
			coefficient.change_representation(Representation::Coefficient)?;
			ciphertexts.push(coefficient);
		}
		Ok(Response {
			ciphertexts,
		})
	}

	/// Obliviously expands the compressed query into one indicator
	/// ciphertext per hyper-rectangle coordinate, in client order.
	fn expand_query(
		&self,
		query: &Query,
		evaluation_key: &EvaluationKey,
	) -> Result<Vec<Ciphertext>> {
		let degree = self.context.params().poly_degree();
		let total = self.parameter.batch_size * self.parameter.indicator_length();
		let expected = total.div_ceil(degree);
		if query.ciphertexts.len() != expected {
			return Err(veil_he::Error::InvalidParameter(format!(
				"query holds {} ciphertexts, expected {expected}",
				query.ciphertexts.len()
			))
			.into());
		}
		let mut outputs = Vec::with_capacity(total);
		for (chunk_index, ciphertext) in query.ciphertexts.iter().enumerate() {
			let output_count = degree.min(total - chunk_index * degree);
			let mut ciphertext = ciphertext.clone();
			ciphertext.materialize()?;
			ciphertext.change_representation(Representation::Coefficient)?;
			let expanded = self.expand_ciphertext(
				ciphertext,
				output_count,
				1,
				ceil_log2(output_count),
				evaluation_key,
			)?;
			outputs.extend(expanded);
		}
		Ok(outputs)
	}

	/// One level of the expansion: splits a ciphertext into the even and odd
	/// coefficient halves, each doubled into its own ciphertext.
	fn expand_ciphertext_for_one_step(
		&self,
		ciphertext: &Ciphertext,
		log_step: usize,
		evaluation_key: &EvaluationKey,
	) -> Result<(Ciphertext, Ciphertext)> {
		let log_degree = self.context.params().poly_degree().trailing_zeros() as usize;
		let element = (1u64 << (log_degree - log_step + 1)) + 1;
		let galoised = self.evaluator.apply_galois(ciphertext, element, evaluation_key)?;
		let even = self.evaluator.add(ciphertext, &galoised)?;
		let difference = self.evaluator.sub(ciphertext, &galoised)?;
		let odd = self
			.evaluator
			.multiply_power_of_x(&difference, -(1i64 << (log_step - 1)))?;
		Ok((even, odd))
	}

	fn expand_ciphertext(
		&self,
		ciphertext: Ciphertext,
		output_count: usize,
		log_step: usize,
		expected_height: usize,
		evaluation_key: &EvaluationKey,
	) -> Result<Vec<Ciphertext>> {
		if output_count == 1 {
			// Equalize the doubling factor across leaves that surfaced a
			// level early.
			if log_step > expected_height {
				return Ok(vec![ciphertext]);
			}
			let doubled = self.evaluator.add(&ciphertext, &ciphertext)?;
			return Ok(vec![doubled]);
		}
		let (even, odd) =
			self.expand_ciphertext_for_one_step(&ciphertext, log_step, evaluation_key)?;
		let first = self.expand_ciphertext(
			even,
			output_count.div_ceil(2),
			log_step + 1,
			expected_height,
			evaluation_key,
		)?;
		let second = self.expand_ciphertext(
			odd,
			output_count / 2,
			log_step + 1,
			expected_height,
			evaluation_key,
		)?;
		let mut out = Vec::with_capacity(output_count);
		for (i, ct) in first.into_iter().enumerate() {
			out.push(ct);
			if i < second.len() {
				out.push(second[i].clone());
			}
		}
		Ok(out)
	}

	/// Collapses the database against one expanded indicator.
	fn compute_single_response(
		&self,
		expanded: &[Ciphertext],
		evaluation_key: &EvaluationKey,
	) -> Result<Ciphertext> {
		let cells = self.database.plaintexts();
		match self.parameter.dimensions.len() {
			1 => {
				let mut acc: Option<Ciphertext> = None;
				for (indicator, cell) in expanded.iter().zip(cells) {
					if let Some(plaintext) = cell {
						let term = self
							.evaluator
							.multiply_plain(indicator, plaintext)
							.map_err(|e| Error::from(e).in_dimension(0))?;
						acc = Some(match acc.take() {
							Some(mut sum) => {
								self.evaluator.add_inplace(&mut sum, &term)?;
								sum
							}
							None => term,
						});
					}
				}
				Ok(acc.unwrap_or_else(|| {
					Ciphertext::transparent_zero(
						self.context.top_context(),
						Representation::Coefficient,
					)
				}))
			}
			_ => {
				let (d0, d1) = (self.parameter.dimensions[0], self.parameter.dimensions[1]);
				let (first_dim, second_dim) = expanded.split_at(d0);
				let mut acc: Option<Ciphertext> = None;
				for (r, outer) in first_dim.iter().enumerate() {
					// Collapse the second dimension with plaintext products.
					let mut row_acc: Option<Ciphertext> = None;
					for (c, indicator) in second_dim.iter().enumerate() {
						if let Some(plaintext) = &cells[r * d1 + c] {
							let term = self
								.evaluator
								.multiply_plain(indicator, plaintext)
								.map_err(|e| Error::from(e).in_dimension(1))?;
							row_acc = Some(match row_acc.take() {
								Some(mut sum) => {
									self.evaluator.add_inplace(&mut sum, &term)?;
									sum
								}
								None => term,
							});
						}
					}
					// Fold the surviving row into the first dimension with a
					// ciphertext product.
					if let Some(row) = row_acc {
						let product = self
							.evaluator
							.multiply(outer, &row)
							.map_err(|e| Error::from(e).in_dimension(0))?;
						acc = Some(match acc.take() {
							Some(mut sum) => {
								self.evaluator.add_inplace(&mut sum, &product)?;
								sum
							}
							None => product,
						});
					}
				}
				match acc {
					None => Ok(Ciphertext::transparent_zero(
						self.context.top_context(),
						Representation::Coefficient,
					)),
					Some(ct) if ct.poly_count() == 3 => {
						Ok(self.evaluator.relinearize(&ct, evaluation_key)?)
					}
					Some(ct) => Ok(ct),
				}
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::config::{Algorithm, PirConfig};
	use rand::{thread_rng, Rng};
	use veil_he::{EncryptionParametersBuilder, SecurityLevel};

	fn pir_context() -> Context {
		let params = EncryptionParametersBuilder::new()
			.set_poly_degree(64)
			.set_plaintext_modulus(257)
			.set_coefficient_moduli_sizes(&[40, 40, 40])
			.set_security_level(SecurityLevel::Unchecked)
			.build()
			.unwrap();
		Context::new(&params).unwrap()
	}

	fn pir_config() -> PirConfig {
		PirConfig {
			algorithm: Algorithm::MulPir,
			entry_count: 100,
			entry_size_in_bytes: 24,
			dimension_count: 2,
			batch_size: 2,
			uneven_dimensions: true,
			key_compression: KeyCompression::None,
		}
	}

	fn entries(count: usize, size: usize) -> Vec<Vec<u8>> {
		(0..count)
			.map(|i| (0..size).map(|j| ((i * 31 + j * 7) % 251) as u8 + 1).collect())
			.collect()
	}

	#[test]
	fn parameter_selection_minimizes_uneven_dimensions() {
		let ctx = pir_context();
		let parameter = MulPir::parameter(&pir_config(), &ctx).unwrap();
		// 100 entries at 24 bytes pack 2 per 64-byte plaintext: 50 cells.
		// The cheapest split with d0*d1 >= 50 and minimal d0+d1 is (5, 10).
		assert_eq!(parameter.dimensions, vec![5, 10]);
		assert_eq!(parameter.entries_per_plaintext(&ctx), 2);
		assert_eq!(parameter.query_ciphertext_count(&ctx), 1);
		assert!(parameter.evaluation_key_config.has_relinearization_key);
		// Expansion of 30 outputs at degree 64 needs heights 2..=6.
		assert_eq!(
			parameter.evaluation_key_config.galois_elements,
			vec![5, 9, 17, 33, 65]
		);
	}

	#[test]
	fn parameter_selection_balanced_dimensions() {
		let ctx = pir_context();
		let config = PirConfig {
			uneven_dimensions: false,
			..pir_config()
		};
		let parameter = MulPir::parameter(&config, &ctx).unwrap();
		assert_eq!(parameter.dimensions, vec![8, 7]);
	}

	#[test]
	fn parameter_selection_single_dimension() {
		let ctx = pir_context();
		let config = PirConfig {
			dimension_count: 1,
			..pir_config()
		};
		let parameter = MulPir::parameter(&config, &ctx).unwrap();
		assert_eq!(parameter.dimensions, vec![50]);
		assert!(!parameter.evaluation_key_config.has_relinearization_key);
	}

	#[test]
	fn oversized_entries_are_rejected() {
		let ctx = pir_context();
		let config = PirConfig {
			entry_size_in_bytes: 1000,
			..pir_config()
		};
		assert!(MulPir::parameter(&config, &ctx).is_err());
	}

	#[test]
	fn key_compression_thins_the_evaluation_key() {
		let none = MulPir::evaluation_key_config(64, 64, KeyCompression::None, false);
		let hybrid = MulPir::evaluation_key_config(64, 64, KeyCompression::Hybrid, false);
		let max = MulPir::evaluation_key_config(64, 64, KeyCompression::Max, false);
		assert!(none.galois_elements.len() >= hybrid.galois_elements.len());
		assert!(hybrid.galois_elements.len() >= max.galois_elements.len());
		// Every thinned key set is a subset of the full one.
		for e in &hybrid.galois_elements {
			assert!(none.galois_elements.contains(e));
		}
		for e in &max.galois_elements {
			assert!(hybrid.galois_elements.contains(e));
		}
	}

	#[test]
	fn expansion_recovers_the_indicator() {
		let ctx = pir_context();
		let parameter = MulPir::parameter(&pir_config(), &ctx).unwrap();
		let mut rng = thread_rng();
		let sk = ctx.generate_secret_key(&mut rng).unwrap();
		let client = IndexPirClient::new(&ctx, parameter.clone(), &sk);
		let evk = client.generate_evaluation_key(&mut rng).unwrap();

		let database = IndexPirServer::process_database(&ctx, &parameter, &entries(100, 24)).unwrap();
		let server = IndexPirServer::new(&ctx, parameter.clone(), database).unwrap();

		let indices = [13u64, 77];
		let query = client.generate_query(&indices, &mut rng).unwrap();
		let expanded = server.expand_query(&query, &evk).unwrap();
		assert_eq!(expanded.len(), 2 * parameter.indicator_length());

		// Recompute the expected indicator positions.
		let decryptor = veil_he::Decryptor::new(&ctx, &sk);
		let encoder = Encoder::new(&ctx);
		let mut expected = vec![0u64; expanded.len()];
		for (qi, &index) in indices.iter().enumerate() {
			let cell = index as usize / 2;
			let coords = [cell / 10, cell % 10];
			expected[qi * 15 + coords[0]] = 1;
			expected[qi * 15 + 5 + coords[1]] = 1;
		}
		for (ct, &bit) in expanded.iter().zip(&expected) {
			let decoded = encoder
				.decode(&decryptor.decrypt(ct).unwrap(), EncodeFormat::Coefficient)
				.unwrap();
			assert_eq!(decoded[0], bit);
			assert!(decoded[1..].iter().all(|&c| c == 0));
		}
	}

	#[test]
	fn end_to_end_batched_retrieval() {
		let ctx = pir_context();
		let parameter = MulPir::parameter(&pir_config(), &ctx).unwrap();
		let mut rng = thread_rng();
		let sk = ctx.generate_secret_key(&mut rng).unwrap();
		let client = IndexPirClient::new(&ctx, parameter.clone(), &sk);
		let evk = client.generate_evaluation_key(&mut rng).unwrap();

		let rows = entries(100, 24);
		let database = IndexPirServer::process_database(&ctx, &parameter, &rows).unwrap();
		let server = IndexPirServer::new(&ctx, parameter.clone(), database).unwrap();

		for _ in 0..10 {
			let indices = [rng.gen_range(0..100u64), rng.gen_range(0..100u64)];
			let query = client.generate_query(&indices, &mut rng).unwrap();

			// Over the wire and back.
			let query = Query::from_bytes(&ctx, &query.to_bytes().unwrap()).unwrap();
			let response = server.compute_response(&query, &evk).unwrap();
			let response =
				Response::from_bytes(&ctx, &response.to_bytes(&ctx).unwrap()).unwrap();

			let retrieved = client.decrypt_response(&response, &indices).unwrap();
			assert_eq!(retrieved[0], rows[indices[0] as usize], "index {}", indices[0]);
			assert_eq!(retrieved[1], rows[indices[1] as usize], "index {}", indices[1]);
		}
	}

	#[test]
	fn zero_groups_are_elided_and_still_retrievable() {
		let ctx = pir_context();
		let parameter = MulPir::parameter(&pir_config(), &ctx).unwrap();
		let mut rng = thread_rng();
		let sk = ctx.generate_secret_key(&mut rng).unwrap();
		let client = IndexPirClient::new(&ctx, parameter.clone(), &sk);
		let evk = client.generate_evaluation_key(&mut rng).unwrap();

		let mut rows = entries(100, 24);
		rows[10] = vec![0u8; 24];
		rows[11] = vec![0u8; 24];
		let database = IndexPirServer::process_database(&ctx, &parameter, &rows).unwrap();
		assert!(database.plaintexts()[5].is_none());
		let server = IndexPirServer::new(&ctx, parameter.clone(), database).unwrap();

		let indices = [10u64, 12];
		let query = client.generate_query(&indices, &mut rng).unwrap();
		let response = server.compute_response(&query, &evk).unwrap();
		let retrieved = client.decrypt_response(&response, &indices).unwrap();
		assert_eq!(retrieved[0], vec![0u8; 24]);
		assert_eq!(retrieved[1], rows[12]);
	}

	#[test]
	fn max_compression_still_expands() {
		let ctx = pir_context();
		let config = PirConfig {
			key_compression: KeyCompression::Max,
			batch_size: 1,
			..pir_config()
		};
		let parameter = MulPir::parameter(&config, &ctx).unwrap();
		assert!(parameter.evaluation_key_config.galois_elements.len() < 5);
		let mut rng = thread_rng();
		let sk = ctx.generate_secret_key(&mut rng).unwrap();
		let client = IndexPirClient::new(&ctx, parameter.clone(), &sk);
		let evk = client.generate_evaluation_key(&mut rng).unwrap();

		let rows = entries(100, 24);
		let database = IndexPirServer::process_database(&ctx, &parameter, &rows).unwrap();
		let server = IndexPirServer::new(&ctx, parameter.clone(), database).unwrap();

		let indices = [42u64];
		let query = client.generate_query(&indices, &mut rng).unwrap();
		let response = server.compute_response(&query, &evk).unwrap();
		let retrieved = client.decrypt_response(&response, &indices).unwrap();
		assert_eq!(retrieved[0], rows[42]);
	}

	#[test]
	fn wrong_query_shape_is_rejected() {
		let ctx = pir_context();
		let parameter = MulPir::parameter(&pir_config(), &ctx).unwrap();
		let mut rng = thread_rng();
		let sk = ctx.generate_secret_key(&mut rng).unwrap();
		let client = IndexPirClient::new(&ctx, parameter, &sk);
		assert!(client.generate_query(&[1], &mut rng).is_err());
		assert!(client.generate_query(&[1, 200], &mut rng).is_err());
	}
}
