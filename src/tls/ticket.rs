//! Stateless session tickets over a ring of rotating keys.
//!
//! Ticket layout: `name(16) | nonce(12) | AES-128-GCM(state) | HMAC-SHA256(32)`,
//! the HMAC covering everything before it. The first key encrypts, every
//! key in the ring is tried for decryption by name.

use std::sync::Arc;

use ring::aead::{AES_128_GCM, Aad, LessSafeKey, NONCE_LEN, Nonce, UnboundKey};
use ring::hmac;
use ring::rand::{SecureRandom, SystemRandom};
use rustls::server::ProducesTickets;

use super::TICKET_KEY_LEN;
use super::context::Shared;
use super::hooks;
use super::TicketGeneration;
use crate::{Error, Result};

const NAME_LEN: usize = 16;
const TAG_LEN: usize = 32;

pub(crate) struct TicketKey {
	name: [u8; NAME_LEN],
	aead: LessSafeKey,
	hmac: hmac::Key,
}

impl TicketKey {
	fn new(raw: &[u8]) -> Result<Self> {
		let mut name = [0u8; NAME_LEN];
		name.copy_from_slice(&raw[..NAME_LEN]);
		let unbound = UnboundKey::new(&AES_128_GCM, &raw[NAME_LEN..32])
			.map_err(|_| Error::TlsConfig("invalid ticket AES key".into()))?;
		Ok(Self {
			name,
			aead: LessSafeKey::new(unbound),
			hmac: hmac::Key::new(hmac::HMAC_SHA256, &raw[32..TICKET_KEY_LEN]),
		})
	}
}

/// Parsed ticket key ring, in priority order.
pub(crate) struct TicketKeys {
	keys: Vec<TicketKey>,
	rng: SystemRandom,
}

impl TicketKeys {
	/// `raw` holds one or more concatenated 48-byte key records.
	pub(crate) fn parse(raw: &[u8]) -> Result<Self> {
		if raw.is_empty() || raw.len() % TICKET_KEY_LEN != 0 {
			return Err(Error::IllegalArgument(format!(
				"ticket keys must be a non-empty multiple of {} bytes, got {}",
				TICKET_KEY_LEN,
				raw.len()
			)));
		}
		let keys = raw.chunks_exact(TICKET_KEY_LEN).map(TicketKey::new).collect::<Result<Vec<_>>>()?;
		Ok(Self { keys, rng: SystemRandom::new() })
	}

	pub(crate) fn len(&self) -> usize {
		self.keys.len()
	}

	pub(crate) fn encrypt(&self, plain: &[u8]) -> Option<Vec<u8>> {
		let key = self.keys.first()?;
		let mut nonce = [0u8; NONCE_LEN];
		self.rng.fill(&mut nonce).ok()?;

		let mut out = Vec::with_capacity(NAME_LEN + NONCE_LEN + plain.len() + AES_128_GCM.tag_len() + TAG_LEN);
		out.extend_from_slice(&key.name);
		out.extend_from_slice(&nonce);
		let mut sealed = plain.to_vec();
		key.aead
			.seal_in_place_append_tag(Nonce::assume_unique_for_key(nonce), Aad::from(&key.name), &mut sealed)
			.ok()?;
		out.extend_from_slice(&sealed);
		let tag = hmac::sign(&key.hmac, &out);
		out.extend_from_slice(tag.as_ref());
		Some(out)
	}

	/// Returns the plaintext and the position of the key that opened it.
	pub(crate) fn decrypt(&self, ticket: &[u8]) -> Option<(Vec<u8>, usize)> {
		if ticket.len() < NAME_LEN + NONCE_LEN + AES_128_GCM.tag_len() + TAG_LEN {
			return None;
		}
		let (index, key) = self.keys.iter().enumerate().find(|(_, k)| k.name[..] == ticket[..NAME_LEN])?;
		let (body, tag) = ticket.split_at(ticket.len() - TAG_LEN);
		hmac::verify(&key.hmac, body, tag).ok()?;

		let mut nonce = [0u8; NONCE_LEN];
		nonce.copy_from_slice(&body[NAME_LEN..NAME_LEN + NONCE_LEN]);
		let mut sealed = body[NAME_LEN + NONCE_LEN..].to_vec();
		let plain = key
			.aead
			.open_in_place(Nonce::assume_unique_for_key(nonce), Aad::from(&key.name), &mut sealed)
			.ok()?;
		Some((plain.to_vec(), index))
	}
}

/// rustls ticketer reading the context's current key ring.
pub(crate) struct Ticketer {
	pub(crate) shared: Arc<Shared>,
}

impl std::fmt::Debug for Ticketer {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Ticketer").finish_non_exhaustive()
	}
}

impl ProducesTickets for Ticketer {
	fn enabled(&self) -> bool {
		self.shared.state.read().tickets.is_some()
	}

	fn lifetime(&self) -> u32 {
		self.shared.state.read().timeout
	}

	fn encrypt(&self, plain: &[u8]) -> Option<Vec<u8>> {
		let ticket = self.shared.state.read().tickets.as_ref()?.encrypt(plain)?;
		hooks::note_ticket(TicketGeneration::New);
		Some(ticket)
	}

	fn decrypt(&self, cipher: &[u8]) -> Option<Vec<u8>> {
		let state = self.shared.state.read();
		let (plain, index) = state.tickets.as_ref()?.decrypt(cipher)?;
		hooks::note_ticket(if index == 0 { TicketGeneration::Primary } else { TicketGeneration::Secondary });
		Some(plain)
	}
}
