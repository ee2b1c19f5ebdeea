//! Payment reference codec.
//!
//! Every protocol-related payment on the underlying chain carries a 256-bit
//! reference `(tag << 192) | id`, where the tag is a 64-bit constant built
//! from a fixed 48-bit protocol prefix and a 16-bit operation type, and the
//! id is a request id or an address masked to the low 192 bits. The
//! reference is the only link between an observed underlying payment and a
//! specific on-chain request, so all fraud detection hinges on this format.

use alloy_primitives::{Address, B256, U256};

/// Fixed 48-bit protocol prefix, ASCII `FBPRfA`.
pub const REFERENCE_PREFIX: [u8; 6] = [0x46, 0x42, 0x50, 0x52, 0x66, 0x41];

/// 16-bit operation tags. Values are part of the wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ReferenceType {
    Minting = 0x0001,
    Redemption = 0x0002,
    AnnouncedWithdrawal = 0x0003,
    Topup = 0x0011,
    SelfMint = 0x0012,
    AddressOwnership = 0x0013,
}

impl ReferenceType {
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            0x0001 => Some(ReferenceType::Minting),
            0x0002 => Some(ReferenceType::Redemption),
            0x0003 => Some(ReferenceType::AnnouncedWithdrawal),
            0x0011 => Some(ReferenceType::Topup),
            0x0012 => Some(ReferenceType::SelfMint),
            0x0013 => Some(ReferenceType::AddressOwnership),
            _ => None,
        }
    }
}

/// Encode a reference. Total and deterministic: the same tag and id always
/// produce the same bytes. The id is masked to its low 192 bits.
pub fn encode(tag: ReferenceType, id: U256) -> B256 {
    let mut out = [0u8; 32];
    out[0..6].copy_from_slice(&REFERENCE_PREFIX);
    out[6..8].copy_from_slice(&(tag as u16).to_be_bytes());
    let id_bytes: [u8; 32] = id.to_be_bytes();
    out[8..32].copy_from_slice(&id_bytes[8..32]);
    B256::from(out)
}

/// Reference for a collateral-reservation (minting) request.
pub fn minting(request_id: u64) -> B256 {
    encode(ReferenceType::Minting, U256::from(request_id))
}

/// Reference for a redemption request.
pub fn redemption(request_id: u64) -> B256 {
    encode(ReferenceType::Redemption, U256::from(request_id))
}

/// Reference for an announced underlying withdrawal.
pub fn announced_withdrawal(announcement_id: u64) -> B256 {
    encode(ReferenceType::AnnouncedWithdrawal, U256::from(announcement_id))
}

/// Reference for a free-balance topup payment to `agent_vault`'s account.
pub fn topup(agent_vault: Address) -> B256 {
    encode(ReferenceType::Topup, address_id(agent_vault))
}

/// Reference for a self-minting payment by `agent_vault`.
pub fn self_mint(agent_vault: Address) -> B256 {
    encode(ReferenceType::SelfMint, address_id(agent_vault))
}

/// Reference proving ownership of an underlying address by `owner`.
pub fn address_ownership(owner: Address) -> B256 {
    encode(ReferenceType::AddressOwnership, address_id(owner))
}

/// Whether the value matches the protocol prefix pattern. References that
/// fail this check must never be treated as legitimate by any caller.
pub fn is_valid(reference: &B256) -> bool {
    reference[0..6] == REFERENCE_PREFIX
}

/// The operation tag of a valid-prefix reference. `None` for a tag value
/// outside the known set; never panics.
pub fn decode_type(reference: &B256) -> Option<ReferenceType> {
    let tag = u16::from_be_bytes([reference[6], reference[7]]);
    ReferenceType::from_u16(tag)
}

/// The low-192-bit id of a reference.
pub fn decode_id(reference: &B256) -> U256 {
    U256::from_be_slice(&reference[8..32])
}

/// The low-160-bit id of a reference, interpreted as an address.
pub fn decode_address(reference: &B256) -> Address {
    Address::from_slice(&reference[12..32])
}

fn address_id(address: Address) -> U256 {
    U256::from_be_slice(address.as_slice())
}
