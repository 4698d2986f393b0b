use std::fmt;

pub type TimeSlot = u32;
pub type Epoch = u32;
pub type ServiceId = u32;
pub type CoreIndex = u16;
pub type ValidatorIndex = u16;
pub type Gas = u64;
pub type Balance = u64;

pub const HASH_LEN: usize = 32;
pub const ED25519_SIGNATURE_LEN: usize = 64;
pub const VRF_SIGNATURE_LEN: usize = 96;
pub const RING_PROOF_LEN: usize = 784;
pub const RING_COMMITMENT_LEN: usize = 144;
pub const BLS_KEY_LEN: usize = 144;
pub const VALIDATOR_METADATA_LEN: usize = 128;

/// 32-byte opaque hash. Also used for Ed25519 and Bandersnatch public keys,
/// which share the compressed 32-byte representation.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Hash32(pub [u8; HASH_LEN]);

impl Hash32 {
    pub const ZERO: Hash32 = Hash32([0u8; HASH_LEN]);

    pub fn as_bytes(&self) -> &[u8; HASH_LEN] {
        &self.0
    }

    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let arr: [u8; HASH_LEN] = bytes.try_into().ok()?;
        Some(Self(arr))
    }
}

impl fmt::Debug for Hash32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Display for Hash32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl From<[u8; HASH_LEN]> for Hash32 {
    fn from(value: [u8; HASH_LEN]) -> Self {
        Self(value)
    }
}

impl AsRef<[u8]> for Hash32 {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// An Ed25519 signature in wire form.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Ed25519Signature(pub [u8; ED25519_SIGNATURE_LEN]);

impl fmt::Debug for Ed25519Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ed25519:0x{}..", hex::encode(&self.0[..8]))
    }
}

/// A Bandersnatch VRF signature (IETF flavour): 96 bytes, carries a
/// deterministic 32-byte output recoverable by the verifier.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct VrfSignature(pub [u8; VRF_SIGNATURE_LEN]);

impl fmt::Debug for VrfSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "vrf:0x{}..", hex::encode(&self.0[..8]))
    }
}

/// A Bandersnatch ring-VRF proof: proves the output came from some key in a
/// ring without revealing which one.
#[derive(Clone, PartialEq, Eq)]
pub struct RingVrfProof(pub [u8; RING_PROOF_LEN]);

impl fmt::Debug for RingVrfProof {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ring-vrf:0x{}..", hex::encode(&self.0[..8]))
    }
}

/// Pedersen commitment to a validator ring (KZG form), 144 bytes.
#[derive(Clone, PartialEq, Eq)]
pub struct RingCommitment(pub [u8; RING_COMMITMENT_LEN]);

impl fmt::Debug for RingCommitment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ring:0x{}..", hex::encode(&self.0[..8]))
    }
}

impl Default for RingCommitment {
    fn default() -> Self {
        Self([0u8; RING_COMMITMENT_LEN])
    }
}

/// The four public keys plus metadata a validator publishes.
#[derive(Clone, PartialEq, Eq)]
pub struct ValidatorKeys {
    pub bandersnatch: Hash32,
    pub ed25519: Hash32,
    pub bls: [u8; BLS_KEY_LEN],
    pub metadata: [u8; VALIDATOR_METADATA_LEN],
}

impl ValidatorKeys {
    pub fn empty() -> Self {
        Self {
            bandersnatch: Hash32::ZERO,
            ed25519: Hash32::ZERO,
            bls: [0u8; BLS_KEY_LEN],
            metadata: [0u8; VALIDATOR_METADATA_LEN],
        }
    }
}

impl fmt::Debug for ValidatorKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValidatorKeys")
            .field("bandersnatch", &self.bandersnatch)
            .field("ed25519", &self.ed25519)
            .finish_non_exhaustive()
    }
}
