//! Trace files: a genesis state plus a block sequence and the expected
//! posterior state roots. JSON (hex fields) for hand-editing, the typed
//! binary codec for compact fixtures.

use std::path::Path;

use serde::{Deserialize, Serialize};

use jam_stf_shared::codec::{
    decode_blob, decode_varint, encode_blob, encode_varint, Decode, DecodeError, DecodeErrorKind,
    Encode, Reader,
};
use jam_stf_shared::params::Params;
use jam_stf_shared::primitives::Hash32;
use jam_stf_shared::state::State;
use jam_stf_shared::state_dict::StateDictionary;
use jam_stf_shared::stf::{Chain, DevServiceExecutor, Stf, StfError};
use jam_stf_shared::crypto::DevVrfSuite;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Trace {
    /// Name of the parameter set ("tiny" or "full").
    pub params_name: String,
    /// Codec bytes of the genesis state.
    pub genesis: Vec<u8>,
    /// Codec bytes of each block, in import order.
    pub blocks: Vec<Vec<u8>>,
    /// Expected posterior state root after each block.
    pub post_state_roots: Vec<Hash32>,
}

#[derive(Debug, thiserror::Error)]
pub enum TraceError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid trace JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid hex in trace field: {0}")]
    Hex(#[from] hex::FromHexError),
    #[error("hash field is not 32 bytes")]
    BadHashLength,
    #[error("unknown parameter set {0:?}")]
    UnknownParams(String),
    #[error("malformed binary trace: {0}")]
    Binary(#[from] DecodeError),
}

#[derive(Serialize, Deserialize)]
struct TraceJson {
    params: String,
    genesis: String,
    blocks: Vec<String>,
    post_state_roots: Vec<String>,
}

fn decode_hex_field(raw: &str) -> Result<Vec<u8>, TraceError> {
    Ok(hex::decode(raw.strip_prefix("0x").unwrap_or(raw))?)
}

impl Trace {
    pub fn params(&self) -> Result<&'static Params, TraceError> {
        Params::by_name(&self.params_name)
            .ok_or_else(|| TraceError::UnknownParams(self.params_name.clone()))
    }

    pub fn genesis_state(&self) -> Result<State, TraceError> {
        Ok(State::decode_bytes(&self.genesis, self.params()?)?)
    }

    /// Load from disk: `.json` files are parsed as JSON, anything else as
    /// the binary form.
    pub fn load(path: &Path) -> Result<Self, TraceError> {
        let bytes = std::fs::read(path).map_err(|source| TraceError::Io {
            path: path.display().to_string(),
            source,
        })?;
        if path.extension().is_some_and(|ext| ext == "json") {
            Self::from_json_bytes(&bytes)
        } else {
            Self::from_binary(&bytes)
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), TraceError> {
        let bytes = if path.extension().is_some_and(|ext| ext == "json") {
            self.to_json_string()?.into_bytes()
        } else {
            self.to_binary()
        };
        std::fs::write(path, bytes).map_err(|source| TraceError::Io {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn from_json_bytes(bytes: &[u8]) -> Result<Self, TraceError> {
        let raw: TraceJson = serde_json::from_slice(bytes)?;
        let post_state_roots = raw
            .post_state_roots
            .iter()
            .map(|field| {
                let bytes = decode_hex_field(field)?;
                Hash32::from_slice(&bytes).ok_or(TraceError::BadHashLength)
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            params_name: raw.params,
            genesis: decode_hex_field(&raw.genesis)?,
            blocks: raw
                .blocks
                .iter()
                .map(|field| decode_hex_field(field))
                .collect::<Result<Vec<_>, _>>()?,
            post_state_roots,
        })
    }

    pub fn to_json_string(&self) -> Result<String, TraceError> {
        let raw = TraceJson {
            params: self.params_name.clone(),
            genesis: format!("0x{}", hex::encode(&self.genesis)),
            blocks: self.blocks.iter().map(|b| format!("0x{}", hex::encode(b))).collect(),
            post_state_roots: self
                .post_state_roots
                .iter()
                .map(|root| root.to_string())
                .collect(),
        };
        Ok(serde_json::to_string_pretty(&raw)?)
    }

    pub fn to_binary(&self) -> Vec<u8> {
        let mut out = Vec::new();
        encode_blob(self.params_name.as_bytes(), &mut out);
        encode_blob(&self.genesis, &mut out);
        encode_varint(self.blocks.len() as u64, &mut out);
        for block in &self.blocks {
            encode_blob(block, &mut out);
        }
        encode_varint(self.post_state_roots.len() as u64, &mut out);
        for root in &self.post_state_roots {
            root.encode_to(&mut out);
        }
        out
    }

    pub fn from_binary(bytes: &[u8]) -> Result<Self, TraceError> {
        let mut r = Reader::new(bytes);
        let params_name = String::from_utf8_lossy(&decode_blob(&mut r)?).into_owned();
        let genesis = decode_blob(&mut r)?;
        let block_count = decode_varint(&mut r)? as usize;
        let mut blocks = Vec::with_capacity(block_count.min(r.remaining()));
        for _ in 0..block_count {
            blocks.push(decode_blob(&mut r)?);
        }
        let root_count = decode_varint(&mut r)? as usize;
        let mut post_state_roots = Vec::with_capacity(root_count.min(r.remaining()));
        for _ in 0..root_count {
            post_state_roots.push(Hash32::decode(&mut r)?);
        }
        if !r.is_empty() {
            return Err(TraceError::Binary(r.error(DecodeErrorKind::TrailingBytes)));
        }
        Ok(Self { params_name, genesis, blocks, post_state_roots })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TraceRunError {
    #[error(transparent)]
    Trace(#[from] TraceError),
    #[error("genesis state is unusable: {0}")]
    Genesis(#[source] StfError),
    #[error("block {index} failed to import: {source}")]
    Import {
        index: usize,
        #[source]
        source: StfError,
    },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RootMismatch {
    pub index: usize,
    pub expected: Hash32,
    pub actual: Hash32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunReport {
    pub roots: Vec<Hash32>,
    pub mismatch: Option<RootMismatch>,
}

impl RunReport {
    pub fn passed(&self) -> bool {
        self.mismatch.is_none()
    }
}

/// Build a dev chain over the trace's genesis.
pub fn chain_for(
    trace: &Trace,
) -> Result<Chain<'static, DevVrfSuite, DevServiceExecutor>, TraceRunError> {
    let params = trace.params()?;
    let genesis = trace.genesis_state()?;
    Chain::new(Stf::new(params, DevVrfSuite, DevServiceExecutor), genesis)
        .map_err(TraceRunError::Genesis)
}

/// Import every block and compare each posterior root with the expectation.
/// Stops at the first mismatch; import failures abort with the block index.
pub fn run_trace(trace: &Trace) -> Result<RunReport, TraceRunError> {
    let mut chain = chain_for(trace)?;
    let mut roots = Vec::with_capacity(trace.blocks.len());
    for (index, bytes) in trace.blocks.iter().enumerate() {
        let root = chain
            .import_bytes(bytes)
            .map_err(|source| TraceRunError::Import { index, source })?;
        roots.push(root);
        if let Some(expected) = trace.post_state_roots.get(index) {
            if *expected != root {
                return Ok(RunReport {
                    roots,
                    mismatch: Some(RootMismatch { index, expected: *expected, actual: root }),
                });
            }
        }
    }
    Ok(RunReport { roots, mismatch: None })
}

const COMPONENT_NAMES: [&str; 15] = [
    "alpha", "phi", "beta", "gamma", "psi", "eta", "iota", "kappa", "lambda", "rho", "tau", "chi",
    "pi", "theta", "xi",
];

/// Resolve a query path against a state snapshot and return the raw
/// dictionary value. Paths: a component name (`tau`, `eta`, …),
/// `service:<id>` for an account's base row, or `key:<62 hex chars>` for an
/// arbitrary 31-byte dictionary key.
pub fn query_state(state: &State, params: &Params, path: &str) -> Option<Vec<u8>> {
    let dict = StateDictionary::build(state, params).ok()?;
    let key = if let Some(position) = COMPONENT_NAMES.iter().position(|name| *name == path) {
        jam_stf_shared::state_key::component(position as u8 + 1)
    } else if let Some(id) = path.strip_prefix("service:") {
        jam_stf_shared::state_key::service_base(id.parse().ok()?)
    } else if let Some(raw) = path.strip_prefix("key:") {
        let bytes = hex::decode(raw.strip_prefix("0x").unwrap_or(raw)).ok()?;
        jam_stf_shared::state_key::StateKey::from_slice(&bytes)?
    } else {
        return None;
    };
    dict.entries.get(&key).cloned()
}
