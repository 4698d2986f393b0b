pub mod block;
pub mod codec;
pub mod crypto;
pub mod merkle;
pub mod params;
pub mod primitives;
pub mod state;
pub mod state_dict;
pub mod state_key;
pub mod stf;
pub mod transition;
pub mod work;
