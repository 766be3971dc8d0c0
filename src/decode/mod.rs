pub mod decoder;
pub mod id_map;

pub use decoder::{decode_message, decode_signal, encode_physical, extract_bits, insert_bits, sign_extend, DecodeOutcome};
pub use id_map::IdResolver;
