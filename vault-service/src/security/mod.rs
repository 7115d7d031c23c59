pub mod device_id;
pub mod keystore;
pub mod llt;

pub use keystore::{decode_keypair, Keystore};
