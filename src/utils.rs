use u256::{H160, H256, U256};

/// Highest address reserved for precompiled contracts (0x01..=0x0a).
pub const LAST_PRECOMPILE: u64 = 0x0a;

pub fn address_into_u256(address: H160) -> U256 {
    let mut buffer = [0; 32];
    buffer[12..].copy_from_slice(address.as_bytes());
    U256::from_big_endian(&buffer)
}

/// Keeps the low 20 bytes of a word, the way the EVM turns words into addresses.
pub fn u256_into_address(value: U256) -> H160 {
    let mut buffer = [0; 32];
    value.to_big_endian(&mut buffer);
    H160::from_slice(&buffer[12..])
}

pub fn u256_into_h256(value: U256) -> H256 {
    let mut buffer = [0; 32];
    value.to_big_endian(&mut buffer);
    H256(buffer)
}

pub fn h256_into_u256(value: H256) -> U256 {
    U256::from_big_endian(value.as_bytes())
}

pub fn is_precompiled(address: &H160) -> bool {
    let value = address_into_u256(*address);
    !value.is_zero() && value <= U256::from(LAST_PRECOMPILE)
}

pub fn to_hex(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}

/// Accepts hex with or without the `0x` prefix.
pub fn from_hex(text: &str) -> Result<Vec<u8>, hex::FromHexError> {
    let digits = text.strip_prefix("0x").unwrap_or(text);
    if digits.len() % 2 == 1 {
        return hex::decode(format!("0{}", digits));
    }
    hex::decode(digits)
}
