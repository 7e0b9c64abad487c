//! External idea uids: a uuid7 encoded as bech32m under a readable prefix

use bech32::Bech32m;
use uuid7::uuid7;

/// Mint a fresh uid such as `idea_1...`.
pub fn new_external_uid(hrp: &str) -> anyhow::Result<String> {
    let hrp = bech32::Hrp::parse(hrp)?;
    let encoded = bech32::encode::<Bech32m>(hrp, uuid7().as_bytes())?;
    Ok(encoded)
}

/// True when `uid` decodes as bech32 under `hrp` and carries a 16 byte payload.
pub fn is_external_uid(uid: &str, hrp: &str) -> bool {
    match bech32::decode(uid) {
        Ok((decoded_hrp, payload)) => decoded_hrp.as_str() == hrp && payload.len() == 16,
        Err(_) => false,
    }
}
