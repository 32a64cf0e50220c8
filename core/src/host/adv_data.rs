//! Advertising data (AD structure) helpers.

/// AD type: shortened local name
pub const AD_NAME_SHORTENED: u8 = 0x08;
/// AD type: complete local name
pub const AD_NAME_COMPLETE: u8 = 0x09;

/// Longest name kept for logging, in bytes.
pub const NAME_LEN_MAX: usize = 29;

/// Iterate over `(ad_type, payload)` pairs of an AD payload.
///
/// Iteration stops at a zero-length structure (padding) or at a structure
/// whose declared length runs past the end of the buffer.
pub fn ad_structures(data: &[u8]) -> impl Iterator<Item = (u8, &[u8])> {
    let mut rest = data;
    std::iter::from_fn(move || {
        let (&len, tail) = rest.split_first()?;
        let len = len as usize;
        if len == 0 || tail.len() < len {
            rest = &[];
            return None;
        }
        let (structure, next) = tail.split_at(len);
        rest = next;
        Some((structure[0], &structure[1..]))
    })
}

/// Extract the advertiser's local name (shortened or complete), if present.
pub fn local_name(data: &[u8]) -> Option<String> {
    ad_structures(data)
        .find(|(ad_type, _)| *ad_type == AD_NAME_SHORTENED || *ad_type == AD_NAME_COMPLETE)
        .map(|(_, name)| {
            let name = &name[..name.len().min(NAME_LEN_MAX)];
            String::from_utf8_lossy(name).into_owned()
        })
}
