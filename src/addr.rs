/*!
 * Copyright (c) 2026 Ming Lyu, aka mingcheng
 *
 * This source code is licensed under the MIT License,
 * which is located in the LICENSE file in the source tree's root directory.
 *
 * File: addr.rs
 * Author: mingcheng <mingcheng@apache.org>
 * File Created: 2026-03-02 11:02:17
 *
 * Modified By: mingcheng <mingcheng@apache.org>
 * Last Modified: 2026-03-14 16:55:03
 */

use lettre::Address;
use std::collections::HashSet;

/// Normalize one raw address: strip any display name, validate the
/// mailbox shape, and lowercase the domain. Malformed input yields `None`;
/// this is a deliberate soft-failure site, bad entries just disappear.
pub fn normalize_one(raw: &str) -> Option<String> {
    let raw = raw.trim();
    let candidate = match (raw.rfind('<'), raw.rfind('>')) {
        (Some(start), Some(end)) if start < end => &raw[start + 1..end],
        _ => raw,
    };
    let candidate = candidate.trim();
    if candidate.is_empty() {
        return None;
    }
    let address: Address = candidate.parse().ok()?;
    Some(format!(
        "{}@{}",
        address.user(),
        address.domain().to_ascii_lowercase()
    ))
}

/// Normalize a batch of raw addresses into a set. Duplicates collapse and
/// malformed entries are dropped silently. All membership math happens on
/// the values produced here.
pub fn normalize<I, S>(addresses: I) -> HashSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    addresses
        .into_iter()
        .filter_map(|a| normalize_one(a.as_ref()))
        .collect()
}

/// Normalize a comma-separated header value.
pub fn normalize_list(raw: &str) -> HashSet<String> {
    normalize(raw.split(','))
}
