use crate::block::BlockRecord;

const UNKNOWN: &str = "unknown";

/// `1234567` -> `1,234,567`
pub fn format_block_height(height: Option<u64>) -> String {
    let Some(height) = height else {
        return UNKNOWN.to_string();
    };
    let digits = height.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

/// Unix seconds rendered as `dd/mm/YYYY, HH:MM:SS` (UTC).
pub fn format_block_timestamp(timestamp: i64) -> String {
    if timestamp < 0 {
        return UNKNOWN.to_string();
    }
    chrono::DateTime::from_timestamp(timestamp, 0)
        .map(|d| d.format("%d/%m/%Y, %H:%M:%S").to_string())
        .unwrap_or_else(|| timestamp.to_string())
}

pub fn contracted_hash(hash: &str) -> &str {
    match hash.char_indices().nth(8) {
        Some((idx, _)) => &hash[..idx],
        None => hash,
    }
}

/// Escapes pool-supplied text for Telegram's HTML parse mode.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}

/// HTML link to the miner's account page on the pool frontend.
pub fn format_miner_link(pool_root: &str, address: &str) -> String {
    format!(
        "<a href='{}/#/account/{}'>{}</a>",
        escape_html(pool_root.trim_end_matches('/')),
        escape_html(address),
        escape_html(contracted_hash(address))
    )
}

/// HTML announcement for a newly found block.
pub fn new_block_announcement(record: &BlockRecord, pool_root: Option<&str>) -> String {
    let miner = match (&record.finder, pool_root) {
        (Some(finder), Some(root)) => format_miner_link(root, finder),
        (Some(finder), None) => escape_html(contracted_hash(finder)),
        (None, _) => UNKNOWN.to_string(),
    };

    format!(
        "New block found.\nCoin: <b>{}</b>\nHeight: {}\nTimestamp: {}\nReward: {}\nMiner: {}",
        escape_html(&record.coin),
        format_block_height(record.height),
        format_block_timestamp(record.timestamp),
        escape_html(record.reward.as_deref().unwrap_or(UNKNOWN)),
        miner
    )
}
