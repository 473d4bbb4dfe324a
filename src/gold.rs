//! Gold/silver/copper price display
//!
//! Copper is always zero-padded, so `format_gold(1)` is `"01c"`. The client
//! itself prints `"1c"` for sub-silver prices and some documentation shows
//! `"00c"`; which one players should see is still an open product question.

/// Render a price in the smallest currency unit as `<gold>g<ss>s<cc>c`.
///
/// Gold is everything from the ten-thousands up, grouped by thousands.
/// Silver and copper are two digits each. Silver only shows once the price
/// reaches 100, gold once it reaches 10000; copper always shows.
pub fn format_gold(price: i64) -> String {
    let sign = if price < 0 { "-" } else { "" };
    let value = price.unsigned_abs();

    let mut out = String::from(sign);
    if value >= 10_000 {
        out.push_str(&group_thousands(value / 10_000));
        out.push('g');
    }
    if value >= 100 {
        out.push_str(&format!("{:02}s", (value / 100) % 100));
    }
    out.push_str(&format!("{:02}c", value % 100));
    out
}

fn group_thousands(value: u64) -> String {
    let digits = value.to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    grouped
}
