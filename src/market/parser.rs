//! Agent reply parser.
//!
//! Replies are free-text analysis followed by price tags:
//! `<buy>$X.XX</buy>` and, in trading mode, `<sell>$Y.YY</sell>`.
//! A reply without a buy tag contributes nothing; in trading mode the sell
//! tag is mandatory too. The `$` is optional and surrounding whitespace is
//! tolerated.

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedReply {
    /// Everything before the first buy tag, trimmed.
    pub analysis: String,
    pub buy_price: f64,
    pub sell_price: Option<f64>,
}

/// Extracts the inner text of `<tag>...</tag>`, returning it with the
/// byte offset where the opening tag starts.
fn extract_tag<'a>(text: &'a str, tag: &str) -> Option<(usize, &'a str)> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let start = text.find(&open)?;
    let inner_start = start + open.len();
    let inner_len = text[inner_start..].find(&close)?;
    Some((start, &text[inner_start..inner_start + inner_len]))
}

fn parse_price(raw: &str) -> Option<f64> {
    let cleaned = raw.trim().trim_start_matches('$').trim();
    let price = cleaned.parse::<f64>().ok()?;
    (price.is_finite() && price >= 0.0).then_some(price)
}

/// Parses a raw oracle reply. Returns `None` when the reply is unusable for
/// the given mode (`trading` requires a sell quote).
pub fn parse_reply(raw: &str, trading: bool) -> Option<ParsedReply> {
    let (buy_start, buy_raw) = extract_tag(raw, "buy")?;
    let buy_price = parse_price(buy_raw)?;

    let sell_price = extract_tag(raw, "sell").and_then(|(_, inner)| parse_price(inner));
    if trading && sell_price.is_none() {
        return None;
    }

    Some(ParsedReply {
        analysis: raw[..buy_start].trim().to_string(),
        buy_price,
        sell_price,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_analysis_and_both_tags() {
        let raw = "The runner has been consistent.\n\n<buy>$62.50</buy> <sell>$78.00</sell>";
        let parsed = parse_reply(raw, true).unwrap();
        assert_eq!(parsed.analysis, "The runner has been consistent.");
        assert_eq!(parsed.buy_price, 62.5);
        assert_eq!(parsed.sell_price, Some(78.0));
    }

    #[test]
    fn dollar_sign_is_optional() {
        let parsed = parse_reply("ok <buy>40</buy>", false).unwrap();
        assert_eq!(parsed.buy_price, 40.0);

        let parsed = parse_reply("ok <buy> $40.25 </buy>", false).unwrap();
        assert_eq!(parsed.buy_price, 40.25);
    }

    #[test]
    fn missing_buy_discards_reply() {
        assert!(parse_reply("no quotes here, just vibes", false).is_none());
        assert!(parse_reply("<sell>$50.00</sell>", false).is_none());
    }

    #[test]
    fn trading_mode_requires_sell() {
        let raw = "Analysis only covers the bid. <buy>$55.00</buy>";
        assert!(parse_reply(raw, true).is_none());
        // The same reply is fine for an initial auction.
        let parsed = parse_reply(raw, false).unwrap();
        assert_eq!(parsed.sell_price, None);
    }

    #[test]
    fn sell_tag_in_auction_mode_is_kept() {
        let raw = "Hedging early. <buy>$40.00</buy><sell>$90.00</sell>";
        let parsed = parse_reply(raw, false).unwrap();
        assert_eq!(parsed.sell_price, Some(90.0));
    }

    #[test]
    fn malformed_numbers_are_rejected()  {
        assert!(parse_reply("<buy>$12.3.4</buy>", false).is_none());
        assert!(parse_reply("<buy>-5</buy>", false).is_none());
        assert!(parse_reply("<buy>NaN</buy>", false).is_none());
        // Bad sell in auction mode degrades to buy-only.
        let parsed = parse_reply("<buy>30</buy><sell>abc</sell>", false).unwrap();
        assert_eq!(parsed.sell_price, None);
    }

    #[test]
    fn analysis_is_prefix_before_first_buy_tag() {
        let raw = "first thoughts <buy>10</buy> trailing text <buy>99</buy>";
        let parsed = parse_reply(raw, false).unwrap();
        assert_eq!(parsed.analysis, "first thoughts");
        assert_eq!(parsed.buy_price, 10.0);
    }
}
