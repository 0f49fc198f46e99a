/// Rough token estimate used only for throughput statistics: one token per
/// CJK ideograph plus 0.75 per Latin word. Never used for truncation.
pub fn estimate_tokens(text: &str) -> u64 {
    let mut cjk_chars = 0u64;
    let mut latin_words = 0u64;
    let mut in_word = false;

    for ch in text.chars() {
        if ('\u{4e00}'..='\u{9fff}').contains(&ch) {
            cjk_chars += 1;
            in_word = false;
        } else if ch.is_ascii_alphabetic() {
            if !in_word {
                latin_words += 1;
                in_word = true;
            }
        } else {
            in_word = false;
        }
    }

    cjk_chars + (latin_words * 3) / 4
}
