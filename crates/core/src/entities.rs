//! Entity encoding for characters that email clients mangle.
//!
//! Known limitation: replacement is context-free, so text inside `<script>`
//! and `<style>` is rewritten too.

use std::collections::HashMap;
use std::sync::OnceLock;

use unicode_normalization::UnicodeNormalization;

const VARIATION_SELECTOR: char = '\u{FE0F}';

/// Characters replaced by named entities. Keys with a trailing variation
/// selector only match the emoji presentation of the symbol.
const SPECIAL_CHARACTERS: &[(&str, &str)] = &[
    ("©", "&copy;"),
    ("®", "&reg;"),
    ("™", "&trade;"),
    ("€", "&euro;"),
    ("£", "&pound;"),
    ("¥", "&yen;"),
    ("¢", "&cent;"),
    ("₿", "&#8383;"),
    ("§", "&sect;"),
    ("¶", "&para;"),
    ("•", "&bull;"),
    ("…", "&hellip;"),
    ("—", "&mdash;"),
    ("–", "&ndash;"),
    ("“", "&ldquo;"),
    ("”", "&rdquo;"),
    ("‘", "&lsquo;"),
    ("’", "&rsquo;"),
    ("á", "&aacute;"),
    ("é", "&eacute;"),
    ("í", "&iacute;"),
    ("ó", "&oacute;"),
    ("ú", "&uacute;"),
    ("ñ", "&ntilde;"),
    ("Á", "&Aacute;"),
    ("É", "&Eacute;"),
    ("Í", "&Iacute;"),
    ("Ó", "&Oacute;"),
    ("Ú", "&Uacute;"),
    ("Ñ", "&Ntilde;"),
    ("à", "&agrave;"),
    ("è", "&egrave;"),
    ("ì", "&igrave;"),
    ("ò", "&ograve;"),
    ("ù", "&ugrave;"),
    ("À", "&Agrave;"),
    ("È", "&Egrave;"),
    ("Ì", "&Igrave;"),
    ("Ò", "&Ograve;"),
    ("Ù", "&Ugrave;"),
    ("â", "&acirc;"),
    ("ê", "&ecirc;"),
    ("î", "&icirc;"),
    ("ô", "&ocirc;"),
    ("û", "&ucirc;"),
    ("Â", "&Acirc;"),
    ("Ê", "&Ecirc;"),
    ("Î", "&Icirc;"),
    ("Ô", "&Ocirc;"),
    ("Û", "&Ucirc;"),
    ("ã", "&atilde;"),
    ("õ", "&otilde;"),
    ("Ã", "&Atilde;"),
    ("Õ", "&Otilde;"),
    ("ä", "&auml;"),
    ("ë", "&euml;"),
    ("ï", "&iuml;"),
    ("ö", "&ouml;"),
    ("ü", "&uuml;"),
    ("Ä", "&Auml;"),
    ("Ë", "&Euml;"),
    ("Ï", "&Iuml;"),
    ("Ö", "&Ouml;"),
    ("Ü", "&Uuml;"),
    ("ÿ", "&yuml;"),
    ("Ÿ", "&Yuml;"),
    ("å", "&aring;"),
    ("Å", "&Aring;"),
    ("æ", "&aelig;"),
    ("Æ", "&AElig;"),
    ("œ", "&oelig;"),
    ("Œ", "&OElig;"),
    ("ç", "&ccedil;"),
    ("Ç", "&Ccedil;"),
    ("ð", "&eth;"),
    ("Ð", "&ETH;"),
    ("ø", "&oslash;"),
    ("Ø", "&Oslash;"),
    ("þ", "&thorn;"),
    ("Þ", "&THORN;"),
    ("ß", "&szlig;"),
    ("α", "&alpha;"),
    ("β", "&beta;"),
    ("γ", "&gamma;"),
    ("δ", "&delta;"),
    ("ε", "&epsilon;"),
    ("ζ", "&zeta;"),
    ("η", "&eta;"),
    ("θ", "&theta;"),
    ("ι", "&iota;"),
    ("κ", "&kappa;"),
    ("λ", "&lambda;"),
    ("μ", "&mu;"),
    ("ν", "&nu;"),
    ("ξ", "&xi;"),
    ("ο", "&omicron;"),
    ("π", "&pi;"),
    ("ρ", "&rho;"),
    ("σ", "&sigma;"),
    ("τ", "&tau;"),
    ("υ", "&upsilon;"),
    ("φ", "&phi;"),
    ("χ", "&chi;"),
    ("ψ", "&psi;"),
    ("ω", "&omega;"),
    ("Α", "&Alpha;"),
    ("Β", "&Beta;"),
    ("Γ", "&Gamma;"),
    ("Δ", "&Delta;"),
    ("Ε", "&Epsilon;"),
    ("Ζ", "&Zeta;"),
    ("Η", "&Eta;"),
    ("Θ", "&Theta;"),
    ("Ι", "&Iota;"),
    ("Κ", "&Kappa;"),
    ("Λ", "&Lambda;"),
    ("Μ", "&Mu;"),
    ("Ν", "&Nu;"),
    ("Ξ", "&Xi;"),
    ("Ο", "&Omicron;"),
    ("Π", "&Pi;"),
    ("Ρ", "&Rho;"),
    ("Σ", "&Sigma;"),
    ("Τ", "&Tau;"),
    ("Υ", "&Upsilon;"),
    ("Φ", "&Phi;"),
    ("Χ", "&Chi;"),
    ("Ψ", "&Psi;"),
    ("Ω", "&Omega;"),
    ("±", "&plusmn;"),
    ("×", "&times;"),
    ("÷", "&divide;"),
    ("≤", "&le;"),
    ("≥", "&ge;"),
    ("≠", "&ne;"),
    ("≈", "&asymp;"),
    ("∞", "&infin;"),
    ("√", "&radic;"),
    ("∫", "&int;"),
    ("∑", "&sum;"),
    ("∏", "&prod;"),
    ("∂", "&part;"),
    ("∇", "&nabla;"),
    ("∈", "&isin;"),
    ("∩", "&cap;"),
    ("∪", "&cup;"),
    ("⊂", "&sub;"),
    ("⊃", "&sup;"),
    ("⊆", "&sube;"),
    ("⊇", "&supe;"),
    ("⊕", "&oplus;"),
    ("⊗", "&otimes;"),
    ("∅", "&empty;"),
    ("¬", "&not;"),
    ("∧", "&and;"),
    ("∨", "&or;"),
    ("°", "&deg;"),
    ("µ", "&micro;"),
    ("¤", "&curren;"),
    ("†", "&dagger;"),
    ("‡", "&Dagger;"),
    ("‾", "&oline;"),
    ("‰", "&permil;"),
    ("¦", "&brvbar;"),
    ("‹", "&lsaquo;"),
    ("›", "&rsaquo;"),
    ("«", "&laquo;"),
    ("»", "&raquo;"),
    ("¿", "&iquest;"),
    ("¡", "&iexcl;"),
    ("◊", "&loz;"),
    ("○", "&cir;"),
    ("◌", "&om;"),
    ("★", "&starf;"),
    ("☆", "&star;"),
    ("♠\u{FE0F}", "&spades;"),
    ("♣\u{FE0F}", "&clubs;"),
    ("♥\u{FE0F}", "&hearts;"),
    ("♦\u{FE0F}", "&diams;"),
    ("←", "&larr;"),
    ("↑", "&uarr;"),
    ("→", "&rarr;"),
    ("↓", "&darr;"),
    ("↔\u{FE0F}", "&harr;"),
    ("↕\u{FE0F}", "&varr;"),
    ("↩\u{FE0F}", "&larrtl;"),
    ("↪\u{FE0F}", "&rarrtl;"),
    ("↵", "&crarr;"),
    ("↶", "&cularr;"),
    ("↷", "&curarr;"),
    ("⇐", "&lArr;"),
    ("⇑", "&uArr;"),
    ("⇒", "&rArr;"),
    ("⇓", "&dArr;"),
    ("⇔", "&hArr;"),
    ("⇕", "&vArr;"),
    ("№", "&#8470;"),
];

fn table() -> &'static HashMap<&'static str, &'static str> {
    static TABLE: OnceLock<HashMap<&'static str, &'static str>> = OnceLock::new();
    TABLE.get_or_init(|| SPECIAL_CHARACTERS.iter().copied().collect())
}

/// Encode special characters and emoji as HTML entities.
///
/// Input is NFC-normalized first so decomposed accents hit the table.
/// The output of this function is a fixed point: encoding it again is a no-op.
pub fn encode_special_characters(html: &str) -> String {
    let table = table();
    let normalized: String = html.nfc().collect();
    let mut out = String::with_capacity(normalized.len() + normalized.len() / 8);
    let mut chars = normalized.chars().peekable();
    let mut key = String::with_capacity(8);

    while let Some(c) = chars.next() {
        if c.is_ascii() {
            out.push(c);
            continue;
        }

        if chars.peek() == Some(&VARIATION_SELECTOR) {
            key.clear();
            key.push(c);
            key.push(VARIATION_SELECTOR);
            if let Some(entity) = table.get(key.as_str()) {
                out.push_str(entity);
                chars.next();
                continue;
            }
        }

        let mut buf = [0u8; 4];
        if let Some(entity) = table.get(&*c.encode_utf8(&mut buf)) {
            out.push_str(entity);
        } else if is_emoji(c) {
            out.push_str("&#");
            out.push_str(&u32::from(c).to_string());
            out.push(';');
        } else {
            out.push(c);
        }
    }
    out
}

/// Pictographic code points plus the joiners and selectors used in emoji sequences.
fn is_emoji(c: char) -> bool {
    matches!(
        u32::from(c),
        0x1F000..=0x1FAFF
            | 0x2600..=0x27BF
            | 0x2300..=0x23FF
            | 0x2B00..=0x2BFF
            | 0x2190..=0x21FF
            | 0x25AA..=0x25FE
            | 0x2934..=0x2935
            | 0x203C
            | 0x2049
            | 0x2139
            | 0x24C2
            | 0x3030
            | 0x303D
            | 0x3297
            | 0x3299
            | 0x200D
            | 0x20E3
            | 0xFE0F
            | 0xE0020..=0xE007F
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    #[test]
    fn encodes_accents_and_symbols() {
        assert_eq!(encode_special_characters("café © 2024"), "caf&eacute; &copy; 2024");
    }

    #[test]
    fn encoded_text_is_a_fixed_point() {
        let once = encode_special_characters("café © 2024");
        assert_eq!(encode_special_characters(&once), once);
    }

    #[test]
    fn decomposed_accent_is_normalized_first() {
        assert_eq!(encode_special_characters("cafe\u{0301}"), "caf&eacute;");
    }

    #[test]
    fn emoji_presentation_uses_named_entity() {
        assert_eq!(encode_special_characters("\u{2660}\u{FE0F} and \u{2605}"), "&spades; and &starf;");
    }

    #[test]
    fn emoji_become_numeric_entities() {
        assert_eq!(encode_special_characters("Hi \u{1F600}!"), "Hi &#128512;!");
        assert_eq!(
            encode_special_characters("\u{1F44D}\u{1F3FD}"),
            "&#128077;&#127997;"
        );
    }

    #[test]
    fn other_scripts_pass_through() {
        assert_eq!(encode_special_characters("Привет, 世界"), "Привет, 世界");
    }

    #[test]
    fn markup_is_untouched() {
        let html = r#"<p class="x">Déjà vu — “quoted”</p>"#;
        assert_eq!(
            encode_special_characters(html),
            r#"<p class="x">D&eacute;j&agrave; vu &mdash; &ldquo;quoted&rdquo;</p>"#
        );
    }

    proptest! {
        #[test]
        fn encoding_is_idempotent(s in "\\PC{0,64}") {
            let once = encode_special_characters(&s);
            prop_assert_eq!(encode_special_characters(&once), once);
        }
    }
}
