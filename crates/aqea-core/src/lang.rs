//! Static ISO 639-3 → AA byte table (spec §6.3).

/// Normative anchors from the spec. Unlisted codes in the reserved
/// ranges are an error until explicitly assigned — we do not guess at
/// slots the spec left unassigned.
const LANGUAGE_TABLE: &[(&str, u8, &str)] = &[
    ("deu", 0xA0, "German"),
    ("eng", 0xA1, "English"),
    ("nld", 0xA2, "Dutch"),
    ("swe", 0xA3, "Swedish"),
    ("dan", 0xA4, "Danish"),
    ("nor", 0xA5, "Norwegian"),
    ("isl", 0xA6, "Icelandic"),
    ("afr", 0xA7, "Afrikaans"),
    ("yid", 0xA8, "Yiddish"),
    ("fry", 0xA9, "Frisian"),
    ("fra", 0xB0, "French"),
    ("spa", 0xB1, "Spanish"),
    ("ita", 0xB2, "Italian"),
    ("por", 0xB3, "Portuguese"),
    ("ron", 0xB4, "Romanian"),
    ("cat", 0xB5, "Catalan"),
    ("glg", 0xB6, "Galician"),
    ("oci", 0xB7, "Occitan"),
    ("lat", 0xB8, "Latin"),
    ("srd", 0xB9, "Sardinian"),
    ("rus", 0xC0, "Russian"),
    ("pol", 0xC1, "Polish"),
    ("ces", 0xC2, "Czech"),
    ("slk", 0xC3, "Slovak"),
    ("ukr", 0xC4, "Ukrainian"),
    ("bel", 0xC5, "Belarusian"),
    ("bul", 0xC6, "Bulgarian"),
    ("hrv", 0xC7, "Croatian"),
    ("srp", 0xC8, "Serbian"),
    ("slv", 0xC9, "Slovenian"),
    ("mkd", 0xCA, "Macedonian"),
    ("cmn", 0xD0, "Mandarin Chinese"),
    ("yue", 0xD1, "Cantonese"),
    ("jpn", 0xD2, "Japanese"),
    ("kor", 0xD3, "Korean"),
    ("vie", 0xD4, "Vietnamese"),
    ("tha", 0xD5, "Thai"),
    ("khm", 0xD6, "Khmer"),
    ("mya", 0xD7, "Burmese"),
    ("bod", 0xD8, "Tibetan"),
    ("mon", 0xD9, "Mongolian"),
];

/// Legacy AA range accepted on read for historical data (spec §9 OQ1).
/// Producing addresses in this range is out of spec; new writes always
/// land in `0xA0..=0xDF`.
pub const LEGACY_AA_RANGE: std::ops::RangeInclusive<u8> = 0x20..=0x2F;

/// Valid AA range for newly produced addresses.
pub const AA_RANGE: std::ops::RangeInclusive<u8> = 0xA0..=0xDF;

/// Resolve an ISO 639-3 language code to its AA byte.
pub fn aa_byte(language_code: &str) -> Option<u8> {
    let code = language_code.to_ascii_lowercase();
    LANGUAGE_TABLE
        .iter()
        .find(|(c, _, _)| *c == code)
        .map(|(_, aa, _)| *aa)
}

/// Resolve the human-readable language name for an AA byte, used by the
/// converter's description generator (spec §4.3).
pub fn language_name(aa: u8) -> Option<&'static str> {
    LANGUAGE_TABLE
        .iter()
        .find(|(_, byte, _)| *byte == aa)
        .map(|(_, _, name)| *name)
}

/// Whether `aa` falls in a range this core will accept on read (current
/// or legacy), without regard to whether it is a currently-assigned slot.
pub fn is_known_aa(aa: u8) -> bool {
    AA_RANGE.contains(&aa) || LEGACY_AA_RANGE.contains(&aa)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_known_codes() {
        assert_eq!(aa_byte("eng"), Some(0xA1));
        assert_eq!(aa_byte("deu"), Some(0xA0));
        assert_eq!(aa_byte("jpn"), Some(0xD2));
    }

    #[test]
    fn is_case_insensitive() {
        assert_eq!(aa_byte("ENG"), Some(0xA1));
    }

    #[test]
    fn unknown_code_is_none() {
        assert_eq!(aa_byte("xxx"), None);
        // An unassigned slot within the reserved range is still unknown.
        assert_eq!(aa_byte("zzz"), None);
    }

    #[test]
    fn language_name_roundtrips() {
        assert_eq!(language_name(0xA1), Some("English"));
        assert_eq!(language_name(0xFF), None);
    }

    #[test]
    fn every_table_entry_is_in_range() {
        for (_, aa, _) in LANGUAGE_TABLE {
            assert!(AA_RANGE.contains(aa), "AA byte {:#04X} out of range", aa);
        }
    }

    #[test]
    fn no_duplicate_aa_bytes() {
        let mut seen = std::collections::HashSet::new();
        for (_, aa, _) in LANGUAGE_TABLE {
            assert!(seen.insert(*aa), "duplicate AA byte {:#04X}", aa);
        }
    }
}
