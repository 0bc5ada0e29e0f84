//! Universal part-of-speech byte table (spec §6.2).

const POS_TABLE: &[(&str, u8)] = &[
    ("noun", 0x01),
    ("verb", 0x02),
    ("adjective", 0x03),
    ("adverb", 0x04),
    ("preposition", 0x05),
    ("pronoun", 0x06),
    ("determiner", 0x07),
    ("conjunction", 0x08),
    ("numeral", 0x09),
    ("interjection", 0x0A),
    ("particle", 0x0B),
    ("proper_noun", 0x0C),
    ("auxiliary", 0x0D),
    ("classifier", 0x0E),
    ("copula", 0x0F),
];

/// Reserved byte for unrecognized part-of-speech values.
pub const UNKNOWN: u8 = 0xFF;

/// Map a free-form `pos` string onto the universal QQ byte. Unknown
/// values map to [`UNKNOWN`] rather than erroring — spec §4.3 treats an
/// unrecognized POS as a soft condition, not a fatal one.
pub fn qq_byte(pos: &str) -> u8 {
    let normalized = pos.trim().to_ascii_lowercase();
    POS_TABLE
        .iter()
        .find(|(name, _)| *name == normalized)
        .map(|(_, byte)| *byte)
        .unwrap_or(UNKNOWN)
}

/// Human-readable label for a QQ byte, used in description generation.
pub fn pos_name(qq: u8) -> &'static str {
    POS_TABLE
        .iter()
        .find(|(_, byte)| *byte == qq)
        .map(|(name, _)| *name)
        .unwrap_or("unknown")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_pos_resolves() {
        assert_eq!(qq_byte("noun"), 0x01);
        assert_eq!(qq_byte("Verb"), 0x02);
        assert_eq!(qq_byte(" adjective "), 0x03);
    }

    #[test]
    fn unknown_pos_is_reserved_byte() {
        assert_eq!(qq_byte("gerund"), UNKNOWN);
        assert_eq!(qq_byte(""), UNKNOWN);
    }

    #[test]
    fn pos_name_roundtrips() {
        assert_eq!(pos_name(0x01), "noun");
        assert_eq!(pos_name(UNKNOWN), "unknown");
    }
}
