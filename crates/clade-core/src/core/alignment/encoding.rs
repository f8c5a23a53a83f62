use phf::{Map, phf_map};

pub const STATE_COUNT: usize = 4;

pub const GAP_MASK: u8 = 0b1111;

// One bit per nucleotide state: A=1, C=2, G=4, T=8. IUPAC ambiguity codes
// are unions of the states they denote; gaps marginalize over all four.
static NUCLEOTIDE_MASKS: Map<char, u8> = phf_map! {
    'A' => 0b0001,
    'C' => 0b0010,
    'G' => 0b0100,
    'T' => 0b1000,
    'U' => 0b1000,
    'R' => 0b0101,
    'Y' => 0b1010,
    'S' => 0b0110,
    'W' => 0b1001,
    'K' => 0b1100,
    'M' => 0b0011,
    'B' => 0b1110,
    'D' => 0b1101,
    'H' => 0b1011,
    'V' => 0b0111,
    'N' => 0b1111,
    'X' => 0b1111,
    '-' => 0b1111,
    '?' => 0b1111,
    '.' => 0b1111,
    '*' => 0b1111,
};

pub fn encode(symbol: char) -> Option<u8> {
    NUCLEOTIDE_MASKS.get(&symbol.to_ascii_uppercase()).copied()
}

pub fn is_gap(mask: u8) -> bool {
    mask == GAP_MASK
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_maps_canonical_nucleotides_to_single_bits() {
        assert_eq!(encode('A'), Some(0b0001));
        assert_eq!(encode('C'), Some(0b0010));
        assert_eq!(encode('G'), Some(0b0100));
        assert_eq!(encode('T'), Some(0b1000));
    }

    #[test]
    fn encode_is_case_insensitive() {
        assert_eq!(encode('a'), encode('A'));
        assert_eq!(encode('y'), encode('Y'));
    }

    #[test]
    fn encode_maps_ambiguity_codes_to_state_unions() {
        assert_eq!(encode('R'), Some(0b0101));
        assert_eq!(encode('N'), Some(GAP_MASK));
        assert_eq!(encode('-'), Some(GAP_MASK));
    }

    #[test]
    fn encode_rejects_unknown_symbols() {
        assert_eq!(encode('!'), None);
        assert_eq!(encode('Z'), None);
    }

    #[test]
    fn is_gap_detects_fully_ambiguous_masks_only() {
        assert!(is_gap(GAP_MASK));
        assert!(!is_gap(0b0001));
        assert!(!is_gap(0b0101));
    }
}
