use std::collections::HashMap;

use anyhow::bail;
use lazy_static::lazy_static;

use crate::{DomainError, Result};

pub static NUCLEOTIDES: &[u8] = b"TCAG";
pub static AMB_NUCLEOTIDES: &[u8] = b"RYSWKMBDHVN";
pub static GAP: u8 = b'-';

static STANDARD_CODE: &[u8] = b"FFLLSSSSYY**CC*WLLLLPPPPHHQQRRRRIIIMTTTTNNKKSSRRVVVVAAAADDEEGGGG";
static VERTEBRATE_MITOCHONDRIAL_CODE: &[u8] =
    b"FFLLSSSSYY**CCWWLLLLPPPPHHQQRRRRIIMMTTTTNNKKSS**VVVVAAAADDEEGGGG";
pub static STOP: u8 = b'*';

/// Finite ordered state space. Codes `0..len()` are the resolved states, every code above
/// is an ambiguous character that aliases a set of resolved codes.
#[derive(Debug)]
pub struct Alphabet {
    name: &'static str,
    word_len: usize,
    symbols: Vec<String>,
    ambiguous: Vec<(String, Vec<usize>)>,
    index: HashMap<String, usize>,
}

impl Alphabet {
    fn new(name: &'static str, word_len: usize, symbols: Vec<String>) -> Self {
        let index = symbols
            .iter()
            .enumerate()
            .map(|(code, s)| (s.clone(), code))
            .collect();
        Alphabet {
            name,
            word_len,
            symbols,
            ambiguous: Vec::new(),
            index,
        }
    }

    fn add_ambiguous(&mut self, symbol: String, alias: Vec<usize>) {
        let code = self.symbols.len() + self.ambiguous.len();
        self.index.insert(symbol.clone(), code);
        self.ambiguous.push((symbol, alias));
    }

    pub fn name(&self) -> &str {
        self.name
    }

    /// Number of resolved states.
    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    /// Number of characters in one state symbol, 1 for nucleotides and 3 for codons.
    pub fn word_len(&self) -> usize {
        self.word_len
    }

    pub fn n_codes(&self) -> usize {
        self.symbols.len() + self.ambiguous.len()
    }

    pub fn is_valid_code(&self, code: usize) -> bool {
        code < self.n_codes()
    }

    pub fn is_resolved(&self, code: usize) -> bool {
        code < self.symbols.len()
    }

    /// Resolved codes a character stands for, a resolved code aliases itself.
    pub fn alias(&self, code: usize) -> Result<Vec<usize>> {
        if self.is_resolved(code) {
            Ok(vec![code])
        } else if self.is_valid_code(code) {
            Ok(self.ambiguous[code - self.symbols.len()].1.clone())
        } else {
            bail!(invalid_code(self, code))
        }
    }

    pub fn symbol(&self, code: usize) -> Result<&str> {
        if self.is_resolved(code) {
            Ok(&self.symbols[code])
        } else if self.is_valid_code(code) {
            Ok(&self.ambiguous[code - self.symbols.len()].0)
        } else {
            bail!(invalid_code(self, code))
        }
    }

    pub fn code(&self, symbol: &str) -> Result<usize> {
        let symbol = symbol.to_ascii_uppercase().replace('U', "T");
        match self.index.get(&symbol) {
            Some(&code) => Ok(code),
            None => bail!(DomainError {
                message: format!("Character {} is not part of the {} alphabet.", symbol, self.name),
            }),
        }
    }

    /// Splits a sequence into words of `word_len()` characters and encodes every word.
    pub fn encode(&self, sequence: &str) -> Result<Vec<usize>> {
        let chars = sequence.as_bytes();
        if chars.len() % self.word_len != 0 {
            bail!(DomainError {
                message: format!(
                    "Sequence length {} is not a multiple of {}.",
                    chars.len(),
                    self.word_len
                ),
            });
        }
        chars
            .chunks(self.word_len)
            .map(|word| self.code(&String::from_utf8_lossy(word)))
            .collect()
    }
}

fn invalid_code(alphabet: &Alphabet, code: usize) -> DomainError {
    DomainError {
        message: format!("Code {} is not valid for the {} alphabet.", code, alphabet.name),
    }
}

fn nucleotide_alias(char: u8) -> &'static [u8] {
    match char {
        b'R' => b"AG",
        b'Y' => b"CT",
        b'S' => b"CG",
        b'W' => b"AT",
        b'K' => b"GT",
        b'M' => b"AC",
        b'B' => b"CGT",
        b'D' => b"AGT",
        b'H' => b"ACT",
        b'V' => b"ACG",
        _ => b"TCAG",
    }
}

fn nucleotide_codes(char: u8) -> Vec<usize> {
    if let Some(code) = NUCLEOTIDES.iter().position(|&c| c == char) {
        return vec![code];
    }
    let mut codes: Vec<usize> = nucleotide_alias(char)
        .iter()
        .filter_map(|c| NUCLEOTIDES.iter().position(|n| n == c))
        .collect();
    codes.sort();
    codes
}

lazy_static! {
    static ref DNA: Alphabet = {
        let mut alphabet = Alphabet::new(
            "DNA",
            1,
            NUCLEOTIDES.iter().map(|&c| (c as char).to_string()).collect(),
        );
        for &char in AMB_NUCLEOTIDES {
            alphabet.add_ambiguous((char as char).to_string(), nucleotide_codes(char));
        }
        alphabet.add_ambiguous("X".to_string(), (0..4).collect());
        alphabet.add_ambiguous((GAP as char).to_string(), (0..4).collect());
        alphabet
    };
    static ref CODONS: Alphabet = {
        let all: Vec<u8> = NUCLEOTIDES.iter().chain(AMB_NUCLEOTIDES).copied().collect();
        let mut resolved = Vec::with_capacity(64);
        for &a in NUCLEOTIDES {
            for &b in NUCLEOTIDES {
                for &c in NUCLEOTIDES {
                    resolved.push(String::from_utf8_lossy(&[a, b, c]).to_string());
                }
            }
        }
        let mut alphabet = Alphabet::new("Codon", 3, resolved);
        for &a in &all {
            for &b in &all {
                for &c in &all {
                    let word = [a, b, c];
                    if word.iter().all(|n| NUCLEOTIDES.contains(n)) {
                        continue;
                    }
                    let mut alias = Vec::new();
                    for &i in &nucleotide_codes(a) {
                        for &j in &nucleotide_codes(b) {
                            for &k in &nucleotide_codes(c) {
                                alias.push(16 * i + 4 * j + k);
                            }
                        }
                    }
                    alphabet.add_ambiguous(String::from_utf8_lossy(&word).to_string(), alias);
                }
            }
        }
        alphabet.add_ambiguous("---".to_string(), (0..64).collect());
        alphabet
    };
    static ref STANDARD: GeneticCode = GeneticCode::new("Standard", STANDARD_CODE);
    static ref VERTEBRATE_MITOCHONDRIAL: GeneticCode =
        GeneticCode::new("VertebrateMitochondrial", VERTEBRATE_MITOCHONDRIAL_CODE);
}

pub fn dna_alphabet() -> &'static Alphabet {
    &DNA
}

pub fn codon_alphabet() -> &'static Alphabet {
    &CODONS
}

/// Nucleotide indices (TCAG order) of a resolved codon.
pub fn codon_nucleotides(code: usize) -> [usize; 3] {
    [code / 16, (code / 4) % 4, code % 4]
}

/// T <-> C and A <-> G.
pub fn is_transition(from: usize, to: usize) -> bool {
    from != to && from / 2 == to / 2
}

/// Translation table from codons to amino acids, consumed as a lookup service.
#[derive(Debug)]
pub struct GeneticCode {
    name: &'static str,
    amino_acids: &'static [u8],
}

impl GeneticCode {
    fn new(name: &'static str, amino_acids: &'static [u8]) -> Self {
        debug_assert_eq!(amino_acids.len(), 64);
        GeneticCode { name, amino_acids }
    }

    pub fn name(&self) -> &str {
        self.name
    }

    pub fn codon_alphabet(&self) -> &'static Alphabet {
        codon_alphabet()
    }

    pub fn translate(&self, code: usize) -> Result<u8> {
        if !codon_alphabet().is_resolved(code) {
            bail!(invalid_code(codon_alphabet(), code));
        }
        Ok(self.amino_acids[code])
    }

    pub fn is_stop(&self, code: usize) -> bool {
        codon_alphabet().is_resolved(code) && self.amino_acids[code] == STOP
    }

    /// Both codons are sense codons coding for the same amino acid.
    pub fn are_synonymous(&self, code1: usize, code2: usize) -> bool {
        let alphabet = codon_alphabet();
        alphabet.is_resolved(code1)
            && alphabet.is_resolved(code2)
            && self.amino_acids[code1] != STOP
            && self.amino_acids[code1] == self.amino_acids[code2]
    }

    pub fn sense_codons(&self) -> Vec<usize> {
        (0..64).filter(|&code| !self.is_stop(code)).collect()
    }
}

pub fn standard_genetic_code() -> &'static GeneticCode {
    &STANDARD
}

pub fn vertebrate_mitochondrial_code() -> &'static GeneticCode {
    &VERTEBRATE_MITOCHONDRIAL
}
