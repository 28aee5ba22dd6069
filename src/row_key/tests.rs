use super::*;

use rand::Rng;
use rand::seq::SliceRandom;

//-----------------------------------------------------------------------------

fn test_variants() -> Vec<VariantKey> {
    vec![
        VariantKey::new("1", 1000, "A", "C"),
        VariantKey::new("1", 1000, "A", ""),
        VariantKey::new("1", 1000, "", "T"),
        VariantKey::new("1", 1000, "AC", "A"),
        VariantKey::new("1", 65536, "G", "T"),
        VariantKey::new("1", 16777216, "G", "<DEL>"),
        VariantKey::new("10", 1, "T", "TA"),
        VariantKey::new("2", 0, "N", "A"),
        VariantKey::new("X", u32::MAX, "C", "G"),
        VariantKey::new("MT", 16569, "A", "G"),
        VariantKey::new("GL000192.1", 256, "ACGT", ""),
    ]
}

fn check_round_trip(variant: &VariantKey) {
    let key = variant.encode();
    let decoded = VariantKey::decode(&key);
    assert!(decoded.is_ok(), "Failed to decode {}: {}", variant, decoded.unwrap_err());
    assert_eq!(decoded.unwrap(), *variant, "Wrong round trip for {}", variant);
}

fn random_allele<R: Rng>(rng: &mut R) -> String {
    let len = rng.gen_range(0..4);
    (0..len).map(|_| *[b'A', b'C', b'G', b'T'].choose(rng).unwrap() as char).collect()
}

fn random_variant<R: Rng>(rng: &mut R) -> VariantKey {
    let chromosomes = ["1", "2", "10", "11", "X", "Y", "MT"];
    let chromosome = chromosomes.choose(rng).unwrap();
    let position = rng.gen_range(0..3) * 256 + rng.gen_range(0..3);
    VariantKey::new(chromosome, position, &random_allele(rng), &random_allele(rng))
}

//-----------------------------------------------------------------------------

#[test]
fn chromosome_normalization() {
    assert_eq!(normalize_chromosome("chr1"), "1", "chr prefix not stripped");
    assert_eq!(normalize_chromosome("Chr22"), "22", "Mixed case prefix not stripped");
    assert_eq!(normalize_chromosome("chromX"), "X", "chrom prefix not stripped");
    assert_eq!(normalize_chromosome(" 7 "), "7", "Whitespace not trimmed");
    assert_eq!(normalize_chromosome("M"), "MT", "M not mapped to MT");
    assert_eq!(normalize_chromosome("chrM"), "MT", "chrM not mapped to MT");
    assert_eq!(normalize_chromosome("chr"), "chr", "Prefix-only name was modified");
    assert_eq!(normalize_chromosome("CHM13"), "CHM13", "Non-prefix name was modified");

    let key1 = encode("chr1", 100, "A", "C");
    let key2 = encode("1", 100, "A", "C");
    assert_eq!(key1, key2, "Different spellings of a chromosome produce different keys");
}

#[test]
fn round_trip() {
    for variant in test_variants() {
        check_round_trip(&variant);
    }

    // Decoding returns the normalized chromosome.
    let key = encode("chrX", 5, "A", "");
    let decoded = decode(&key).unwrap();
    assert_eq!(decoded, (String::from("X"), 5, String::from("A"), String::new()), "Wrong decoded tuple");
}

#[test]
fn empty_alternate() {
    let with_alt = encode("1", 100, "A", "C");
    let without_alt = encode("1", 100, "A", "");
    assert_eq!(with_alt.len(), without_alt.len() + 2, "Separator was not omitted for an empty alternate");
    assert_eq!(without_alt.last(), Some(&b'A'), "Key does not end with the reference");

    let decoded = VariantKey::decode(&without_alt).unwrap();
    assert!(decoded.alternate.is_empty(), "Empty alternate decoded as {}", decoded.alternate);
}

#[test]
fn position_with_zero_bytes() {
    // Position 0x00010000 contains zero bytes that must not be mistaken for separators.
    let variant = VariantKey::new("3", 0x0001_0000, "A", "G");
    check_round_trip(&variant);
    let variant = VariantKey::new("3", 0, "", "");
    check_round_trip(&variant);
}

#[test]
fn ordering() {
    let mut variants = test_variants();
    variants.sort();
    for pair in variants.windows(2) {
        let (first, second) = (&pair[0], &pair[1]);
        assert!(first.encode() < second.encode(), "Key order differs from tuple order for {} and {}", first, second);
    }
}

#[test]
fn random_ordering() {
    let mut rng = rand::thread_rng();
    for _ in 0..1000 {
        let first = random_variant(&mut rng);
        let second = random_variant(&mut rng);
        assert_eq!(
            first.encode().cmp(&second.encode()), first.cmp(&second),
            "Key order differs from tuple order for {} and {}", first, second
        );
        check_round_trip(&first);
    }
}

#[test]
fn malformed_keys() {
    let cases: Vec<(&[u8], &str)> = vec![
        (b"", "empty key"),
        (b"1", "missing separator"),
        (b"1\x00\x00\x00", "truncated position"),
        (b"1\x00\x00\x00\x00\x01\xff\xfe", "invalid reference"),
    ];
    for (bytes, name) in cases {
        let result = decode(bytes);
        match result {
            Err(Error::Decoding { bytes: raw, .. }) => assert_eq!(raw, bytes, "Wrong raw bytes for {}", name),
            Err(err) => panic!("Wrong error type for {}: {}", name, err),
            Ok(decoded) => panic!("Decoded {} as {:?}", name, decoded),
        }
    }

    // Error messages report the bytes in hex.
    let err = decode(b"1\x00\x01").unwrap_err();
    assert!(err.to_string().contains("310001"), "Raw bytes missing from error message: {}", err);
}

#[test]
fn hex_keys() {
    let variant = VariantKey::new("1", 1000, "A", "C");
    let hex = variant.to_hex();
    assert_eq!(hex, "3100000003e8410043", "Wrong hex key");
    let decoded = VariantKey::from_hex(&hex);
    assert!(decoded.is_ok(), "Failed to decode hex key: {}", decoded.unwrap_err());
    assert_eq!(decoded.unwrap(), variant, "Wrong variant from hex key");

    assert!(VariantKey::from_hex("310").is_err(), "Odd-length hex key was accepted");
    assert!(VariantKey::from_hex("zz").is_err(), "Invalid hex digits were accepted");
}

#[test]
fn variant_parsing() {
    let variant: VariantKey = "chr2:300:AT:-".parse().unwrap();
    assert_eq!(variant, VariantKey::new("2", 300, "AT", ""), "Wrong parsed deletion");
    assert_eq!(variant.to_string(), "2:300:AT:-", "Wrong display for an empty allele");

    let variant: VariantKey = "5:10:A".parse().unwrap();
    assert!(variant.alternate.is_empty(), "Missing alternate was not empty");

    assert!("1:x:A:C".parse::<VariantKey>().is_err(), "Invalid position accepted");
    assert!("1:100".parse::<VariantKey>().is_err(), "Missing alleles accepted");
    assert!(":100:A:C".parse::<VariantKey>().is_err(), "Empty chromosome accepted");

    assert!(is_variant_id("1:100:A:C"), "Variant id not recognized");
    assert!(!is_variant_id("rs123"), "Xref recognized as a variant id");
    assert!(!is_variant_id("BRCA2"), "Gene recognized as a variant id");
}

#[test]
fn variant_types() {
    assert_eq!("snv".parse::<VariantType>().unwrap(), VariantType::Snv, "Case-insensitive parsing failed");
    assert_eq!(VariantType::Snv.with_subtypes(), vec![VariantType::Snv, VariantType::Snp], "Wrong SNV subtypes");
    assert_eq!(VariantType::Cnv.subtypes().len(), 3, "Wrong number of CNV subtypes");
    assert!(VariantType::Indel.subtypes().is_empty(), "INDEL should have no subtypes");
    for variant_type in VariantType::ALL.iter() {
        let parsed: VariantType = variant_type.to_string().parse().unwrap();
        assert_eq!(parsed, *variant_type, "Display/parse mismatch for {}", variant_type);
    }
    assert!("SNX".parse::<VariantType>().is_err(), "Unknown type accepted");
}

//-----------------------------------------------------------------------------
