/*!
 * NDC Normalization & Barcode Parsing
 *
 * The canonical NDC is 11 digits: 5-digit labeler, 4-digit product,
 * 2-digit package. Manufacturers print 10-digit variants in three dash
 * layouts (4-4-2, 5-3-2, 5-4-1); each pads a different segment.
 *
 * Barcode inputs accepted:
 * - UPC-A: 12 digits; drop the leading number-system digit and the
 *   trailing check digit, pad the remaining 10 to 11
 * - Raw NDC: 10 or 11 digits, pad to 11
 * - Dashed NDC: 4-4-2, 5-3-2, 5-4-1, 5-4-2
 * - GS1 DataMatrix: "01" AI + GTIN-14; strip the indicator digit and
 *   check digit, drop the leading packaging zeros
 */

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Barcode format recognized during parsing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BarcodeFormat {
    UpcA,
    RawNdc,
    DashedNdc,
    Gs1DataMatrix,
}

/// Typed barcode parse failure
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BarcodeError {
    #[error("barcode is empty")]
    Empty,
    #[error("unrecognized barcode format: length {0}")]
    UnrecognizedFormat(usize),
    #[error("invalid dashed NDC layout `{0}`")]
    InvalidDashLayout(String),
    #[error("barcode contains non-digit characters")]
    NonDigit,
}

/// A parsed barcode: the canonical 11-digit NDC plus the source format
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedBarcode {
    pub ndc: String,
    pub format: BarcodeFormat,
}

static DASHED_NDC: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{4,5})-(\d{3,4})-(\d{1,2})$").unwrap());

/// Normalize a 10- or 11-digit NDC (dashed or raw) to the canonical
/// 11-digit form. Returns `None` for anything else.
pub fn normalize_ndc(input: &str) -> Option<String> {
    let trimmed = input.trim();
    if let Some(caps) = DASHED_NDC.captures(trimmed) {
        let labeler = caps.get(1).unwrap().as_str();
        let product = caps.get(2).unwrap().as_str();
        let package = caps.get(3).unwrap().as_str();
        if labeler.len() + product.len() + package.len() < 10 {
            return None;
        }
        return Some(format!(
            "{:0>5}{:0>4}{:0>2}",
            labeler, product, package
        ));
    }

    if !trimmed.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    match trimmed.len() {
        // Raw 10-digit codes conventionally omit the labeler's leading zero
        10 => Some(format!("0{}", trimmed)),
        11 => Some(trimmed.to_string()),
        _ => None,
    }
}

/// Format a canonical 11-digit NDC in the 5-4-2 dashed layout
pub fn format_ndc(ndc: &str) -> Option<String> {
    let canonical = normalize_ndc(ndc)?;
    Some(format!(
        "{}-{}-{}",
        &canonical[0..5],
        &canonical[5..9],
        &canonical[9..11]
    ))
}

/// Labeler + product segment (first nine digits); two NDCs with equal
/// segments are package variants of the same product
pub fn labeler_product(ndc: &str) -> Option<String> {
    normalize_ndc(ndc).map(|canonical| canonical[0..9].to_string())
}

/// GS1 mod-10 check digit over the preceding digits
fn gs1_check_digit(digits: &str) -> u32 {
    let sum: u32 = digits
        .chars()
        .rev()
        .enumerate()
        .map(|(i, c)| {
            let d = c.to_digit(10).unwrap_or(0);
            if i % 2 == 0 {
                d * 3
            } else {
                d
            }
        })
        .sum();
    (10 - (sum % 10)) % 10
}

/// Encode a canonical NDC in one of the supported barcode formats.
/// Inverse of [`parse_barcode`] for every format.
pub fn encode_barcode(ndc: &str, format: BarcodeFormat) -> Option<String> {
    let canonical = normalize_ndc(ndc)?;
    match format {
        BarcodeFormat::RawNdc => Some(canonical),
        BarcodeFormat::DashedNdc => format_ndc(&canonical),
        BarcodeFormat::UpcA => {
            // NDC10 payload: canonical minus the padded labeler zero
            let payload = format!("3{}", &canonical[1..11]);
            let check = gs1_check_digit(&payload);
            Some(format!("{}{}", payload, check))
        }
        BarcodeFormat::Gs1DataMatrix => {
            let body = format!("00{}", canonical);
            let check = gs1_check_digit(&body);
            Some(format!("01{}{}", body, check))
        }
    }
}

/// Parse a scanned barcode into a canonical NDC
pub fn parse_barcode(raw: &str) -> Result<ParsedBarcode, BarcodeError> {
    let scanned = raw.trim();
    if scanned.is_empty() {
        return Err(BarcodeError::Empty);
    }

    // GS1 DataMatrix: application identifier 01 followed by GTIN-14
    if let Some(gtin) = scanned.strip_prefix("01") {
        if gtin.len() == 14 && gtin.chars().all(|c| c.is_ascii_digit()) {
            // Drop indicator digit and check digit, then leading zeros
            let inner = &gtin[1..13];
            let stripped = inner.trim_start_matches('0');
            let ndc = match stripped.len() {
                10 | 11 => normalize_ndc(stripped),
                // A short remainder means more packaging zeros than NDC
                _ if stripped.len() < 10 => normalize_ndc(&format!("{:0>10}", stripped)),
                _ => None,
            }
            .ok_or(BarcodeError::UnrecognizedFormat(scanned.len()))?;
            return Ok(ParsedBarcode {
                ndc,
                format: BarcodeFormat::Gs1DataMatrix,
            });
        }
    }

    if scanned.contains('-') {
        if !DASHED_NDC.is_match(scanned) {
            return Err(BarcodeError::InvalidDashLayout(scanned.to_string()));
        }
        let ndc = normalize_ndc(scanned)
            .ok_or_else(|| BarcodeError::InvalidDashLayout(scanned.to_string()))?;
        return Ok(ParsedBarcode {
            ndc,
            format: BarcodeFormat::DashedNdc,
        });
    }

    if !scanned.chars().all(|c| c.is_ascii_digit()) {
        return Err(BarcodeError::NonDigit);
    }

    match scanned.len() {
        12 => {
            // UPC-A: number-system digit + 10-digit NDC + check digit
            let inner = &scanned[1..11];
            let ndc = normalize_ndc(inner).ok_or(BarcodeError::UnrecognizedFormat(12))?;
            Ok(ParsedBarcode {
                ndc,
                format: BarcodeFormat::UpcA,
            })
        }
        10 | 11 => {
            let ndc = normalize_ndc(scanned).ok_or(BarcodeError::UnrecognizedFormat(scanned.len()))?;
            Ok(ParsedBarcode {
                ndc,
                format: BarcodeFormat::RawNdc,
            })
        }
        other => Err(BarcodeError::UnrecognizedFormat(other)),
    }
}
