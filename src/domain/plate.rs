//! Colombian plate validation, OCR correction and acceptance rules.

use regex::Regex;
use serde::Serialize;
use std::sync::OnceLock;

/// Country codes reported by cameras that count as Colombian.
const COLOMBIA_COUNTRY_CODES: [&str; 3] = ["170", "210", ""];

/// Bidirectional letter/digit confusions produced by OCR.
const OCR_PAIRS: [(char, char); 6] = [
    ('O', '0'),
    ('I', '1'),
    ('Z', '2'),
    ('S', '5'),
    ('B', '8'),
    ('G', '6'),
];

/// Plate layouts issued in Colombia.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlateFormat {
    /// ABC123
    Car,
    /// ABC12D
    NewMotorcycle,
    /// ABC12
    OldMotorcycle,
    /// 123ABC
    Motocarro,
}

fn format_patterns() -> &'static [(PlateFormat, Regex); 4] {
    static PATTERNS: OnceLock<[(PlateFormat, Regex); 4]> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        let compile = |p: &str| Regex::new(p).expect("static plate pattern is valid");
        [
            (PlateFormat::Car, compile(r"^[A-Z]{3}[0-9]{3}$")),
            (PlateFormat::NewMotorcycle, compile(r"^[A-Z]{3}[0-9]{2}[A-Z]$")),
            (PlateFormat::OldMotorcycle, compile(r"^[A-Z]{3}[0-9]{2}$")),
            (PlateFormat::Motocarro, compile(r"^[0-9]{3}[A-Z]{3}$")),
        ]
    })
}

impl PlateFormat {
    /// Detects the layout of an already cleaned plate.
    pub fn detect(plate: &str) -> Option<Self> {
        let plate = plate.trim().to_uppercase();
        if plate.is_empty() {
            return None;
        }
        format_patterns()
            .iter()
            .find(|(_, re)| re.is_match(&plate))
            .map(|(format, _)| *format)
    }
}

pub fn is_colombian_plate(plate: &str) -> bool {
    PlateFormat::detect(plate).is_some()
}

fn ocr_counterpart(c: char) -> Option<char> {
    OCR_PAIRS.iter().find_map(|&(letter, digit)| {
        if c == letter {
            Some(digit)
        } else if c == digit {
            Some(letter)
        } else {
            None
        }
    })
}

/// Swaps characters at `positions` that are digits where a letter is expected
/// (`want_letter`) or letters where a digit is expected, within `budget`.
fn correct_positions(
    original: &[char],
    corrected: &mut [char],
    positions: std::ops::Range<usize>,
    want_letter: impl Fn(usize) -> bool,
    corrections: &mut usize,
    budget: usize,
) {
    for i in positions {
        let c = original[i];
        let wrong_kind = if want_letter(i) {
            c.is_ascii_digit()
        } else {
            c.is_ascii_alphabetic()
        };
        if !wrong_kind {
            continue;
        }
        if let Some(swap) = ocr_counterpart(c) {
            if *corrections < budget {
                corrected[i] = swap;
                *corrections += 1;
            }
        }
    }
}

/// Applies positional OCR corrections and returns the corrected plate with
/// the number of swaps. Returns the input and zero when no layout fits.
pub fn apply_ocr_correction(plate: &str, max_corrections: usize) -> (String, usize) {
    let plate = plate.trim().to_uppercase();
    let chars: Vec<char> = plate.chars().collect();
    let len = chars.len();
    if len < 5 {
        return (plate, 0);
    }

    // Letters-first layouts: ABC123, ABC12D, ABC12.
    let mut corrected = chars.clone();
    let mut corrections = 0;
    correct_positions(
        &chars,
        &mut corrected,
        0..3,
        |_| true,
        &mut corrections,
        max_corrections,
    );
    correct_positions(
        &chars,
        &mut corrected,
        3..len.min(6),
        |i| i == 5 && len == 6,
        &mut corrections,
        max_corrections,
    );
    let candidate: String = corrected.iter().collect();
    if is_colombian_plate(&candidate) {
        return (candidate, corrections);
    }

    // Digits-first layout: 123ABC.
    if len == 6 {
        let mut corrected = chars.clone();
        let mut corrections = 0;
        correct_positions(
            &chars,
            &mut corrected,
            0..3,
            |_| false,
            &mut corrections,
            max_corrections,
        );
        correct_positions(
            &chars,
            &mut corrected,
            3..6,
            |_| true,
            &mut corrections,
            max_corrections,
        );
        let candidate: String = corrected.iter().collect();
        if is_colombian_plate(&candidate) {
            return (candidate, corrections);
        }
    }

    (plate, 0)
}

/// Thresholds applied to every detection.
#[derive(Debug, Clone, Serialize)]
pub struct PlateRules {
    /// Minimum confidence as a percentage (0-100).
    pub min_confidence: f64,
    pub reject_foreign_plates: bool,
    pub max_ocr_corrections: usize,
    pub strict_mode: bool,
}

impl Default for PlateRules {
    fn default() -> Self {
        Self {
            min_confidence: 85.0,
            reject_foreign_plates: true,
            max_ocr_corrections: 1,
            strict_mode: false,
        }
    }
}

impl PlateRules {
    pub fn min_confidence_ratio(&self) -> f64 {
        self.min_confidence / 100.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectionKind {
    Empty,
    LowConfidence,
    Foreign,
    InvalidFormat,
}

impl RejectionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectionKind::Empty => "empty",
            RejectionKind::LowConfidence => "confidence",
            RejectionKind::Foreign => "foreign_plate",
            RejectionKind::InvalidFormat => "format",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Rejection {
    pub kind: RejectionKind,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NormalizationResult {
    pub normalized_plate: Option<String>,
    pub vehicle_type: Option<String>,
    pub is_colombian: bool,
    /// Confidence in [0, 1].
    pub confidence: f64,
    pub ocr_corrections: usize,
    pub rejection: Option<Rejection>,
}

impl NormalizationResult {
    pub fn is_valid(&self) -> bool {
        self.rejection.is_none()
    }

    /// Value for the `rejection_type` audit column, which other camera
    /// services share: `confidence` below the threshold, `foreign_plate`
    /// otherwise. The reason carries the finer kind.
    pub fn audit_rejection_type(&self, rules: &PlateRules) -> Option<&'static str> {
        self.rejection.as_ref()?;
        if self.confidence < rules.min_confidence_ratio() {
            Some("confidence")
        } else {
            Some("foreign_plate")
        }
    }
}

/// Accepts percentages or ratios and clamps them to [0, 1]. Non-finite
/// values count as zero.
pub fn normalize_confidence(confidence: f64) -> f64 {
    if !confidence.is_finite() {
        return 0.0;
    }
    let ratio = if confidence > 1.0 {
        confidence / 100.0
    } else {
        confidence
    };
    ratio.clamp(0.0, 1.0)
}

fn percent(ratio: f64) -> String {
    format!("{:.2}%", ratio * 100.0)
}

/// Normalizes and validates a plate read by a Neural camera.
///
/// Format wins over the reported country: a plate with a Colombian layout is
/// accepted whatever the camera says, the country only matters once both the
/// raw text and its OCR correction fail to match.
pub fn normalize_plate(
    plate_text: Option<&str>,
    confidence: f64,
    country: Option<&str>,
    vehicle_type: Option<&str>,
    rules: &PlateRules,
) -> NormalizationResult {
    let confidence = normalize_confidence(confidence);
    let min_confidence = rules.min_confidence_ratio();
    let vehicle_type = vehicle_type.map(str::to_owned);

    let rejected = |plate: Option<String>, kind: RejectionKind, reason: String| {
        NormalizationResult {
            normalized_plate: plate,
            vehicle_type: vehicle_type.clone(),
            is_colombian: false,
            confidence,
            ocr_corrections: 0,
            rejection: Some(Rejection { kind, reason }),
        }
    };

    let text = match plate_text {
        Some(t) if !matches!(t.to_lowercase().as_str(), "" | "unknown" | "none") => t,
        _ => {
            return rejected(
                None,
                RejectionKind::Empty,
                "Empty or unknown plate".to_string(),
            )
        }
    };

    let clean = text.trim().to_uppercase().replace([' ', '-'], "");

    if confidence < min_confidence {
        tracing::info!(
            plate = %clean,
            confidence = %percent(confidence),
            minimum = %percent(min_confidence),
            "Plate rejected for low confidence"
        );
        let reason = format!(
            "Insufficient confidence ({} < {})",
            percent(confidence),
            percent(min_confidence)
        );
        return rejected(Some(clean), RejectionKind::LowConfidence, reason);
    }

    if let Some(format) = PlateFormat::detect(&clean) {
        tracing::info!(plate = %clean, ?format, ?country, "Plate accepted by format");
        return NormalizationResult {
            normalized_plate: Some(clean),
            vehicle_type: vehicle_type.clone(),
            is_colombian: true,
            confidence,
            ocr_corrections: 0,
            rejection: None,
        };
    }

    let (corrected, corrections) = apply_ocr_correction(&clean, rules.max_ocr_corrections);
    if corrections > 0 {
        if let Some(format) = PlateFormat::detect(&corrected) {
            tracing::info!(
                raw = %clean,
                plate = %corrected,
                corrections,
                ?format,
                "Plate accepted after OCR correction"
            );
            return NormalizationResult {
                normalized_plate: Some(corrected),
                vehicle_type: vehicle_type.clone(),
                is_colombian: true,
                confidence,
                ocr_corrections: corrections,
                rejection: None,
            };
        }
    }

    let country_is_colombian = country.map_or(true, |c| COLOMBIA_COUNTRY_CODES.contains(&c));
    if rules.reject_foreign_plates && !country_is_colombian {
        tracing::info!(plate = %clean, ?country, "Foreign plate rejected");
        let reason = format!("Foreign plate (country code: {})", country.unwrap_or_default());
        return rejected(Some(clean), RejectionKind::Foreign, reason);
    }

    tracing::info!(plate = %clean, "Plate rejected for invalid format");
    let reason = format!("Invalid plate format: {}", clean);
    rejected(Some(clean), RejectionKind::InvalidFormat, reason)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules() -> PlateRules {
        PlateRules::default()
    }

    #[test]
    fn detects_every_layout() {
        assert_eq!(PlateFormat::detect("ABC123"), Some(PlateFormat::Car));
        assert_eq!(PlateFormat::detect("abc12d"), Some(PlateFormat::NewMotorcycle));
        assert_eq!(PlateFormat::detect("ABC12"), Some(PlateFormat::OldMotorcycle));
        assert_eq!(PlateFormat::detect("123ABC"), Some(PlateFormat::Motocarro));
        assert_eq!(PlateFormat::detect("AB1234"), None);
        assert_eq!(PlateFormat::detect(""), None);
    }

    #[test]
    fn ocr_fixes_letter_in_digit_position() {
        assert_eq!(apply_ocr_correction("ABCI23", 1), ("ABC123".to_string(), 1));
    }

    #[test]
    fn ocr_fixes_digit_in_letter_position() {
        assert_eq!(apply_ocr_correction("A8C123", 1), ("ABC123".to_string(), 1));
    }

    #[test]
    fn ocr_respects_budget() {
        assert_eq!(apply_ocr_correction("0BCI23", 1), ("0BCI23".to_string(), 0));
        assert_eq!(apply_ocr_correction("0BCI23", 2), ("OBC123".to_string(), 2));
    }

    #[test]
    fn ocr_falls_back_to_motocarro_layout() {
        assert_eq!(apply_ocr_correction("I23ABC", 1), ("123ABC".to_string(), 1));
    }

    #[test]
    fn ocr_ignores_short_plates() {
        assert_eq!(apply_ocr_correction("AB1", 1), ("AB1".to_string(), 0));
    }

    #[test]
    fn confidence_accepts_percent_or_ratio() {
        assert_eq!(normalize_confidence(92.0), 0.92);
        assert_eq!(normalize_confidence(0.5), 0.5);
        assert_eq!(normalize_confidence(250.0), 1.0);
        assert_eq!(normalize_confidence(-3.0), 0.0);
    }

    #[test]
    fn non_finite_confidence_is_zero() {
        assert_eq!(normalize_confidence(f64::NAN), 0.0);
        assert_eq!(normalize_confidence(f64::INFINITY), 0.0);

        let result = normalize_plate(Some("ABC123"), f64::NAN, None, None, &rules());
        assert_eq!(result.confidence, 0.0);
        assert_eq!(result.rejection.unwrap().kind, RejectionKind::LowConfidence);
    }

    #[test]
    fn accepts_valid_plate_and_cleans_it() {
        let result = normalize_plate(Some(" abc-123 "), 95.0, None, None, &rules());
        assert!(result.is_valid());
        assert!(result.is_colombian);
        assert_eq!(result.normalized_plate.as_deref(), Some("ABC123"));
        assert_eq!(result.ocr_corrections, 0);
    }

    #[test]
    fn rejects_empty_and_unknown() {
        for text in [None, Some(""), Some("UNKNOWN"), Some("None")] {
            let result = normalize_plate(text, 99.0, None, None, &rules());
            assert_eq!(result.rejection.unwrap().kind, RejectionKind::Empty);
        }
    }

    #[test]
    fn rejects_low_confidence_with_percentages() {
        let result = normalize_plate(Some("ABC123"), 72.0, None, None, &rules());
        let rejection = result.rejection.unwrap();
        assert_eq!(rejection.kind, RejectionKind::LowConfidence);
        assert_eq!(rejection.reason, "Insufficient confidence (72.00% < 85.00%)");
    }

    #[test]
    fn accepts_after_ocr_correction() {
        let result = normalize_plate(Some("ABCI23"), 90.0, None, None, &rules());
        assert!(result.is_valid());
        assert_eq!(result.normalized_plate.as_deref(), Some("ABC123"));
        assert_eq!(result.ocr_corrections, 1);
    }

    #[test]
    fn rejects_foreign_country_only_when_format_fails() {
        let accepted = normalize_plate(Some("ABC123"), 90.0, Some("840"), None, &rules());
        assert!(accepted.is_valid());

        let foreign = normalize_plate(Some("7ABC123"), 90.0, Some("840"), None, &rules());
        assert_eq!(foreign.rejection.unwrap().kind, RejectionKind::Foreign);

        let lenient = PlateRules {
            reject_foreign_plates: false,
            ..rules()
        };
        let invalid = normalize_plate(Some("7ABC123"), 90.0, Some("840"), None, &lenient);
        assert_eq!(invalid.rejection.unwrap().kind, RejectionKind::InvalidFormat);
    }

    #[test]
    fn rejects_invalid_format_without_country() {
        let result = normalize_plate(Some("XY9"), 90.0, None, Some("car"), &rules());
        assert_eq!(result.vehicle_type.as_deref(), Some("car"));
        let rejection = result.rejection.unwrap();
        assert_eq!(rejection.kind, RejectionKind::InvalidFormat);
        assert_eq!(rejection.reason, "Invalid plate format: XY9");
    }

    #[test]
    fn audit_type_prefers_confidence_over_finer_kind() {
        let empty = normalize_plate(None, 10.0, None, None, &rules());
        assert_eq!(empty.rejection.as_ref().unwrap().kind, RejectionKind::Empty);
        assert_eq!(empty.audit_rejection_type(&rules()), Some("confidence"));

        let format = normalize_plate(Some("XY9"), 95.0, None, None, &rules());
        assert_eq!(format.audit_rejection_type(&rules()), Some("foreign_plate"));

        let accepted = normalize_plate(Some("ABC123"), 95.0, None, None, &rules());
        assert_eq!(accepted.audit_rejection_type(&rules()), None);
    }
}
