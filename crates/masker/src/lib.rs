//! editorial_masker
//!
//! Deterministic, stateless PII masking at three progressive levels:
//! `normal ⊂ strict ⊂ paranoid`. `mask()` is a pure function: the same
//! `(level, text, options)` always produces byte-identical output.
//!
//! Patterns are claimed in a fixed priority order (most specific first)
//! so that once a span is replaced, no lower-priority pattern can touch
//! it. The claim-then-render pass runs up to [`MAX_PASSES`] times to
//! catch masking tokens that expose new matches (e.g. a phone number
//! embedded in a longer digit run that only becomes a bare run once the
//! surrounding text collapses).

use editorial_common::SanitizeLevel;
use regex::Regex;
use std::sync::OnceLock;
use unicode_normalization::UnicodeNormalization;

const MAX_PASSES: usize = 3;

const SWEDISH_MONTHS: &[&str] = &[
    "januari", "februari", "mars", "april", "maj", "juni", "juli", "augusti", "september",
    "oktober", "november", "december",
];

const SWEDISH_WEEKDAYS: &[&str] = &[
    "måndag", "tisdag", "onsdag", "torsdag", "fredag", "lördag", "söndag",
];

fn email_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").unwrap())
}

fn personnummer_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b(?:\d{6}|\d{8})[-+]?\d{4}\b").unwrap())
}

fn phone_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\b(?:\+\d{1,3}[\s.-]?)?\(?0\)?\d{1,4}(?:[\s.-]\d{2,4}){3,5}\b").unwrap()
    })
}

fn id_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b[A-ZÅÄÖ]{1,5}-?\d{2,6}(?:[/-]\d{2,6})?\b").unwrap())
}

fn date_iso_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b\d{4}-\d{2}-\d{2}\b").unwrap())
}

fn date_written_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        let months = SWEDISH_MONTHS.join("|");
        let pattern = format!(r"\b\d{{1,2}}\s+(?:{months})(?:\s+\d{{4}})?\b");
        Regex::new(&pattern).unwrap()
    })
}

fn date_weekday_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        let weekdays = SWEDISH_WEEKDAYS.join("|");
        let pattern = format!(r"(?i)\b(?:{weekdays})(?:en)?\s+den\s+\d{{1,2}}(?::e)?\b");
        Regex::new(&pattern).unwrap()
    })
}

fn amount_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b\d[\d\s.,]*\s?(kr|kronor|sek|usd|eur)\b|[$€]\s?\d[\d\s.,]*").unwrap()
    })
}

fn long_numeric_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\d{6,}").unwrap())
}

fn short_numeric_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\d+").unwrap())
}

/// Priority rank: lower claims first. Ties broken by leftmost start,
/// then by longest match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct Rank(u8);

const RANK_EMAIL: Rank = Rank(0);
const RANK_PERSONNUMMER: Rank = Rank(1);
const RANK_PHONE: Rank = Rank(2);
const RANK_ID: Rank = Rank(3);
const RANK_DATE: Rank = Rank(4);
const RANK_AMOUNT: Rank = Rank(5);
const RANK_LONG_NUMERIC: Rank = Rank(6);
const RANK_SHORT_NUMERIC: Rank = Rank(7);

#[derive(Debug, Clone)]
struct Candidate {
    start: usize,
    end: usize,
    rank: Rank,
    replacement: &'static str,
}

/// Per-class counts produced by a single [`mask`] call.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct MaskStats {
    pub email: u64,
    pub phone: u64,
    pub personnummer: u64,
    pub long_numeric: u64,
    pub short_numeric: u64,
    pub date: u64,
    pub amount: u64,
    pub id: u64,
}

impl MaskStats {
    fn bump(&mut self, replacement: &str) {
        match replacement {
            "[EMAIL]" => self.email += 1,
            "[PHONE]" => self.phone += 1,
            "[PERSONNUMMER]" => self.personnummer += 1,
            "[NUM]" => {
                // long vs short numeric are distinguished by rank at call time
            }
            "[DATE]" => self.date += 1,
            "[AMOUNT]" => self.amount += 1,
            "[ID]" => self.id += 1,
            _ => {}
        }
    }

    pub fn total(&self) -> u64 {
        self.email
            + self.phone
            + self.personnummer
            + self.long_numeric
            + self.short_numeric
            + self.date
            + self.amount
            + self.id
    }
}

/// Options that influence masking beyond the bare level, all sourced
/// from the active compile policy.
#[derive(Debug, Clone, Copy, Default)]
pub struct MaskOptions {
    /// Whether strict-level masking should also fold in dates. Paranoid
    /// always masks dates regardless of this flag.
    pub date_strictness: bool,
}

/// Result of a single [`mask`] call.
#[derive(Debug, Clone)]
pub struct MaskResult {
    pub text: String,
    pub stats: MaskStats,
}

fn active_patterns(level: SanitizeLevel, options: MaskOptions) -> Vec<(Rank, &'static Regex, &'static str)> {
    let mut v: Vec<(Rank, &'static Regex, &'static str)> = vec![
        (RANK_EMAIL, email_re(), "[EMAIL]"),
        (RANK_PERSONNUMMER, personnummer_re(), "[PERSONNUMMER]"),
        (RANK_PHONE, phone_re(), "[PHONE]"),
    ];

    let mask_dates = matches!(level, SanitizeLevel::Paranoid)
        || (matches!(level, SanitizeLevel::Strict) && options.date_strictness);
    if mask_dates {
        v.push((RANK_DATE, date_iso_re(), "[DATE]"));
        v.push((RANK_DATE, date_written_re(), "[DATE]"));
        v.push((RANK_DATE, date_weekday_re(), "[DATE]"));
    }

    if matches!(level, SanitizeLevel::Strict | SanitizeLevel::Paranoid) {
        v.push((RANK_LONG_NUMERIC, long_numeric_re(), "[NUM]"));
    }

    if matches!(level, SanitizeLevel::Paranoid) {
        v.push((RANK_ID, id_re(), "[ID]"));
        v.push((RANK_AMOUNT, amount_re(), "[AMOUNT]"));
        v.push((RANK_SHORT_NUMERIC, short_numeric_re(), "[NUM]"));
    }

    v
}

fn normalize(text: &str) -> String {
    let nfc: String = text.nfc().collect();
    let mut out = String::with_capacity(nfc.len());
    let mut last_was_space = false;
    for ch in nfc.chars() {
        // Strip zero-width characters outright.
        if matches!(ch, '\u{200B}' | '\u{200C}' | '\u{200D}' | '\u{FEFF}') {
            continue;
        }
        if ch == '\r' {
            continue;
        }
        if ch.is_whitespace() && ch != '\n' {
            if last_was_space {
                continue;
            }
            last_was_space = true;
            out.push(' ');
        } else {
            last_was_space = false;
            out.push(ch);
        }
    }
    out
}

fn mask_pass(level: SanitizeLevel, text: &str, options: MaskOptions) -> (String, MaskStats, bool) {
    let patterns = active_patterns(level, options);
    let mut candidates: Vec<Candidate> = Vec::new();
    for (rank, re, replacement) in &patterns {
        for m in re.find_iter(text) {
            candidates.push(Candidate { start: m.start(), end: m.end(), rank: *rank, replacement });
        }
    }

    // Higher priority (lower rank) claims first; within a rank, leftmost
    // then longest wins; reject anything overlapping an already-claimed span.
    candidates.sort_by(|a, b| {
        a.rank
            .cmp(&b.rank)
            .then(a.start.cmp(&b.start))
            .then((b.end - b.start).cmp(&(a.end - a.start)))
    });

    let mut claimed: Vec<(usize, usize, &'static str)> = Vec::new();
    for c in candidates {
        let overlaps = claimed.iter().any(|(s, e, _)| c.start < *e && *s < c.end);
        if !overlaps {
            claimed.push((c.start, c.end, c.replacement));
        }
    }
    claimed.sort_by_key(|(s, _, _)| *s);

    let mut out = String::with_capacity(text.len());
    let mut stats = MaskStats::default();
    let mut cursor = 0usize;
    let mut changed = false;
    for (start, end, replacement) in &claimed {
        out.push_str(&text[cursor..*start]);
        out.push_str(replacement);
        bump_with_rank(&mut stats, replacement, *start, *end, &patterns);
        cursor = *end;
        changed = true;
    }
    out.push_str(&text[cursor..]);
    (out, stats, changed)
}

/// `[NUM]` is emitted by two distinct ranks (long vs short numeric); we
/// need the original rank to attribute the stat correctly, so re-derive
/// it from which pattern produced the longest/shortest run at this span.
fn bump_with_rank(
    stats: &mut MaskStats,
    replacement: &str,
    start: usize,
    end: usize,
    patterns: &[(Rank, &'static Regex, &'static str)],
) {
    if replacement != "[NUM]" {
        stats.bump(replacement);
        return;
    }
    let len = end - start;
    let is_long = len >= 6
        && patterns
            .iter()
            .any(|(rank, _, repl)| *repl == "[NUM]" && *rank == RANK_LONG_NUMERIC);
    if is_long {
        stats.long_numeric += 1;
    } else {
        stats.short_numeric += 1;
    }
}

/// Deterministically mask `text` at the given `level`. Idempotent:
/// `mask(level, mask(level, t).text).text == mask(level, t).text`.
pub fn mask(level: SanitizeLevel, text: &str, options: MaskOptions) -> MaskResult {
    let mut current = normalize(text);
    let mut total = MaskStats::default();

    for _ in 0..MAX_PASSES {
        let (next, stats, changed) = mask_pass(level, &current, options);
        total.email += stats.email;
        total.phone += stats.phone;
        total.personnummer += stats.personnummer;
        total.long_numeric += stats.long_numeric;
        total.short_numeric += stats.short_numeric;
        total.date += stats.date;
        total.amount += stats.amount;
        total.id += stats.id;
        current = next;
        if !changed {
            break;
        }
    }

    MaskResult { text: current, stats: total }
}

/// Superset PII sweep used by the Gate Engine's leak check (§4.8): true
/// if any email, phone, or personnummer pattern still matches `text`.
pub fn pii_leak_detected(text: &str) -> bool {
    email_re().is_match(text) || phone_re().is_match(text) || personnummer_re().is_match(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normal_masks_email_phone_personnummer_but_preserves_dates() {
        let input = "Kontakta Anna anna@ex.com tel 070-123 45 67 den 2025-06-01 angående projektet.";
        let r = mask(SanitizeLevel::Normal, input, MaskOptions::default());
        assert!(r.text.contains("[EMAIL]"));
        assert!(r.text.contains("[PHONE]"));
        assert!(r.text.contains("2025-06-01"));
    }

    #[test]
    fn normal_masks_personnummer() {
        let input = "Personnummer: 19850315-1234 registrerat.";
        let r = mask(SanitizeLevel::Normal, input, MaskOptions::default());
        assert!(r.text.contains("[PERSONNUMMER]"));
        assert!(!pii_leak_detected(&r.text));
    }

    #[test]
    fn strict_masks_long_numbers_but_not_short() {
        let input = "Ärendet har diarienummer 1234567 och rum 12.";
        let r = mask(SanitizeLevel::Strict, input, MaskOptions::default());
        assert!(r.text.contains("[NUM]"));
        assert!(r.text.contains("12"));
    }

    #[test]
    fn paranoid_masks_all_digits_amounts_and_ids() {
        let input = "Betalning 500 kr till konto K123/2025 den 5 mars 2025.";
        let r = mask(SanitizeLevel::Paranoid, input, MaskOptions::default());
        assert!(!r.text.contains("500"));
        assert!(r.text.contains("[AMOUNT]"));
        assert!(r.text.contains("[ID]"));
        assert!(r.text.contains("[DATE]"));
    }

    #[test]
    fn masking_is_idempotent() {
        let input = "Mejla anna@ex.com eller ring 070-123 45 67, pnr 19850315-1234.";
        for level in [SanitizeLevel::Normal, SanitizeLevel::Strict, SanitizeLevel::Paranoid] {
            let once = mask(level, input, MaskOptions::default());
            let twice = mask(level, &once.text, MaskOptions::default());
            assert_eq!(once.text, twice.text, "level {level:?} not idempotent");
        }
    }

    #[test]
    fn masking_is_deterministic_across_calls() {
        let input = "anna@ex.com ringde 070-123 45 67 den 2025-06-01.";
        let a = mask(SanitizeLevel::Paranoid, input, MaskOptions::default());
        let b = mask(SanitizeLevel::Paranoid, input, MaskOptions::default());
        assert_eq!(a.text, b.text);
    }

    #[test]
    fn level_monotonicity_strict_masks_everything_normal_does() {
        let input = "anna@ex.com 070-123 45 67 19850315-1234";
        let normal = mask(SanitizeLevel::Normal, input, MaskOptions::default());
        let strict = mask(SanitizeLevel::Strict, input, MaskOptions::default());
        assert!(!pii_leak_detected(&normal.text));
        assert!(!pii_leak_detected(&strict.text));
    }

    #[test]
    fn line_endings_are_normalized() {
        let input = "rad1\r\nrad2\rrad3";
        let r = mask(SanitizeLevel::Normal, input, MaskOptions::default());
        assert!(!r.text.contains('\r'));
    }
}
