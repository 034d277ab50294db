//! Row classification for the Items panel.
//!
//! The portal mixes genuine line-item rows with history-log entries,
//! attachment listings, and layout filler. The classifier is two-tier:
//! hard noise rejection first, then an item-shaped acceptance heuristic with
//! a permissive length-based fallback. Rows rejected here are only ever
//! reconsidered by the text-fallback extraction path, never dropped from the
//! aggregate statistics silently.

use lazy_static::lazy_static;
use regex::Regex;

use crate::normalize::looks_like_currency;

lazy_static! {
    // History rows carry a timestamp with a time-of-day component,
    // either "15/03/2024 10:22" or ISO "2024-05-01 10:22:33"
    static ref TIMESTAMP_BR: Regex =
        Regex::new(r"\d{1,2}/\d{1,2}/\d{4}\s+\d{1,2}:\d{2}").unwrap();
    static ref TIMESTAMP_ISO: Regex =
        Regex::new(r"\d{4}-\d{2}-\d{2}\s+\d{1,2}:\d{2}").unwrap();

    // Attachment rows end in a known file extension
    static ref FILENAME_SUFFIX: Regex =
        Regex::new(r"(?i)\.(pdf|docx?|xlsx?|rar|zip)\s*$").unwrap();

    // Audit-trail rows pair a change verb with its object
    static ref AUDIT_TRAIL: Regex = Regex::new(
        r"(?i)(inclus[ãa]o|altera[çc][ãa]o|publica[çc][ãa]o).{0,60}(documento|arquivo|edital|anexo)"
    ).unwrap();

    // Three or more letters in a row, accented letters included
    static ref ALPHA_RUN: Regex = Regex::new(r"\p{L}{3,}").unwrap();

    static ref DIGIT_RUN: Regex = Regex::new(r"\d+").unwrap();
}

/// Classifies the concatenated text of one candidate row.
pub fn is_line_item_row(text: &str) -> bool {
    let row = text.trim();
    if row.is_empty() {
        return false;
    }
    if TIMESTAMP_BR.is_match(row) || TIMESTAMP_ISO.is_match(row) {
        return false;
    }
    if FILENAME_SUFFIX.is_match(row) {
        return false;
    }
    if AUDIT_TRAIL.is_match(row) {
        return false;
    }

    // Item shape: a description word, a number, and either a currency
    // marker or a second number (quantity + value structure).
    let digit_runs = DIGIT_RUN.find_iter(row).count();
    if ALPHA_RUN.is_match(row) && digit_runs >= 1 {
        if looks_like_currency(row) || digit_runs >= 2 {
            return true;
        }
    }

    // Permissive fallback: long enough and not purely digits or punctuation.
    row.chars().count() >= 10 && row.chars().any(char::is_alphabetic)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_history_rows() {
        assert!(!is_line_item_row("2024-05-01 10:22:33 Inclusão - Documento"));
        assert!(!is_line_item_row("15/03/2024 08:00 Alteração de edital"));
    }

    #[test]
    fn test_rejects_attachment_rows() {
        assert!(!is_line_item_row("edital_pregao_45.pdf"));
        assert!(!is_line_item_row("anexo-i-termo-referencia.DOCX"));
    }

    #[test]
    fn test_rejects_audit_trail_rows() {
        assert!(!is_line_item_row("Publicação do edital no diário"));
        assert!(!is_line_item_row("Inclusão - Documento"));
    }

    #[test]
    fn test_rejects_blank_rows() {
        assert!(!is_line_item_row(""));
        assert!(!is_line_item_row("   \t  "));
    }

    #[test]
    fn test_accepts_item_shaped_rows() {
        assert!(is_line_item_row(
            "01 Fornecimento de merenda escolar 500 R$ 12,50 R$ 6250,00"
        ));
        assert!(is_line_item_row("2 Caneta esferográfica azul 1000 3,20"));
    }

    #[test]
    fn test_fallback_accepts_long_textual_rows() {
        assert!(is_line_item_row("Prestação de serviços gerais"));
    }

    #[test]
    fn test_fallback_rejects_short_or_numeric_rows() {
        assert!(!is_line_item_row("10"));
        assert!(!is_line_item_row("123456789012"));
        assert!(!is_line_item_row("--- ---- ---"));
    }
}
