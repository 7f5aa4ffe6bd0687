use crate::cnpj_finder::{AUTOMATION_ERROR, NOT_FOUND};
use crate::seller::{SellerRecord, NOT_AVAILABLE};

#[derive(Debug, Clone, PartialEq)]
pub struct BatchReport {
    pub total_rows: usize,
    pub api_errors: usize,
    pub searched: usize,
    pub cnpj_found: usize,
    pub cnpj_errors: usize,
    pub duration_secs: f64,
    pub rows_per_minute: f64,
}

impl BatchReport {
    pub fn new(records: &[SellerRecord], duration_secs: f64) -> Self {
        let total_rows = records.len();
        let api_errors = records.iter().filter(|r| r.is_error()).count();
        let searched = records.iter().filter(|r| r.cnpj_found != NOT_AVAILABLE).count();
        let cnpj_errors = records
            .iter()
            .filter(|r| r.cnpj_found == AUTOMATION_ERROR)
            .count();
        let cnpj_found = records
            .iter()
            .filter(|r| ![NOT_AVAILABLE, NOT_FOUND, AUTOMATION_ERROR].contains(&r.cnpj_found.as_str()))
            .count();

        let rows_per_minute = if duration_secs > 0.0 {
            (total_rows as f64 / duration_secs) * 60.0
        } else {
            0.0
        };

        Self {
            total_rows,
            api_errors,
            searched,
            cnpj_found,
            cnpj_errors,
            duration_secs,
            rows_per_minute,
        }
    }

    /// `1h02m05s`, `1m05s` or `5s`.
    pub fn format_duration(&self) -> String {
        let total = self.duration_secs as u64;
        let (hours, minutes, seconds) = (total / 3600, total % 3600 / 60, total % 60);
        match (hours, minutes) {
            (0, 0) => format!("{}s", seconds),
            (0, _) => format!("{}m{:02}s", minutes, seconds),
            _ => format!("{}h{:02}m{:02}s", hours, minutes, seconds),
        }
    }

    /// Share of searched rows that ended with a CNPJ, in percent.
    pub fn hit_rate(&self) -> f64 {
        if self.searched == 0 {
            0.0
        } else {
            self.cnpj_found as f64 * 100.0 / self.searched as f64
        }
    }

    pub fn lines(&self) -> Vec<(&'static str, String)> {
        vec![
            ("Sellers", self.total_rows.to_string()),
            ("Profile errors", self.api_errors.to_string()),
            ("CNPJ searches", self.searched.to_string()),
            (
                "CNPJs found",
                format!("{} ({:.1}%)", self.cnpj_found, self.hit_rate()),
            ),
            ("Browser failures", self.cnpj_errors.to_string()),
            ("Elapsed", self.format_duration()),
            ("Sellers/min", format!("{:.2}", self.rows_per_minute)),
        ]
    }

    pub fn display(&self) {
        const TITLE: &str = "Enrichment summary";

        let rows = self.lines();
        let label_width = rows.iter().map(|(label, _)| label.len()).max().unwrap_or(0);
        let value_width = rows.iter().map(|(_, value)| value.chars().count()).max().unwrap_or(0);
        let inner = (label_width + value_width + 5).max(TITLE.len() + 2);
        let value_width = inner - label_width - 5;

        println!("\n┌{}┐", "─".repeat(inner));
        println!("│ {:<w$} │", TITLE, w = inner - 2);
        println!("├{}┤", "─".repeat(inner));
        for (label, value) in &rows {
            println!("│ {:<lw$}   {:>vw$} │", label, value, lw = label_width, vw = value_width);
        }
        println!("└{}┘\n", "─".repeat(inner));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::seller::{extract, FetchError};
    use serde_json::json;

    fn profile(id: u64, cnpj: &str) -> SellerRecord {
        let mut record = extract(
            id,
            &Ok(json!({"nickname": "loja", "address": {"city": "Recife"}})),
        );
        record.cnpj_found = cnpj.to_string();
        record
    }

    #[test]
    fn test_counts() {
        let records = vec![
            profile(1, "11.222.333/0001-44"),
            profile(2, NOT_FOUND),
            profile(3, AUTOMATION_ERROR),
            extract(4, &Err(FetchError::Auth)),
        ];

        let report = BatchReport::new(&records, 120.0);
        assert_eq!(report.total_rows, 4);
        assert_eq!(report.api_errors, 1);
        assert_eq!(report.searched, 3);
        assert_eq!(report.cnpj_found, 1);
        assert_eq!(report.cnpj_errors, 1);
        assert!((report.rows_per_minute - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(BatchReport::new(&[], 3725.0).format_duration(), "1h02m05s");
        assert_eq!(BatchReport::new(&[], 65.0).format_duration(), "1m05s");
        assert_eq!(BatchReport::new(&[], 9.7).format_duration(), "9s");
        assert_eq!(BatchReport::new(&[], 0.0).rows_per_minute, 0.0);
    }

    #[test]
    fn test_lines_include_hit_rate() {
        let records = vec![
            profile(1, "11.222.333/0001-44"),
            profile(2, NOT_FOUND),
            profile(3, NOT_FOUND),
            profile(4, AUTOMATION_ERROR),
        ];

        let report = BatchReport::new(&records, 60.0);
        assert!((report.hit_rate() - 25.0).abs() < f64::EPSILON);

        let lines = report.lines();
        assert_eq!(lines[0], ("Sellers", "4".to_string()));
        assert_eq!(lines[3], ("CNPJs found", "1 (25.0%)".to_string()));
        assert_eq!(lines[6], ("Sellers/min", "4.00".to_string()));

        assert_eq!(BatchReport::new(&[], 1.0).hit_rate(), 0.0);
    }
}
