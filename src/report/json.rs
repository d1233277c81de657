//! JSON report: `{ generated_at, summary, results }`

use super::Summary;
use crate::analyzer::AnalysisResult;
use chrono::Local;
use serde::Serialize;
use std::io::{self, Write};

#[derive(Serialize)]
struct Report<'a> {
    generator: &'static str,
    version: &'static str,
    generated_at: String,
    summary: Summary,
    results: &'a [AnalysisResult],
}

pub fn write<W: Write>(writer: &mut W, results: &[AnalysisResult]) -> io::Result<()> {
    let report = Report {
        generator: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
        generated_at: Local::now().to_rfc3339(),
        summary: Summary::from_results(results),
        results,
    };
    serde_json::to_writer_pretty(&mut *writer, &report)?;
    writeln!(writer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::DetectionKind;
    use crate::report::testing::{flagged, result};

    #[test]
    fn test_json_report_shape() {
        let results = vec![
            result("clean.osr", vec![]),
            flagged("bot.osr", &[DetectionKind::Autoplay]),
        ];
        let mut out = Vec::new();
        write(&mut out, &results).unwrap();

        let json: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(json["generator"], "replayguard");
        assert_eq!(json["summary"]["total"], 2);
        assert_eq!(json["summary"]["by_kind"]["AUTOPLAY"], 1);
        assert_eq!(json["results"][0]["verdict"], "CLEAN");
        assert_eq!(json["results"][1]["flags"][0]["flag"], "AUTOPLAY");
        assert_eq!(json["results"][1]["mode"], "standard");
    }
}
