//! CSV report, one row per replay

use crate::analyzer::AnalysisResult;
use std::io::{self, Write};

const HEADER: &str = "file_name,verdict,player,beatmap_hash,replay_hash,mode,mods,score,max_combo,accuracy,frames,played_at,flags,error";

pub fn write<W: Write>(writer: &mut W, results: &[AnalysisResult]) -> io::Result<()> {
    writeln!(writer, "{}", HEADER)?;

    for r in results {
        let flags: Vec<String> = r.flags.iter().map(|f| f.to_string()).collect();
        writeln!(
            writer,
            "{},{},{},{},{},{},{},{},{},{:.4},{},{},{},{}",
            escape(&r.file_name),
            r.verdict,
            escape(&r.player),
            r.beatmap_hash,
            r.replay_hash,
            r.mode.map(|m| m.as_str()).unwrap_or(""),
            r.mods,
            r.score,
            r.max_combo,
            r.accuracy,
            r.frame_count,
            r.played_at.as_deref().unwrap_or(""),
            escape(&flags.join(";")),
            escape(r.error.as_deref().unwrap_or("")),
        )?;
    }

    Ok(())
}

/// Quote fields containing separators, quotes or line breaks
fn escape(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}
