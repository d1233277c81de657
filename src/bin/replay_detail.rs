//! Detector diagnostics for investigating individual replays
//!
//! Prints the decoded header and every metric the detectors look at, then
//! the audit trail of a full pipeline run.

use replayguard::analyzer::{autoplay, score, spinbot, timewarp, MemoryAuditLog};
use replayguard::store::MemoryStore;
use replayguard::{mods, DetectionPipeline, Replay};
use std::env;

fn main() {
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: replay_detail <replay.osr> [more.osr ...]");
        std::process::exit(1);
    }

    let mut replays = Vec::new();
    for path in &args[1..] {
        match std::fs::read(path).map_err(|e| e.to_string()).and_then(|bytes| {
            Replay::from_bytes(path.as_str(), &bytes).map_err(|e| e.to_string())
        }) {
            Ok(replay) => replays.push(replay),
            Err(e) => eprintln!("{}: {}", path, e),
        }
    }

    // Files given together act as each other's corpus
    let corpus = MemoryStore::from_replays(replays.iter().cloned());
    let pipeline = DetectionPipeline::new();

    for replay in &replays {
        println!("\n{}", "=".repeat(60));
        println!("FILE: {}", replay.file_name);
        println!("{}", "=".repeat(60));
        print_header(replay);
        print_metrics(replay);

        let audit = MemoryAuditLog::new();
        let flags = pipeline.analyze(replay, &corpus, Some(&audit));

        println!("\n--- Audit trail ---");
        for line in audit.lines() {
            println!("  {}", line);
        }

        println!("\n--- Verdict ---");
        if flags.is_empty() {
            println!("  CLEAN");
        }
        for flag in &flags {
            println!("  {}", flag);
        }
    }
}

fn print_header(replay: &Replay) {
    println!("Mode:        {} (version {})", replay.mode, replay.version);
    println!("Player:      {}", replay.player_name);
    println!("Beatmap:     {}", replay.beatmap_hash);
    println!("Replay:      {}", replay.replay_hash);
    println!(
        "Played at:   {}",
        replay
            .played_at()
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| format!("<invalid ticks {}>", replay.timestamp))
    );
    if replay.online_score_id != 0 {
        println!("Online id:   {}", replay.online_score_id);
    }

    let h = &replay.hits;
    println!(
        "Hits:        300={} 100={} 50={} geki={} katu={} miss={}",
        h.great, h.good, h.meh, h.geki, h.katu, h.miss
    );
    println!("Accuracy:    {:.2}%", replay.accuracy() * 100.0);
    println!(
        "Score:       {} (combo {}x{})",
        replay.total_score,
        replay.max_combo,
        if replay.perfect { ", perfect" } else { "" }
    );
    println!(
        "Mods:        {} (bits {}, multiplier {:.4}{}{})",
        replay.mods_string(),
        replay.mods,
        mods::multiplier(replay.mods),
        if mods::is_unranked(replay.mods) { ", unranked" } else { "" },
        if mods::is_difficulty_increasing(replay.mods) { ", harder" } else { "" }
    );
    println!(
        "Frames:      {} over {:.1}s, blob {} bytes",
        replay.frames.len(),
        replay.duration_ms() as f64 / 1000.0,
        replay.compressed.len()
    );
}

fn print_metrics(replay: &Replay) {
    println!("\n--- Score ceiling ---");
    println!(
        "  base {:.0}, max {:.0}, reported {}",
        score::base_score(replay),
        score::max_possible_score(replay),
        replay.total_score
    );

    println!("\n--- Spin segments (> 300ms) ---");
    let mut any = false;
    for (segment, spm) in spinbot::measured_segments(&replay.frames) {
        any = true;
        println!(
            "  {:>8}ms - {:>8}ms  {:>6.2} rotations  {:>7.1} SPM{}",
            segment.start_ms,
            segment.end_ms,
            segment.rotations(),
            spm,
            if spm > spinbot::SPM_THRESHOLD { "  <-- over limit" } else { "" }
        );
    }
    if !any {
        println!("  none");
    }

    println!("\n--- Frame timing ---");
    match autoplay::timing_stats(&replay.frames) {
        Some(stats) => println!(
            "  identical ratio {:.3}, stddev {:.2}ms over {} deltas{}",
            stats.identical_ratio,
            stats.stddev_ms,
            stats.samples,
            if stats.is_robotic() { "  <-- robotic" } else { "" }
        ),
        None => println!("  too few frames"),
    }
    println!("  jumps over 450px: {}", autoplay::count_jumps(&replay.frames));

    let profile = timewarp::profile(&replay.frames);
    println!(
        "  dominant delta {}ms ({:.1}% of frames)",
        profile.dominant_delta,
        profile.consistency * 100.0
    );
    println!(
        "  fast moves {} / {} (avg {:.2} px/ms)",
        profile.fast_moves, profile.frame_count, profile.fast_average
    );
}
