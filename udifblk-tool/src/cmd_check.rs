use std::time::Instant;

use udifblk::{ChunkKind, SECTOR_SIZE};

use crate::style::*;
use crate::{CmdResult, Invocation};

/// Decode every chunk once and report the ones that fail
pub(crate) async fn run(args: &[String]) -> CmdResult {
    let inv = Invocation::parse(args, "check <dmg> [flags]")?;

    if !udifblk::is_dmg(&inv.path) {
        return Err(format!("{}: no UDIF trailer found", inv.path).into());
    }

    spinner_msg("Parsing chunk maps");
    let start = Instant::now();
    let image = inv.open()?;
    spinner_done(&format!(" ({})", format_duration(start.elapsed())));

    let total = image.total_sectors();
    let table = image.chunks();
    let mut buf = vec![0u8; table.max_plaintext_len() as usize];
    let mut failures = 0usize;
    let mut decoded = 0u64;

    spinner_msg(&format!("Decoding {} chunks", format_commas(table.len() as u64)));
    let start = Instant::now();
    for (i, chunk) in table.chunks().iter().enumerate() {
        if chunk.kind == ChunkKind::Zero || chunk.start_sector >= total {
            continue;
        }
        let count = chunk.sector_count.min(total - chunk.start_sector);
        let bytes = &mut buf[..(count * SECTOR_SIZE) as usize];
        match image.read_sectors(chunk.start_sector, count, bytes).await {
            Ok(()) => decoded += chunk.compressed_len,
            Err(e) => {
                if failures == 0 {
                    eprintln!();
                }
                eprintln!(
                    "  {RED}chunk {i}{RESET} ({} at sector {}): {e}",
                    chunk.kind.name(),
                    chunk.start_sector
                );
                failures += 1;
            }
        }
    }
    let elapsed = start.elapsed();
    spinner_done(&format!(" ({})", format_duration(elapsed)));

    let holes = holes(table.chunks(), total);

    header(&format!("Check: {}", inv.path));
    kv("Chunks", &format_commas(table.len() as u64));
    kv("Stored bytes decoded", &format_size(decoded));
    if elapsed.as_secs_f64() > 0.0 {
        kv(
            "Throughput",
            &format!("{}/s", format_size((decoded as f64 / elapsed.as_secs_f64()) as u64)),
        );
    }
    if inv.options.verify_checksums {
        kv("Master checksum", &format!("{GREEN}ok{RESET}"));
    }
    if holes > 0 {
        kv("Unmapped sectors", &format!("{YELLOW}{}{RESET}", format_commas(holes)));
    }
    if failures > 0 {
        kv("Failed chunks", &format!("{RED}{failures}{RESET}"));
        println!();
        return Err(format!("{failures} chunk(s) failed to decode").into());
    }
    kv_highlight("Result", "all chunks decoded");
    println!();

    Ok(())
}

/// Sectors in `[0, total)` that no chunk covers
fn holes(chunks: &[udifblk::Chunk], total: u64) -> u64 {
    let mut covered = 0u64;
    let mut missing = 0u64;
    for chunk in chunks {
        let start = chunk.start_sector.min(total);
        if start > covered {
            missing += start - covered;
        }
        covered = covered.max(chunk.end_sector().min(total));
    }
    missing + (total - covered)
}
