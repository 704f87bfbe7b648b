use udifblk::{ChunkKind, MetadataSource, SECTOR_SIZE};

use crate::style::*;
use crate::{CmdResult, Invocation};

pub(crate) fn info(args: &[String]) -> CmdResult {
    let inv = Invocation::parse(args, "info <dmg> [flags]")?;
    let image = inv.open()?;
    let trailer = image.trailer();
    let stats = image.stats();

    header(&format!("DMG: {}", inv.path));

    section("Trailer");
    kv("Offset", &format!("{:#x}", trailer.offset));
    kv("Data fork", &format!("{:#x}", trailer.data_fork_offset));
    let metadata = match stats.metadata {
        MetadataSource::ResourceFork { offset, length } => {
            format!("resource fork at {offset:#x} ({})", format_size(length))
        }
        MetadataSource::Plist { offset, length } => {
            format!("XML plist at {offset:#x} ({})", format_size(length))
        }
    };
    kv("Chunk maps", &metadata);
    if trailer.master_checksum != 0 {
        kv(
            "Master checksum",
            &format!("{:#010x} (type {})", trailer.master_checksum, trailer.master_checksum_type),
        );
    }

    section("Geometry");
    kv("Sectors", &format_commas(stats.total_sectors));
    kv("Size", &format_size(stats.uncompressed_bytes()));
    kv("Chunks", &format_commas(stats.chunk_count as u64));
    if stats.dropped_entries > 0 {
        kv("Dropped entries", &format!("{YELLOW}{}{RESET}", stats.dropped_entries));
    }
    kv("Largest chunk", &format!("{} sectors", format_commas(stats.max_chunk_sectors)));
    let buffers = stats.max_compressed_len + stats.max_chunk_sectors * SECTOR_SIZE;
    kv("Decode buffers", &format_size(buffers));

    section("Compression");
    kv("Stored", &format_size(stats.compressed_bytes));
    kv_highlight("Space savings", &format!("{:.1}%", stats.space_savings()));

    let counts = [
        ("LZFSE", stats.lzfse_chunks),
        ("Zlib", stats.zlib_chunks),
        ("Bzip2", stats.bzip2_chunks),
        ("Raw", stats.raw_chunks),
        ("Zero", stats.zero_chunks),
    ];
    let kinds: Vec<String> = counts
        .iter()
        .filter(|(_, n)| *n > 0)
        .map(|(name, n)| format!("{name}: {n}"))
        .collect();
    if !kinds.is_empty() {
        kv("Chunk types", &kinds.join(", "));
    }
    println!();

    Ok(())
}

pub(crate) fn chunks(args: &[String]) -> CmdResult {
    let inv = Invocation::parse(args, "chunks <dmg> [flags]")?;
    let image = inv.open()?;
    let table = image.chunks();

    header(&format!("Chunks: {}", inv.path));
    println!();
    println!(
        "  {DIM}{:>6}  {:<6}  {:>12}  {:>8}  {:>14}  {:>10}{RESET}",
        "#", "Type", "Sector", "Count", "Offset", "Stored"
    );
    println!("  {DIM}{}{RESET}", "-".repeat(66));

    for (i, chunk) in table.chunks().iter().enumerate() {
        let color = match chunk.kind {
            ChunkKind::Zero => DIM,
            ChunkKind::Raw => WHITE,
            _ => GREEN,
        };
        let (offset, stored) = if chunk.kind == ChunkKind::Zero {
            ("-".to_string(), "-".to_string())
        } else {
            (format!("{:#x}", chunk.file_offset), format_size(chunk.compressed_len))
        };
        println!(
            "  {:>6}  {color}{:<6}{RESET}  {:>12}  {:>8}  {:>14}  {:>10}",
            i,
            chunk.kind.name(),
            chunk.start_sector,
            chunk.sector_count,
            offset,
            stored
        );
    }

    println!();
    println!("  {DIM}{} chunk(s){RESET}", table.len());
    println!();

    Ok(())
}
