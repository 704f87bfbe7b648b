use std::io::{self, Write};

use udifblk::SECTOR_SIZE;

use crate::{CmdResult, Invocation};

/// Sectors per read request
const BATCH_SECTORS: u64 = 2048;

pub(crate) async fn run(args: &[String]) -> CmdResult {
    let inv = Invocation::parse(args, "cat <dmg> [start-sector] [count] [flags]")?;
    let image = inv.open()?;
    let total = image.total_sectors();

    let start = inv.number(0, "start sector")?.unwrap_or(0);
    if start > total {
        return Err(format!("start sector {start} is past the end ({total} sectors)").into());
    }
    let count = inv.number(1, "sector count")?.unwrap_or(total - start);
    let end = start.checked_add(count).filter(|&end| end <= total).ok_or_else(|| {
        format!("range {start}+{count} is past the end ({total} sectors)")
    })?;

    let mut stdout = io::stdout().lock();
    let mut buf = vec![0u8; (BATCH_SECTORS * SECTOR_SIZE) as usize];
    let mut sector = start;
    while sector < end {
        let n = (end - sector).min(BATCH_SECTORS);
        let bytes = &mut buf[..(n * SECTOR_SIZE) as usize];
        image.read_sectors(sector, n, bytes).await?;
        stdout.write_all(bytes)?;
        sector += n;
    }
    stdout.flush()?;

    Ok(())
}
