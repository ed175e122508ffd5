use crate::core::engine::RunOutput;
use anyhow::{Context, Result};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

pub fn write(path: &Path, output: &RunOutput) -> Result<()> {
    let file = File::create(path).with_context(|| format!("create {} failed", path.display()))?;
    let mut w = BufWriter::new(file);
    write_to(&mut w, output)?;
    w.flush()?;
    Ok(())
}

pub fn write_to<W: Write>(w: &mut W, output: &RunOutput) -> Result<()> {
    writeln!(w, "#kmer\tcount")?;
    for row in &output.top {
        writeln!(w, "{}\t{}", row.kmer, row.count)?;
    }
    Ok(())
}
