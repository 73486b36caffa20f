use crate::index::dual::DualDirectoryIndex;
use crate::index::types::{IndexProperties, Mode};
use crate::utils::{dir_size, get_index_dir, list_index_names};
use anyhow::Result;
use std::io::Write;
use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};

/// Display mode, timestamps and document counts for one index
pub fn show_status(index: &DualDirectoryIndex, color: bool) -> Result<()> {
    let choice = if color { ColorChoice::Auto } else { ColorChoice::Never };
    let mut stdout = StandardStream::stdout(choice);

    let shards = index.shard_status()?;
    let documents: usize = shards.iter().map(|s| s.live_documents).sum();
    let last_rebuild = index.get_property(IndexProperties::LAST_FULL_REBUILD)?;
    let source = index.get_property(IndexProperties::SOURCE_ROOT)?;

    writeln!(stdout, "Index Status")?;
    writeln!(stdout, "============")?;
    writeln!(stdout)?;
    writeln!(stdout, "Name:             {}", index.name())?;
    writeln!(stdout, "Location:         {}", index.folder().display())?;
    if !source.is_empty() {
        writeln!(stdout, "Source:           {}", source)?;
    }
    write!(stdout, "Active:           ")?;
    write_mode(&mut stdout, index.mode())?;
    writeln!(stdout)?;
    writeln!(stdout, "Documents:        {}", documents)?;
    writeln!(
        stdout,
        "Last rebuild:     {}",
        last_rebuild
            .parse::<i64>()
            .map(format_timestamp)
            .unwrap_or_else(|_| "never".to_string())
    )?;
    if let Ok(size) = dir_size(index.folder()) {
        writeln!(stdout, "Index size:       {}", format_size(size))?;
    }

    writeln!(stdout)?;
    writeln!(stdout, "  {:<7} {:<11} {:<28} {:<28} {}", "Shard", "Mode", "Primary", "Secondary", "Docs")?;
    for shard in &shards {
        write!(stdout, "  {:<7} ", shard.shard)?;
        write_mode(&mut stdout, shard.mode)?;
        writeln!(
            stdout,
            "{:<2}{:<28} {:<28} {}",
            "",
            shard.primary_modified.map(format_timestamp).unwrap_or_else(|| "-".to_string()),
            shard.secondary_modified.map(format_timestamp).unwrap_or_else(|| "-".to_string()),
            shard.live_documents
        )?;
    }

    Ok(())
}

fn write_mode(stdout: &mut StandardStream, mode: Mode) -> std::io::Result<()> {
    let color = match mode {
        Mode::Primary => Color::Green,
        Mode::Secondary => Color::Cyan,
    };
    stdout.set_color(ColorSpec::new().set_fg(Some(color)).set_bold(true))?;
    write!(stdout, "{:<9}", mode)?;
    stdout.reset()
}

/// List all indexes in the app data directory
pub fn list_indexes() -> Result<()> {
    let names = list_index_names()?;

    if names.is_empty() {
        println!("No indexes found.");
        return Ok(());
    }

    println!("Indexes");
    println!("=======");
    println!();

    for name in names {
        let dir = get_index_dir(&name)?;
        let size = dir_size(&dir).map(format_size).unwrap_or_else(|_| "?".to_string());
        println!("  {}", name);
        println!("    Location: {}", dir.display());
        println!("    Size:     {}", size);
        println!();
    }

    Ok(())
}

/// Format byte size to human readable
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} bytes", bytes)
    }
}

/// Format unix millis
pub fn format_timestamp(millis: i64) -> String {
    use std::time::{Duration, UNIX_EPOCH};
    match u64::try_from(millis) {
        Ok(ms) => format!("{:?}", UNIX_EPOCH + Duration::from_millis(ms)),
        Err(_) => "-".to_string(),
    }
}
