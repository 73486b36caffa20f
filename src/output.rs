//! Terminal output for search results and property listings

use crate::index::types::SearchHit;
use std::io::{self, Write};
use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};

/// One line per hit: `id  (score, shard)`, with the file path when known
pub fn print_hits(hits: &[SearchHit], color: bool) -> io::Result<()> {
    let choice = if color { ColorChoice::Auto } else { ColorChoice::Never };
    let mut stdout = StandardStream::stdout(choice);

    for hit in hits {
        stdout.set_color(ColorSpec::new().set_fg(Some(Color::Magenta)).set_bold(true))?;
        write!(stdout, "{}", hit.id)?;
        stdout.reset()?;

        stdout.set_color(ColorSpec::new().set_fg(Some(Color::Green)))?;
        write!(stdout, "  {:.0}", hit.score)?;
        stdout.reset()?;
        write!(stdout, " [shard {}]", hit.shard)?;

        if let Some(path) = &hit.path {
            stdout.set_color(ColorSpec::new().set_fg(Some(Color::Cyan)))?;
            write!(stdout, "  {}", path.display())?;
            stdout.reset()?;
        }
        writeln!(stdout)?;
    }

    Ok(())
}

/// `key = value` lines, keys highlighted
pub fn print_properties(entries: &[(String, String)], color: bool) -> io::Result<()> {
    let choice = if color { ColorChoice::Auto } else { ColorChoice::Never };
    let mut stdout = StandardStream::stdout(choice);

    let width = entries.iter().map(|(k, _)| k.len()).max().unwrap_or(0);
    for (key, value) in entries {
        stdout.set_color(ColorSpec::new().set_fg(Some(Color::Yellow)))?;
        write!(stdout, "{:<width$}", key, width = width)?;
        stdout.reset()?;
        writeln!(stdout, " = {}", value)?;
    }

    Ok(())
}
