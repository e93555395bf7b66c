use super::{ExportUnit, Exporter, Grouping};
use crate::MangadexError;
use std::fs;
use std::io;
use std::path::Path;
use tracing::debug;

/// Plain image folders. Single chapter units are flat, grouped units get one
/// sub folder per chapter.
#[derive(Debug, Clone, Copy)]
pub struct RawExporter;

impl Exporter for RawExporter {
    fn extension(&self) -> Option<&'static str> {
        None
    }

    fn export(&self, unit: &ExportUnit, target: &Path) -> Result<(), MangadexError> {
        if unit.page_count() == 0 {
            return Err(MangadexError::EmptyExport(unit.name.clone()));
        }
        fs::create_dir_all(target)?;
        for (i, chapter) in unit.chapters.iter().enumerate() {
            let dir = match unit.grouping {
                Grouping::Chapter => target.to_path_buf(),
                _ => target.join(ExportUnit::chapter_dir(i, &chapter.chapter)),
            };
            fs::create_dir_all(&dir)?;
            for page in &chapter.pages {
                let Some(name) = page.path().file_name() else {
                    continue;
                };
                move_file(page.path(), &dir.join(name))?;
            }
        }
        debug!(target = %target.display(), "raw export done");
        Ok(())
    }
}

fn move_file(from: &Path, to: &Path) -> io::Result<()> {
    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        // rename does not cross filesystems
        Err(_) => {
            fs::copy(from, to)?;
            fs::remove_file(from)
        }
    }
}
